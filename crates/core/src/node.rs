//! The poll-until-stopped loop shared by hosts, routers and the link layer.
//!
//! Each node runs on its own thread. One iteration calls [`Node::poll`]
//! once, then checks the [`StopSignal`]; after `stop()` the thread exits
//! within one iteration. Iterations that found nothing to do back off with a
//! yield and then a short sleep, so idle nodes do not spin a core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Idle iterations spent yielding before the loop starts sleeping
const SPIN_LIMIT: u32 = 64;

/// Sleep between idle iterations once past `SPIN_LIMIT`
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Something that does a bounded amount of work per call.
pub trait Node: Send + Sync {
    /// Name used for the thread and in logs.
    fn name(&self) -> &str;

    /// Do one round of work. Returns how many packets were handled.
    fn poll(&self) -> usize;
}

/// Cooperative stop flag shared between the driver and node threads.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Run `node` on a named thread until `stop` is set.
pub fn spawn(node: Arc<dyn Node>, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(node.name().to_string())
        .spawn(move || run(node.as_ref(), &stop))
}

/// The loop body, usable on the current thread.
pub fn run(node: &dyn Node, stop: &StopSignal) {
    info!(node = node.name(), "starting");

    let mut idle = 0u32;
    let mut handled = 0u64;
    while !stop.is_stopped() {
        let n = node.poll();
        if n > 0 {
            handled += n as u64;
            idle = 0;
        } else if idle < SPIN_LIMIT {
            idle += 1;
            thread::yield_now();
        } else {
            thread::sleep(IDLE_SLEEP);
        }
    }

    debug!(node = node.name(), handled, "loop exited");
    info!(node = node.name(), "ending");
}
