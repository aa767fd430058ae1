use std::thread;

use tracing::debug;

use sendwave_campaigns::ThrottleWindow;

/// Per-job pacing applied right before the gateway call.
///
/// Blocks only the calling worker thread.
pub trait Throttle: Send + Sync {
    fn pause(&self, window: ThrottleWindow);
}

/// Sleeps a uniformly random duration from the campaign's window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomThrottle;

impl Throttle for RandomThrottle {
    fn pause(&self, window: ThrottleWindow) {
        let delay = window.sample(&mut rand::thread_rng());
        debug!(delay_ms = delay.as_millis() as u64, "throttling before send");
        thread::sleep(delay);
    }
}

/// Never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

impl Throttle for NoThrottle {
    fn pause(&self, _window: ThrottleWindow) {}
}
