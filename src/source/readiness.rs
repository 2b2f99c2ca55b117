use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "the source has an open watch" flag.
///
/// Starts `false`. The source sets it once a watch is established and clears
/// it whenever the watch is lost and when it stops. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    /// Clears the flag when the returned guard drops, on every exit path.
    pub fn clear_on_drop(&self) -> ReadinessGuard {
        ReadinessGuard(self.clone())
    }
}

pub struct ReadinessGuard(Readiness);

impl Drop for ReadinessGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
