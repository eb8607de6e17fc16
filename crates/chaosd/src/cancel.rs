//! Operator cancellation. SIGINT/SIGTERM flip a shared flag that the
//! sequencer and the probes check between iterations. A second signal
//! while the flag is set exits immediately.

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status when the operator signals again during teardown.
pub const EXIT_FORCED: i32 = 130;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route SIGINT and SIGTERM into this token instead of killing the
    /// process, so the restore envelope still runs.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        self.install_for(&[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])
    }

    fn install_for(&self, signals: &[c_int]) -> std::io::Result<()> {
        for &signal in signals {
            // Registered first: it must see the flag before this delivery sets it.
            signal_hook::flag::register_conditional_shutdown(
                signal,
                EXIT_FORCED,
                Arc::clone(&self.flag),
            )?;
            signal_hook::flag::register(signal, Arc::clone(&self.flag))?;
        }
        Ok(())
    }
}
