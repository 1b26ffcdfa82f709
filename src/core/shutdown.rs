// Graceful shutdown flag checked by the loop between symbols

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initiate(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("🛑 Graceful shutdown initiated");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Flip the flag on Ctrl-C; the symbol in flight finishes its pass first
    pub fn listen_for_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => signal.initiate(),
                Err(e) => warn!(error = %e, "⚠️  Cannot listen for Ctrl-C"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_shutting_down());
        handle.initiate();
        handle.initiate();
        assert!(signal.is_shutting_down());
    }
}
