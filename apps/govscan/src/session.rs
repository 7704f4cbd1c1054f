//! Session control: cancellation and the whole-session deadline.
//!
//! Both are checked at file boundaries only, so a file that has started
//! is always finished (scanned or atomically rewritten).

use crate::models::DiagnosticKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
/// Shared cancellation flag. Cloning shares the flag.
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionControl {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl SessionControl {
    /// A session that times out `timeout` from now, if given.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            cancel: CancelToken::new(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Why the next file must not be started, if it must not.
    /// Cancellation wins over the deadline.
    pub fn stop_reason(&self) -> Option<DiagnosticKind> {
        if self.cancel.is_cancelled() {
            return Some(DiagnosticKind::SkippedCancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DiagnosticKind::SkippedTimeout),
            _ => None,
        }
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reasons() {
        let open = SessionControl::unbounded();
        assert_eq!(open.stop_reason(), None);

        let expired = SessionControl::new(Some(Duration::ZERO));
        assert_eq!(expired.stop_reason(), Some(DiagnosticKind::SkippedTimeout));

        expired.cancel_token().cancel();
        assert_eq!(expired.stop_reason(), Some(DiagnosticKind::SkippedCancelled));
    }
}
