//! Per-evaluation execution context: cancellation, deadline, sandbox
//! policy, and the view a native function receives when called.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::binder::Args;
use crate::exception::Raised;
use crate::sandbox::SandboxPolicy;

/// Shared cancellation flag. Clones observe the same flag, and the token
/// is `Send` so another thread can cancel a running evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Cancellation, deadline, and sandbox configuration for one evaluation.
///
/// Loop iterations and native calls all funnel through `check_interrupt`,
/// which is the single cooperative cancellation point.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
    sandbox: SandboxPolicy,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sandbox(mut self, policy: SandboxPolicy) -> Self {
        self.sandbox = policy;
        self
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn sandbox(&self) -> &SandboxPolicy {
        &self.sandbox
    }

    /// Raises a Cancelled-kind exception when the flag is set or the
    /// deadline has passed. Deadline expiry behaves exactly like an
    /// explicit cancel.
    pub fn check_interrupt(&self) -> Result<(), Raised> {
        if self.cancel.is_cancelled() {
            return Err(Raised::cancelled("execution cancelled"));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Raised::cancelled("execution deadline exceeded"));
        }
        Ok(())
    }
}

/// Everything a native function sees for one invocation: its arguments,
/// the execution context, and the script's print sink.
pub struct NativeCall<'a> {
    pub args: Args,
    pub ctx: &'a ExecutionContext,
    pub output: &'a mut dyn Write,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let ctx = ExecutionContext::new();
        let token = ctx.cancel_token();
        assert!(ctx.check_interrupt().is_ok());
        token.cancel();
        let err = ctx.check_interrupt().unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Cancelled);
    }

    #[test]
    fn expired_deadline_reports_cancellation() {
        let ctx = ExecutionContext::new().with_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(ctx.check_interrupt().is_err());
    }
}
