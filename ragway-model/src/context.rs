//! Per-call request context.
//!
//! Every gateway and pipeline operation receives a [`RequestContext`]
//! explicitly. It carries the tenant the call acts on behalf of and the
//! caller's cancellation/deadline signal, so tenant isolation is visible in
//! signatures instead of hidden in task-local lookups.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a context-bound wait stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The cancellation token fired.
    Cancelled,
    /// The deadline elapsed.
    DeadlineExceeded,
}

/// Tenant scope plus cancellation for one logical request.
///
/// Cloning is cheap and clones share the same cancellation token, so a
/// context can be handed to spawned tasks.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use ragway_model::RequestContext;
///
/// let ctx = RequestContext::new(tenant_id).with_timeout(Duration::from_secs(30));
/// let response = gateway.chat(&ctx, request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Create a context for `tenant_id` with a fresh cancellation token and no deadline.
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id, cancel: CancellationToken::new(), deadline: None }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The tenant every store access made under this context is scoped to.
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// The cancellation token observed by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check the signal without waiting.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `future` to completion unless the context is cancelled or its
    /// deadline elapses first. The future is dropped on interruption.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = until(self.deadline) => Err(Interrupted::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// Sleep for `duration`, aborting immediately on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
