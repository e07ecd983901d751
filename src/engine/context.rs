use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::EngineError;

/// Caller-supplied cancellation for one operation: a token and an optional deadline.
/// Lock acquisition and loads race against it; log appends, once issued, do not.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Share a token owned by the caller (e.g. a connection or request scope).
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context already expired.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_done() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Run `fut` unless the token fires or the deadline passes first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, EngineError> {
        self.check()?;
        let expiry = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(EngineError::Cancelled),
            _ = expiry => Err(EngineError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
