use tokio_util::sync::CancellationToken;

/// Execution context handed to a [`crate::DiskImageBuilder`].
///
/// Cancelling a context also cancels every context derived from it with
/// [`BuildContext::child`].
#[derive(Clone, Debug, Default)]
pub struct BuildContext {
    token: CancellationToken,
}

impl BuildContext {
    /// The root context. Nothing cancels it unless the owner calls
    /// [`BuildContext::cancel`].
    pub fn background() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
