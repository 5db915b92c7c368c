use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::connection::ConnectionProvider;
use crate::core::domain::PeerIdentifier;
use crate::core::error::Result;

/// Obtains the process-wide peer identifier from the broker, exactly once.
/// Until `initialize` resolves the identifier is unset and anything that
/// needs it (share links, listening) has to wait.
pub struct IdentityProvider {
    provider: Arc<dyn ConnectionProvider>,
    identifier: OnceCell<PeerIdentifier>,
}

impl IdentityProvider {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            identifier: OnceCell::new(),
        }
    }

    /// Allocate the identifier. Re-initialization is a no-op that returns
    /// the already-allocated identifier. An allocation failure is fatal to
    /// the session and must be shown to the user, not swallowed.
    pub async fn initialize(&self) -> Result<&PeerIdentifier> {
        self.identifier
            .get_or_try_init(|| async {
                let identifier = self.provider.allocate_identifier().await?;
                info!(%identifier, "peer identifier allocated");
                Ok(identifier)
            })
            .await
    }

    /// The identifier, if allocation has resolved
    pub fn get(&self) -> Option<&PeerIdentifier> {
        self.identifier.get()
    }
}

/// Builds the shareable URLs that embed a peer identifier
#[derive(Debug, Clone)]
pub struct ShareAddress {
    base: String,
}

impl ShareAddress {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    /// The link a remote sender opens to transfer files to `identifier`
    pub fn send_link(&self, identifier: &PeerIdentifier) -> String {
        format!("{}/send/{}", self.base, identifier)
    }

    /// The receiver-facing page for their own identifier
    pub fn receive_link(&self, identifier: &PeerIdentifier) -> String {
        format!("{}/receive/{}", self.base, identifier)
    }
}
