use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::credentials::{CredentialStore, TokenKey};
use crate::models::TokenPair;

/// Buffer size for the session event channel.
/// Events are rare (login, logout, expiry); 16 leaves room for a slow listener.
const EVENT_BUFFER_SIZE: usize = 16;

/// Session transitions reported to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoginSucceeded { expires_at: DateTime<Utc> },
    /// Refresh failed and the stored tokens were cleared
    SessionExpired,
    LoggedOut,
}

/// Session state backed by an injected credential store.
///
/// The session itself holds no token; "logged in" means an access token is
/// present in the store. Clones share the store and the event channel.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { store, events }
    }

    /// Receive session events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Startup check: true if a non-empty access token is stored.
    /// Storage errors count as logged out.
    pub async fn check_session(&self) -> bool {
        self.access_token().await.is_some()
    }

    /// Stored access token, or `None` if absent, empty or unreadable
    pub async fn access_token(&self) -> Option<String> {
        self.read(TokenKey::Access).await
    }

    /// Stored refresh token, or `None` if absent, empty or unreadable
    pub async fn refresh_token(&self) -> Option<String> {
        self.read(TokenKey::Refresh).await
    }

    async fn read(&self, key: TokenKey) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(token)) if !token.is_empty() => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Credential store read failed, treating as absent");
                None
            }
        }
    }

    /// Replace the stored pair with a freshly issued one (access first).
    /// A pair without a refresh token removes the old one.
    pub async fn save_tokens(&self, pair: &TokenPair) -> Result<()> {
        self.store.set(TokenKey::Access, &pair.access_token).await?;
        if pair.refresh_token.is_empty() {
            self.store.delete(TokenKey::Refresh).await?;
        } else {
            self.store.set(TokenKey::Refresh, &pair.refresh_token).await?;
        }
        debug!("Stored token pair");
        Ok(())
    }

    /// Persist a refreshed pair. The refresh token is only rewritten when the
    /// server rotated it.
    pub async fn save_refreshed(&self, pair: &TokenPair, previous_refresh: &str) -> Result<()> {
        self.store.set(TokenKey::Access, &pair.access_token).await?;
        if !pair.refresh_token.is_empty() && pair.refresh_token != previous_refresh {
            self.store.set(TokenKey::Refresh, &pair.refresh_token).await?;
            debug!("Refresh token rotated");
        }
        Ok(())
    }

    /// Delete both tokens. Both deletes are attempted; the first error wins.
    pub async fn clear(&self) -> Result<()> {
        let access = self.store.delete(TokenKey::Access).await;
        let refresh = self.store.delete(TokenKey::Refresh).await;
        access?;
        refresh?;
        debug!("Cleared stored tokens");
        Ok(())
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        debug!(event = ?event, "Session event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
