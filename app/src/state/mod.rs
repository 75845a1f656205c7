pub mod config;
mod matches;
mod notifications;

pub use matches::{MatchStore, MatchStoreWriter, PromptClaim};
pub use notifications::{NotificationStore, NotificationStoreWriter};

use std::fmt;
use std::sync::RwLock;

use crate::channel::ChannelRegistry;
use crate::reconciler::{MatchReconciler, NotificationReconciler};
use config::SystemConfig;

/// Errors surfaced by `ClientState` operations.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientError {
    /// A mount was attempted without a credential.
    NotAuthenticated,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not logged in: no credential available"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Root entry point for all client state.
///
/// Owns the channel registry, both stores and their writers, and the
/// current credential. Consumers get read handles (`matches`,
/// `notifications`); reconcilers are mounted through it so they always use
/// the current credential.
pub struct ClientState {
    pub system: SystemConfig,
    pub registry: ChannelRegistry,
    pub matches: MatchStore,
    pub notifications: NotificationStore,
    match_writer: MatchStoreWriter,
    notification_writer: NotificationStoreWriter,
    credential: RwLock<Option<String>>,
}

impl ClientState {
    pub fn new(system: SystemConfig, registry: ChannelRegistry) -> Self {
        let (matches, match_writer) = MatchStore::new();
        let max_toasts = system.snapshot().notifications.max_toasts;
        let (notifications, notification_writer) = NotificationStore::new(max_toasts);
        Self {
            system,
            registry,
            matches,
            notifications,
            match_writer,
            notification_writer,
            credential: RwLock::new(None),
        }
    }

    pub fn credential(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Set the credential. A different credential than the current one ends
    /// the previous session first.
    pub fn login(&self, credential: impl Into<String>) {
        let credential = credential.into();
        let previous = self.credential();
        if previous.as_deref() == Some(credential.as_str()) {
            return;
        }
        if previous.is_some() {
            self.logout();
        }
        tracing::info!("logged in");
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = Some(credential);
    }

    /// Drop the credential, close every channel, and reset both stores.
    pub fn logout(&self) {
        self.credential
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.registry.release_all();
        self.match_writer.reset();
        self.notification_writer.clear();
        tracing::info!("logged out");
    }

    /// Hide a visible toast. Returns `false` if it was not shown.
    pub fn dismiss_notification(&self, notification_id: &str) -> bool {
        self.notification_writer.dismiss(notification_id)
    }

    pub fn mount_matching(&self) -> Result<MatchReconciler, ClientError> {
        let credential = self.credential().ok_or(ClientError::NotAuthenticated)?;
        let settings = self.system.snapshot().matching;
        Ok(MatchReconciler::mount(
            &self.registry,
            &credential,
            self.match_writer.clone(),
            &settings,
        ))
    }

    pub fn mount_notifications(&self) -> Result<NotificationReconciler, ClientError> {
        let credential = self.credential().ok_or(ClientError::NotAuthenticated)?;
        Ok(NotificationReconciler::mount(
            &self.registry,
            &credential,
            self.notification_writer.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryConnector;
    use matchsync::{MatchPhase, MatchsyncConfig, Namespace, events};
    use serde_json::json;

    fn client() -> (MemoryConnector, ClientState) {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let state = ClientState::new(SystemConfig::in_memory(MatchsyncConfig::default()), registry);
        (connector, state)
    }

    #[test]
    fn mounting_requires_a_credential() {
        let (_connector, state) = client();
        assert_eq!(
            state.mount_matching().err(),
            Some(ClientError::NotAuthenticated)
        );
        assert!(state.mount_notifications().is_err());
    }

    #[test]
    fn logout_releases_channels_and_resets_stores() {
        let (connector, state) = client();
        state.login("alice");
        let rec = state.mount_matching().unwrap();
        let _notes = state.mount_notifications().unwrap();

        rec.join_queue();
        connector.link(Namespace::Matching).deliver(
            events::MATCH_FOUND,
            json!({ "matchId": "m1", "opponent": { "id": 1, "name": "Bot" } }),
        );
        connector.link(Namespace::User).deliver(
            events::NOTIFICATION,
            json!({ "notificationId": "n1", "title": "hi" }),
        );
        assert_eq!(state.matches.phase(), MatchPhase::MatchFound);
        assert!(state.dismiss_notification("n1"));
        assert!(!state.dismiss_notification("n1"));

        state.logout();
        assert_eq!(state.credential(), None);
        assert_eq!(state.matches.snapshot(), Default::default());
        assert!(state.notifications.snapshot().is_empty());
        assert!(rec.channel().is_closed());
        assert!(state.registry.get(Namespace::Matching).is_none());
    }

    #[test]
    fn new_credential_opens_fresh_channels() {
        let (connector, state) = client();
        state.login("alice");
        let first = state.mount_matching().unwrap();

        state.login("alice");
        assert!(!first.channel().is_closed());

        state.login("bob");
        assert!(first.channel().is_closed());
        let second = state.mount_matching().unwrap();
        assert_eq!(second.channel().credential(), "bob");
        assert_eq!(connector.last().request.credential, "bob");
    }
}
