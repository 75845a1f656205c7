//! Global notification reconciler: user namespace events into the toast
//! store. Independent of any match.

use matchsync::{ClientCommand, Namespace, Notification, events};

use super::Subscription;
use crate::channel::ChannelRegistry;
use crate::state::NotificationStoreWriter;

/// One mounted consumer of the user namespace. Dropping it unmounts.
pub struct NotificationReconciler {
    subscription: Subscription,
}

impl NotificationReconciler {
    pub fn mount(
        registry: &ChannelRegistry,
        credential: &str,
        writer: NotificationStoreWriter,
    ) -> Self {
        let channel = registry.acquire(Namespace::User, credential);
        let mut subscription = Subscription::new(channel);

        subscription.on(events::NOTIFICATION, move |frame| {
            match frame.parse::<Notification>() {
                Ok(notification) => {
                    tracing::info!("notification: {}", notification.title);
                    if !writer.push(notification) {
                        tracing::debug!("notification: duplicate ignored");
                    }
                }
                Err(e) => tracing::warn!("notification: malformed payload: {e}"),
            }
        });
        subscription.join_on_connect(|channel| {
            tracing::debug!("user: joining user room");
            channel.send_command(ClientCommand::JoinUserRoom);
        });

        Self { subscription }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn unmount(mut self) {
        self.subscription.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryConnector;
    use crate::reconciler::MatchReconciler;
    use crate::state::{MatchStore, NotificationStore};
    use matchsync::{MatchPhase, MatchingSection};
    use serde_json::json;

    #[test]
    fn joins_user_room_and_surfaces_notifications() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let (store, writer) = NotificationStore::new(5);
        let _rec = NotificationReconciler::mount(&registry, "tok", writer);

        let link = connector.link(Namespace::User);
        assert!(link.sent().is_empty());
        link.connect();
        let sent = link.sent();
        assert_eq!(sent[0].event, events::JOIN_USER_ROOM);
        assert_eq!(sent[0].data, json!({}));

        let payload = json!({ "notificationId": "n1", "type": "REWARD", "title": "Gift", "body": "" });
        link.deliver(events::NOTIFICATION, payload.clone());
        link.deliver(events::NOTIFICATION, payload);
        link.deliver(events::NOTIFICATION, json!({ "title": "no id" }));
        let toasts = store.snapshot();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].notification.kind, "REWARD");
    }

    #[test]
    fn coexists_with_match_reconciler() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let (notes, note_writer) = NotificationStore::new(5);
        let (matches, match_writer) = MatchStore::new();

        let note_rec = NotificationReconciler::mount(&registry, "tok", note_writer);
        let match_rec =
            MatchReconciler::mount(&registry, "tok", match_writer, &MatchingSection::default());
        assert_eq!(connector.opened(), 2);

        match_rec.join_queue();
        connector.link(Namespace::Matching).deliver(
            events::MATCH_FOUND,
            json!({ "matchId": "m1", "opponent": { "id": 3, "name": "Cy" } }),
        );
        connector.link(Namespace::User).deliver(
            events::NOTIFICATION,
            json!({ "notificationId": 1, "title": "hi" }),
        );
        assert_eq!(matches.phase(), MatchPhase::MatchFound);
        assert_eq!(notes.snapshot().len(), 1);

        note_rec.unmount();
        assert!(match_rec.is_mounted());
        assert_eq!(
            registry
                .get(Namespace::User)
                .map(|c| c.handler_count()),
            Some(0)
        );
    }
}
