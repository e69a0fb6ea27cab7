//! Event listeners and their registry
//!
//! A listener implements [`GerritEventListener::gerrit_event`] and may
//! override the per-kind methods. The registry calls exactly one method per
//! listener and event: the one matching the event kind, whose default
//! implementation forwards to `gerrit_event`.

use crate::error::ListenerError;
use crate::event::{
    ChangeEvent, CommentAdded, EventKind, GerritEvent, HashtagsChanged, MergeFailed, ProjectCreated,
    RefReplicated, RefUpdated, ReviewerAdded, TopicChanged, VoteDeleted,
};
use crate::listener_set::ListenerSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Receiver of review events
///
/// Methods run on dispatcher worker threads and may block.
pub trait GerritEventListener: Send + Sync {
    /// Fallback for every kind without a more specific override
    fn gerrit_event(&self, event: &GerritEvent) -> Result<(), ListenerError>;

    fn patchset_created(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn change_merged(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn change_abandoned(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn change_restored(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn comment_added(&self, event: &GerritEvent, _comment: &CommentAdded) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn ref_updated(&self, event: &GerritEvent, _update: &RefUpdated) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn project_created(&self, event: &GerritEvent, _project: &ProjectCreated) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn change_deleted(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn private_state_changed(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn wip_state_changed(&self, event: &GerritEvent, _change: &ChangeEvent) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn reviewer_added(&self, event: &GerritEvent, _added: &ReviewerAdded) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn topic_changed(&self, event: &GerritEvent, _topic: &TopicChanged) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn hashtags_changed(&self, event: &GerritEvent, _hashtags: &HashtagsChanged) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn vote_deleted(&self, event: &GerritEvent, _vote: &VoteDeleted) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn merge_failed(&self, event: &GerritEvent, _failure: &MergeFailed) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    fn ref_replicated(&self, event: &GerritEvent, _replication: &RefReplicated) -> Result<(), ListenerError> {
        self.gerrit_event(event)
    }

    /// Name used in log messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

fn deliver(listener: &dyn GerritEventListener, event: &GerritEvent) -> Result<(), ListenerError> {
    match &event.kind {
        EventKind::PatchsetCreated(change) => listener.patchset_created(event, change),
        EventKind::ChangeMerged(change) => listener.change_merged(event, change),
        EventKind::ChangeAbandoned(change) => listener.change_abandoned(event, change),
        EventKind::ChangeRestored(change) => listener.change_restored(event, change),
        EventKind::CommentAdded(comment) => listener.comment_added(event, comment),
        EventKind::RefUpdated(update) => listener.ref_updated(event, update),
        EventKind::ProjectCreated(project) => listener.project_created(event, project),
        EventKind::ChangeDeleted(change) => listener.change_deleted(event, change),
        EventKind::PrivateStateChanged(change) => listener.private_state_changed(event, change),
        EventKind::WipStateChanged(change) => listener.wip_state_changed(event, change),
        EventKind::ReviewerAdded(added) => listener.reviewer_added(event, added),
        EventKind::TopicChanged(topic) => listener.topic_changed(event, topic),
        EventKind::HashtagsChanged(hashtags) => listener.hashtags_changed(event, hashtags),
        EventKind::VoteDeleted(vote) => listener.vote_deleted(event, vote),
        EventKind::MergeFailed(failure) => listener.merge_failed(event, failure),
        EventKind::RefReplicated(replication) => listener.ref_replicated(event, replication),
        EventKind::Other { .. } => listener.gerrit_event(event),
    }
}

/// Registered listeners plus the comment suppression settings
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: ListenerSet<dyn GerritEventListener>,
    ignore_email: RwLock<HashMap<String, String>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; a second add of the same instance is rejected
    pub fn add(&self, listener: Arc<dyn GerritEventListener>) -> bool {
        let name = listener.name().to_string();
        let added = self.listeners.add(listener);
        if added {
            debug!(listener = %name, "Event listener added");
        } else {
            warn!(listener = %name, "The listener was added twice; ignoring");
        }
        added
    }

    pub fn remove(&self, listener: &Arc<dyn GerritEventListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Remove every listener, returning the previous set
    pub fn remove_all(&self) -> Vec<Arc<dyn GerritEventListener>> {
        self.listeners.remove_all()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Suppress comments from accounts whose email ends with `address`
    ///
    /// Applies to events from the server named `server`. An empty address
    /// clears the setting.
    pub fn set_ignore_email(&self, server: impl Into<String>, address: impl Into<String>) {
        let server = server.into();
        let address = address.into();
        let mut ignore = self.ignore_email.write();
        if address.is_empty() {
            ignore.remove(&server);
        } else {
            ignore.insert(server, address);
        }
    }

    pub fn ignore_email(&self, server: &str) -> Option<String> {
        self.ignore_email.read().get(server).cloned()
    }

    /// Whether `event` is a comment that must not reach any listener
    pub fn is_suppressed(&self, event: &GerritEvent) -> bool {
        let EventKind::CommentAdded(comment) = &event.kind else {
            return false;
        };
        let Some(email) = comment
            .author
            .as_ref()
            .and_then(|author| author.email.as_deref())
            .filter(|email| !email.is_empty())
        else {
            return false;
        };
        let Some(server) = event.provider_name() else {
            return false;
        };

        self.ignore_email
            .read()
            .get(server)
            .map(|ignored| !ignored.is_empty() && email.ends_with(ignored.as_str()))
            .unwrap_or(false)
    }

    /// Deliver `event` to every listener
    ///
    /// A listener that fails or panics is logged and skipped.
    pub fn notify(&self, event: &GerritEvent) {
        if self.is_suppressed(event) {
            trace!(event_type = event.event_type(), "Comment from ignored account suppressed");
            return;
        }

        let listeners = self.listeners.snapshot();
        for listener in listeners.iter() {
            trace!(listener = listener.name(), event_type = event.event_type(), "Notifying listener");
            match catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref(), event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    listener = listener.name(),
                    event_type = event.event_type(),
                    "Listener failed to handle event: {}", e
                ),
                Err(_) => error!(
                    listener = listener.name(),
                    event_type = event.event_type(),
                    "Listener panicked while handling event"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Account, Change, RefUpdate};
    use crate::types::Provider;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl GerritEventListener for Recorder {
        fn gerrit_event(&self, event: &GerritEvent) -> Result<(), ListenerError> {
            self.calls.lock().push(format!("generic:{}", event.event_type()));
            Ok(())
        }

        fn ref_updated(&self, _event: &GerritEvent, update: &RefUpdated) -> Result<(), ListenerError> {
            self.calls.lock().push(format!("ref:{}", update.ref_update.ref_name));
            Ok(())
        }

        fn merge_failed(&self, _event: &GerritEvent, failure: &MergeFailed) -> Result<(), ListenerError> {
            self.calls.lock().push(format!("merge-failed:{}", failure.reason));
            Ok(())
        }

        fn ref_replicated(&self, _event: &GerritEvent, replication: &RefReplicated) -> Result<(), ListenerError> {
            self.calls.lock().push(format!("replicated:{}", replication.target_node));
            Ok(())
        }
    }

    fn provider(name: &str) -> Arc<Provider> {
        Arc::new(Provider::new(name, "review.example.com", 29418, "", "3.9"))
    }

    fn ref_updated() -> GerritEvent {
        GerritEvent::new(EventKind::RefUpdated(RefUpdated {
            ref_update: RefUpdate {
                ref_name: "refs/heads/main".to_string(),
                project: "tools".to_string(),
                ..RefUpdate::default()
            },
            submitter: None,
        }))
    }

    fn comment_by(email: &str) -> GerritEvent {
        GerritEvent::new(EventKind::CommentAdded(CommentAdded {
            change: Change {
                project: "tools".to_string(),
                ..Change::default()
            },
            patch_set: None,
            author: Some(Account::with_email(email)),
            comment: "Build Successful".to_string(),
            approvals: Vec::new(),
        }))
        .with_provider(provider("review"))
    }

    #[test]
    fn test_specific_handler_overrides_generic() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());

        registry.notify(&ref_updated());
        registry.notify(&comment_by("dev@example.com"));

        assert_eq!(recorder.calls(), vec!["ref:refs/heads/main", "generic:comment-added"]);
    }

    #[test]
    fn test_each_kind_has_its_own_handler() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());

        registry.notify(&GerritEvent::new(EventKind::MergeFailed(MergeFailed {
            change: Change::default(),
            patch_set: None,
            submitter: None,
            reason: "Merge conflict".to_string(),
        })));
        registry.notify(&GerritEvent::new(EventKind::RefReplicated(RefReplicated {
            project: "tools".to_string(),
            git_ref: "refs/heads/main".to_string(),
            status: "succeeded".to_string(),
            target_node: "mirror".to_string(),
        })));
        // Not overridden by the recorder, so it reaches the fallback
        registry.notify(&GerritEvent::new(EventKind::TopicChanged(TopicChanged {
            change: Change::default(),
            changer: None,
            old_topic: None,
        })));

        assert_eq!(
            recorder.calls(),
            vec!["merge-failed:Merge conflict", "replicated:mirror", "generic:topic-changed"]
        );
    }

    #[test]
    fn test_comment_suppressed_by_email_suffix() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());
        registry.set_ignore_email("review", "@ci.example.com");

        registry.notify(&comment_by("bot@ci.example.com"));
        assert!(recorder.calls().is_empty());

        registry.notify(&comment_by("dev@example.com"));
        assert_eq!(recorder.calls().len(), 1);
    }

    #[test]
    fn test_suppression_is_per_server_and_case_sensitive() {
        let registry = ListenerRegistry::new();
        registry.set_ignore_email("other", "@ci.example.com");
        assert!(!registry.is_suppressed(&comment_by("bot@ci.example.com")));

        registry.set_ignore_email("review", "@CI.example.com");
        assert!(!registry.is_suppressed(&comment_by("bot@ci.example.com")));

        registry.set_ignore_email("review", "");
        assert_eq!(registry.ignore_email("review"), None);
    }

    #[test]
    fn test_suppression_needs_email_and_provider() {
        let registry = ListenerRegistry::new();
        registry.set_ignore_email("review", "example.com");
        assert!(!registry.is_suppressed(&comment_by("")));

        let mut without_provider = comment_by("bot@example.com");
        without_provider.provider = None;
        assert!(!registry.is_suppressed(&without_provider));

        // Only comments are ever suppressed
        assert!(!registry.is_suppressed(&ref_updated().with_provider(provider("review"))));
    }

    #[test]
    fn test_double_add_rejected() {
        let registry = ListenerRegistry::new();
        let recorder: Arc<dyn GerritEventListener> = Arc::new(Recorder::default());
        assert!(registry.add(Arc::clone(&recorder)));
        assert!(!registry.add(Arc::clone(&recorder)));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&recorder));
        assert!(registry.is_empty());
    }
}
