//! Review events
//!
//! [`GerritEvent`] is what listeners receive: the decoded kind plus the
//! provider of the session it was read from. Kinds the library does not
//! model in detail are kept as [`EventKind::Other`] with their raw payload.

use crate::types::Provider;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

pub mod decode;

pub use decode::{EventDecoder, JsonEventDecoder};

/// Account of a user on the review server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Account {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }
}

/// Change attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub project: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub number: u64,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub owner: Option<Account>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Patch set attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    #[serde(default, deserialize_with = "number_or_string")]
    pub number: u64,
    #[serde(default)]
    pub revision: String,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub uploader: Option<Account>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// A vote on a patch set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(rename = "type")]
    pub label: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub by: Option<Account>,
}

/// Ref update attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    #[serde(default)]
    pub old_rev: String,
    #[serde(default)]
    pub new_rev: String,
    pub ref_name: String,
    pub project: String,
}

/// Events about a change and, usually, one of its patch sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub change: Change,
    pub patch_set: Option<PatchSet>,
    /// Uploader, submitter, abandoner, restorer, deleter or changer,
    /// depending on the kind
    pub account: Option<Account>,
}

/// A comment (possibly with votes) on a patch set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentAdded {
    pub change: Change,
    pub patch_set: Option<PatchSet>,
    pub author: Option<Account>,
    pub comment: String,
    pub approvals: Vec<Approval>,
}

/// A ref was updated directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefUpdated {
    pub ref_update: RefUpdate,
    pub submitter: Option<Account>,
}

/// A new project was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectCreated {
    pub project_name: String,
    pub head_name: Option<String>,
}

/// A reviewer was added to a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewerAdded {
    pub change: Change,
    pub patch_set: Option<PatchSet>,
    pub reviewer: Option<Account>,
    pub adder: Option<Account>,
}

/// The topic of a change was changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicChanged {
    pub change: Change,
    pub changer: Option<Account>,
    pub old_topic: Option<String>,
}

/// Hashtags were added to or removed from a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashtagsChanged {
    pub change: Change,
    pub editor: Option<Account>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Hashtags of the change after the edit
    pub hashtags: Vec<String>,
}

/// A vote was removed from a patch set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteDeleted {
    pub change: Change,
    pub patch_set: Option<PatchSet>,
    pub reviewer: Option<Account>,
    pub remover: Option<Account>,
    pub comment: String,
    pub approvals: Vec<Approval>,
}

/// A submitted change could not be merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeFailed {
    pub change: Change,
    pub patch_set: Option<PatchSet>,
    pub submitter: Option<Account>,
    pub reason: String,
}

/// A ref was pushed to a replication target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefReplicated {
    pub project: String,
    pub git_ref: String,
    pub status: String,
    pub target_node: String,
}

/// Concrete kind of a review event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    PatchsetCreated(ChangeEvent),
    ChangeMerged(ChangeEvent),
    ChangeAbandoned(ChangeEvent),
    ChangeRestored(ChangeEvent),
    CommentAdded(CommentAdded),
    RefUpdated(RefUpdated),
    ProjectCreated(ProjectCreated),
    ChangeDeleted(ChangeEvent),
    PrivateStateChanged(ChangeEvent),
    WipStateChanged(ChangeEvent),
    ReviewerAdded(ReviewerAdded),
    TopicChanged(TopicChanged),
    HashtagsChanged(HashtagsChanged),
    VoteDeleted(VoteDeleted),
    MergeFailed(MergeFailed),
    RefReplicated(RefReplicated),
    /// Any event type without a dedicated variant
    Other {
        event_type: String,
        payload: serde_json::Value,
    },
}

/// A decoded review event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GerritEvent {
    /// Session the event was read from; `None` for internally created events
    pub provider: Option<Arc<Provider>>,
    /// Creation time on the server, in seconds since the epoch
    pub event_created_on: Option<i64>,
    pub kind: EventKind,
}

impl GerritEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            provider: None,
            event_created_on: None,
            kind,
        }
    }

    pub fn with_provider(mut self, provider: Arc<Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Wire name of the event type, e.g. `patchset-created`
    pub fn event_type(&self) -> &str {
        match &self.kind {
            EventKind::PatchsetCreated(_) => "patchset-created",
            EventKind::ChangeMerged(_) => "change-merged",
            EventKind::ChangeAbandoned(_) => "change-abandoned",
            EventKind::ChangeRestored(_) => "change-restored",
            EventKind::CommentAdded(_) => "comment-added",
            EventKind::RefUpdated(_) => "ref-updated",
            EventKind::ProjectCreated(_) => "project-created",
            EventKind::ChangeDeleted(_) => "change-deleted",
            EventKind::PrivateStateChanged(_) => "private-state-changed",
            EventKind::WipStateChanged(_) => "wip-state-changed",
            EventKind::ReviewerAdded(_) => "reviewer-added",
            EventKind::TopicChanged(_) => "topic-changed",
            EventKind::HashtagsChanged(_) => "hashtags-changed",
            EventKind::VoteDeleted(_) => "vote-deleted",
            EventKind::MergeFailed(_) => "merge-failed",
            EventKind::RefReplicated(_) => "ref-replicated",
            EventKind::Other { event_type, .. } => event_type,
        }
    }

    /// Project the event belongs to, when known
    pub fn project(&self) -> Option<&str> {
        match &self.kind {
            EventKind::PatchsetCreated(e)
            | EventKind::ChangeMerged(e)
            | EventKind::ChangeAbandoned(e)
            | EventKind::ChangeRestored(e)
            | EventKind::ChangeDeleted(e)
            | EventKind::PrivateStateChanged(e)
            | EventKind::WipStateChanged(e) => Some(&e.change.project),
            EventKind::CommentAdded(e) => Some(&e.change.project),
            EventKind::ReviewerAdded(e) => Some(&e.change.project),
            EventKind::TopicChanged(e) => Some(&e.change.project),
            EventKind::HashtagsChanged(e) => Some(&e.change.project),
            EventKind::VoteDeleted(e) => Some(&e.change.project),
            EventKind::MergeFailed(e) => Some(&e.change.project),
            EventKind::RefReplicated(e) => Some(&e.project),
            EventKind::RefUpdated(e) => Some(&e.ref_update.project),
            EventKind::ProjectCreated(e) => Some(&e.project_name),
            EventKind::Other { payload, .. } => payload
                .get("project")
                .and_then(|p| p.as_str().or_else(|| p.get("name").and_then(|n| n.as_str()))),
        }
    }

    /// Name of the server the event came from, if any
    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name.as_str())
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}
