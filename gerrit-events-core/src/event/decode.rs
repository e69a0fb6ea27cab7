//! Decoding stream lines into [`GerritEvent`]s

use super::{
    Account, Approval, Change, ChangeEvent, CommentAdded, EventKind, GerritEvent, HashtagsChanged,
    MergeFailed, PatchSet, ProjectCreated, RefReplicated, RefUpdate, RefUpdated, ReviewerAdded,
    TopicChanged, VoteDeleted,
};
use crate::error::DecodeError;
use crate::types::Provider;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Turns stream lines or parsed JSON payloads into events
pub trait EventDecoder: Send + Sync {
    /// Decode an already parsed payload
    fn decode_value(
        &self,
        value: Value,
        provider: Option<Arc<Provider>>,
    ) -> Result<GerritEvent, DecodeError>;

    /// Decode one line of the event stream
    fn decode(&self, line: &str, provider: Option<Arc<Provider>>) -> Result<GerritEvent, DecodeError> {
        let value: Value = serde_json::from_str(line)?;
        self.decode_value(value, provider)
    }
}

/// Decoder for the JSON format written by `gerrit stream-events`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventDecoder;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeWire {
    change: Change,
    #[serde(default)]
    patch_set: Option<PatchSet>,
    #[serde(default)]
    uploader: Option<Account>,
    #[serde(default)]
    submitter: Option<Account>,
    #[serde(default)]
    abandoner: Option<Account>,
    #[serde(default)]
    restorer: Option<Account>,
    #[serde(default)]
    deleter: Option<Account>,
    #[serde(default)]
    changer: Option<Account>,
    #[serde(default)]
    author: Option<Account>,
    #[serde(default)]
    reviewer: Option<Account>,
    #[serde(default)]
    adder: Option<Account>,
    #[serde(default)]
    remover: Option<Account>,
    #[serde(default)]
    editor: Option<Account>,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    approvals: Vec<Approval>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    old_topic: Option<String>,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    hashtags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefReplicatedWire {
    project: String,
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    target_node: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefUpdatedWire {
    ref_update: RefUpdate,
    #[serde(default)]
    submitter: Option<Account>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectCreatedWire {
    project_name: String,
    #[serde(default)]
    head_name: Option<String>,
}

impl JsonEventDecoder {
    pub fn new() -> Self {
        Self
    }

    fn kind_of(event_type: &str, value: Value) -> Result<EventKind, DecodeError> {
        let change = |value: Value| -> Result<ChangeWire, DecodeError> { Ok(serde_json::from_value(value)?) };
        let kind = match event_type {
            "patchset-created" | "change-merged" | "change-abandoned" | "change-restored"
            | "change-deleted" | "private-state-changed" | "wip-state-changed" => {
                let wire = change(value)?;
                let account = match event_type {
                    "patchset-created" => wire.uploader,
                    "change-merged" => wire.submitter,
                    "change-abandoned" => wire.abandoner,
                    "change-restored" => wire.restorer,
                    "change-deleted" => wire.deleter,
                    _ => wire.changer,
                };
                let event = ChangeEvent {
                    change: wire.change,
                    patch_set: wire.patch_set,
                    account,
                };
                match event_type {
                    "patchset-created" => EventKind::PatchsetCreated(event),
                    "change-merged" => EventKind::ChangeMerged(event),
                    "change-abandoned" => EventKind::ChangeAbandoned(event),
                    "change-restored" => EventKind::ChangeRestored(event),
                    "change-deleted" => EventKind::ChangeDeleted(event),
                    "private-state-changed" => EventKind::PrivateStateChanged(event),
                    _ => EventKind::WipStateChanged(event),
                }
            }
            "comment-added" => {
                let wire = change(value)?;
                EventKind::CommentAdded(CommentAdded {
                    change: wire.change,
                    patch_set: wire.patch_set,
                    author: wire.author,
                    comment: wire.comment,
                    approvals: wire.approvals,
                })
            }
            "reviewer-added" => {
                let wire = change(value)?;
                EventKind::ReviewerAdded(ReviewerAdded {
                    change: wire.change,
                    patch_set: wire.patch_set,
                    reviewer: wire.reviewer,
                    adder: wire.adder,
                })
            }
            "topic-changed" => {
                let wire = change(value)?;
                EventKind::TopicChanged(TopicChanged {
                    change: wire.change,
                    changer: wire.changer,
                    old_topic: wire.old_topic,
                })
            }
            "hashtags-changed" => {
                let wire = change(value)?;
                EventKind::HashtagsChanged(HashtagsChanged {
                    change: wire.change,
                    editor: wire.editor,
                    added: wire.added,
                    removed: wire.removed,
                    hashtags: wire.hashtags,
                })
            }
            "vote-deleted" => {
                let wire = change(value)?;
                EventKind::VoteDeleted(VoteDeleted {
                    change: wire.change,
                    patch_set: wire.patch_set,
                    reviewer: wire.reviewer,
                    remover: wire.remover,
                    comment: wire.comment,
                    approvals: wire.approvals,
                })
            }
            "merge-failed" => {
                let wire = change(value)?;
                EventKind::MergeFailed(MergeFailed {
                    change: wire.change,
                    patch_set: wire.patch_set,
                    submitter: wire.submitter,
                    reason: wire.reason,
                })
            }
            "ref-updated" => {
                let wire: RefUpdatedWire = serde_json::from_value(value)?;
                EventKind::RefUpdated(RefUpdated {
                    ref_update: wire.ref_update,
                    submitter: wire.submitter,
                })
            }
            "ref-replicated" => {
                let wire: RefReplicatedWire = serde_json::from_value(value)?;
                EventKind::RefReplicated(RefReplicated {
                    project: wire.project,
                    git_ref: wire.git_ref,
                    status: wire.status,
                    target_node: wire.target_node,
                })
            }
            "project-created" => {
                let wire: ProjectCreatedWire = serde_json::from_value(value)?;
                EventKind::ProjectCreated(ProjectCreated {
                    project_name: wire.project_name,
                    head_name: wire.head_name,
                })
            }
            other => EventKind::Other {
                event_type: other.to_string(),
                payload: value,
            },
        };
        Ok(kind)
    }
}

impl EventDecoder for JsonEventDecoder {
    fn decode_value(
        &self,
        value: Value,
        provider: Option<Arc<Provider>>,
    ) -> Result<GerritEvent, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let event_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();
        let event_created_on = object.get("eventCreatedOn").and_then(Value::as_i64);

        Ok(GerritEvent {
            provider,
            event_created_on,
            kind: Self::kind_of(&event_type, value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCHSET_CREATED: &str = r#"{"type":"patchset-created","change":{"project":"platform/build","branch":"main","id":"I0123","number":4711,"subject":"Fix the build","owner":{"name":"Owner","email":"owner@example.com"}},"patchSet":{"number":"2","revision":"abc123","ref":"refs/changes/11/4711/2"},"uploader":{"name":"Uploader","email":"uploader@example.com"},"eventCreatedOn":1700000000}"#;

    fn provider() -> Option<Arc<Provider>> {
        Some(Arc::new(Provider::new(
            "review",
            "review.example.com",
            29418,
            "https://review.example.com/",
            "3.9.1",
        )))
    }

    #[test]
    fn test_decode_patchset_created() {
        let event = JsonEventDecoder.decode(PATCHSET_CREATED, provider()).unwrap();

        assert_eq!(event.event_type(), "patchset-created");
        assert_eq!(event.project(), Some("platform/build"));
        assert_eq!(event.event_created_on, Some(1700000000));
        assert_eq!(event.provider_name(), Some("review"));

        match event.kind {
            EventKind::PatchsetCreated(change) => {
                assert_eq!(change.change.number, 4711);
                let patch_set = change.patch_set.unwrap();
                assert_eq!(patch_set.number, 2);
                assert_eq!(patch_set.git_ref, "refs/changes/11/4711/2");
                assert_eq!(
                    change.account.and_then(|a| a.email).as_deref(),
                    Some("uploader@example.com")
                );
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_comment_added_with_votes() {
        let line = r#"{"type":"comment-added","change":{"project":"tools","number":"12"},"author":{"email":"ci@example.com"},"comment":"Build Successful","approvals":[{"type":"Verified","value":1}]}"#;
        let event = JsonEventDecoder.decode(line, None).unwrap();

        match event.kind {
            EventKind::CommentAdded(comment) => {
                assert_eq!(comment.change.number, 12);
                assert_eq!(comment.comment, "Build Successful");
                assert_eq!(comment.approvals[0].label, "Verified");
                assert_eq!(comment.approvals[0].value, "1");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_ref_updated() {
        let line = r#"{"type":"ref-updated","refUpdate":{"oldRev":"a","newRev":"b","refName":"refs/heads/main","project":"tools"}}"#;
        let event = JsonEventDecoder.decode(line, None).unwrap();
        assert_eq!(event.event_type(), "ref-updated");
        assert_eq!(event.project(), Some("tools"));
    }

    #[test]
    fn test_unknown_type_is_kept_as_other() {
        let line = r#"{"type":"ref-replication-scheduled","project":"tools","ref":"refs/heads/main"}"#;
        let event = JsonEventDecoder.decode(line, None).unwrap();

        assert_eq!(event.event_type(), "ref-replication-scheduled");
        assert_eq!(event.project(), Some("tools"));
        assert!(matches!(event.kind, EventKind::Other { .. }));
    }

    #[test]
    fn test_decode_change_state_events() {
        let cases = [
            ("change-deleted", "deleter"),
            ("private-state-changed", "changer"),
            ("wip-state-changed", "changer"),
        ];
        for (event_type, role) in cases {
            let line = format!(
                r#"{{"type":"{}","change":{{"project":"tools","number":7}},"{}":{{"email":"dev@example.com"}}}}"#,
                event_type, role
            );
            let event = JsonEventDecoder.decode(&line, None).unwrap();
            assert_eq!(event.event_type(), event_type);
            assert_eq!(event.project(), Some("tools"));

            let change = match event.kind {
                EventKind::ChangeDeleted(change)
                | EventKind::PrivateStateChanged(change)
                | EventKind::WipStateChanged(change) => change,
                other => panic!("unexpected kind {:?}", other),
            };
            assert_eq!(change.change.number, 7);
            assert_eq!(
                change.account.and_then(|a| a.email).as_deref(),
                Some("dev@example.com"),
                "{}",
                event_type
            );
        }
    }

    #[test]
    fn test_decode_reviewer_added() {
        let line = r#"{"type":"reviewer-added","change":{"project":"tools","number":7},"patchSet":{"number":1},"reviewer":{"username":"alice"},"adder":{"username":"bob"}}"#;
        match JsonEventDecoder.decode(line, None).unwrap().kind {
            EventKind::ReviewerAdded(added) => {
                assert_eq!(added.reviewer.and_then(|a| a.username).as_deref(), Some("alice"));
                assert_eq!(added.adder.and_then(|a| a.username).as_deref(), Some("bob"));
                assert_eq!(added.patch_set.map(|p| p.number), Some(1));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_topic_and_hashtags_changed() {
        let line = r#"{"type":"topic-changed","change":{"project":"tools","topic":"new"},"changer":{"name":"Dev"},"oldTopic":"old"}"#;
        match JsonEventDecoder.decode(line, None).unwrap().kind {
            EventKind::TopicChanged(topic) => {
                assert_eq!(topic.old_topic.as_deref(), Some("old"));
                assert_eq!(topic.change.topic.as_deref(), Some("new"));
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let line = r#"{"type":"hashtags-changed","change":{"project":"tools"},"editor":{"name":"Dev"},"added":["a","b"],"hashtags":["a","b","c"]}"#;
        match JsonEventDecoder.decode(line, None).unwrap().kind {
            EventKind::HashtagsChanged(tags) => {
                assert_eq!(tags.added, ["a", "b"]);
                assert!(tags.removed.is_empty());
                assert_eq!(tags.hashtags, ["a", "b", "c"]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_vote_deleted_and_merge_failed() {
        let line = r#"{"type":"vote-deleted","change":{"project":"tools"},"reviewer":{"name":"CI"},"remover":{"name":"Admin"},"comment":"Removed Verified+1","approvals":[{"type":"Verified","value":"0"}]}"#;
        match JsonEventDecoder.decode(line, None).unwrap().kind {
            EventKind::VoteDeleted(vote) => {
                assert_eq!(vote.comment, "Removed Verified+1");
                assert_eq!(vote.approvals[0].label, "Verified");
                assert_eq!(vote.remover.and_then(|a| a.name).as_deref(), Some("Admin"));
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let line = r#"{"type":"merge-failed","change":{"project":"tools"},"submitter":{"name":"Dev"},"reason":"Merge conflict"}"#;
        match JsonEventDecoder.decode(line, None).unwrap().kind {
            EventKind::MergeFailed(failed) => assert_eq!(failed.reason, "Merge conflict"),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_ref_replicated() {
        let line = r#"{"type":"ref-replicated","project":"tools","ref":"refs/heads/main","status":"succeeded","targetNode":"mirror.example.com"}"#;
        let event = JsonEventDecoder.decode(line, None).unwrap();
        assert_eq!(event.project(), Some("tools"));
        match event.kind {
            EventKind::RefReplicated(replicated) => {
                assert_eq!(replicated.git_ref, "refs/heads/main");
                assert_eq!(replicated.status, "succeeded");
                assert_eq!(replicated.target_node, "mirror.example.com");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            JsonEventDecoder.decode("not json", None),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            JsonEventDecoder.decode("[1,2]", None),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            JsonEventDecoder.decode(r#"{"project":"x"}"#, None),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            JsonEventDecoder.decode(r#"{"type":"change-merged"}"#, None),
            Err(DecodeError::Json(_))
        ));
    }
}
