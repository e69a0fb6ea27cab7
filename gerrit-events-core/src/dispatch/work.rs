//! Units of dispatchable work

use crate::event::GerritEvent;
use crate::types::Provider;
use serde_json::Value;
use std::sync::Arc;

const PROJECT_MARKER: &str = "project";

/// One queued unit of work for the dispatcher
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// A line read from the event stream
    RawLine {
        text: String,
        provider: Option<Arc<Provider>>,
    },

    /// An already parsed JSON payload
    DecodedPayload {
        payload: Value,
        provider: Option<Arc<Provider>>,
    },

    /// An event created inside the process; never filtered
    InternalEvent { event: GerritEvent },
}

impl WorkItem {
    pub fn raw_line(text: impl Into<String>, provider: Option<Arc<Provider>>) -> Self {
        WorkItem::RawLine {
            text: text.into(),
            provider,
        }
    }

    /// Short label for log context
    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::RawLine { .. } => "raw-line",
            WorkItem::DecodedPayload { .. } => "decoded-payload",
            WorkItem::InternalEvent { .. } => "internal-event",
        }
    }
}

/// Cheaply find the project an undecoded event belongs to
///
/// Scans for the first `project` key and takes its string value up to the
/// closing quote, or up to the first `/` if that comes earlier, so both
/// `"foo"` and `"foo/bar"` yield `foo`. Nested objects are not understood:
/// for `"project":{"name":"x"}` the value of the first quoted string after
/// the colon is returned. Returns an empty string when nothing matches.
pub fn project_name_from_json(data: &str) -> &str {
    let Some(marker) = data.find(PROJECT_MARKER) else {
        return "";
    };

    let after_marker = marker + PROJECT_MARKER.len();
    let colon_or_start = data[after_marker..]
        .find(':')
        .map(|i| after_marker + i)
        .unwrap_or(0);
    let Some(open_quote) = data[colon_or_start..].find('"').map(|i| colon_or_start + i) else {
        return "";
    };

    let value = &data[open_quote + 1..];
    match (value.find('/'), value.find('"')) {
        (Some(separator), Some(quote)) if separator < quote => &value[..separator],
        (_, Some(quote)) => &value[..quote],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_project() {
        let line = r#"{"type":"ref-updated","refUpdate":{"project":"tools","refName":"main"}}"#;
        assert_eq!(project_name_from_json(line), "tools");
    }

    #[test]
    fn test_project_with_path_separator() {
        let line = r#"{"change":{"project":"platform/build/soong","branch":"main"}}"#;
        assert_eq!(project_name_from_json(line), "platform");
    }

    #[test]
    fn test_separator_after_closing_quote_is_ignored() {
        let line = r#"{"change":{"project":"tools","branch":"release/1.0"}}"#;
        assert_eq!(project_name_from_json(line), "tools");
    }

    #[test]
    fn test_whitespace_around_colon() {
        assert_eq!(project_name_from_json(r#"{"project" : "tools"}"#), "tools");
    }

    #[test]
    fn test_nested_project_object() {
        let line = r#"{"type":"project-created","project":{"name":"new"}}"#;
        assert_eq!(project_name_from_json(line), "name");
    }

    #[test]
    fn test_missing_or_malformed() {
        assert_eq!(project_name_from_json(r#"{"type":"x"}"#), "");
        assert_eq!(project_name_from_json(""), "");
        assert_eq!(project_name_from_json(r#"{"project":"unterminated"#), "");
        assert_eq!(project_name_from_json(r#"{"project":"#), "");
        assert_eq!(project_name_from_json("project"), "");
    }

    #[test]
    fn test_multibyte_project_name() {
        assert_eq!(project_name_from_json(r#"{"project":"översätt/x"}"#), "översätt");
    }

    #[test]
    fn test_work_item_kind() {
        assert_eq!(WorkItem::raw_line("{}", None).kind(), "raw-line");
    }
}
