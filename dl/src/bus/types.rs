//! Messages pushed to viewers

use serde::{Deserialize, Serialize};

/// State-change notification for connected viewers
///
/// Serialized as `{"type": "issuesUpdated"}` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerMessage {
    /// The issue set changed or started recomputing
    IssuesUpdated,
    /// Dataset or configuration changed; refetch state
    Refresh,
    /// A new layout was pushed
    ResetLayout,
}

impl ViewerMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ViewerMessage::IssuesUpdated => "issuesUpdated",
            ViewerMessage::Refresh => "refresh",
            ViewerMessage::ResetLayout => "resetLayout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        for message in [ViewerMessage::IssuesUpdated, ViewerMessage::Refresh, ViewerMessage::ResetLayout] {
            let json = serde_json::to_value(message).unwrap();
            assert_eq!(json, serde_json::json!({ "type": message.message_type() }));
        }
    }

    #[test]
    fn test_parse_from_viewer_side() {
        let message: ViewerMessage = serde_json::from_str(r#"{"type":"resetLayout"}"#).unwrap();
        assert_eq!(message, ViewerMessage::ResetLayout);
    }
}
