//! Control channel message types
//!
//! JSON-over-newline protocol. After the handshake every line is an envelope
//! `{"kind": <string>, "data": <any>}`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ColumnTypeMapping, IssueReport, Layout};

/// First line sent by this process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub authkey: String,
}

/// Supervisor's answer to the handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeReply {
    pub ok: bool,
}

/// Messages from this process to the supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ProcessMessage {
    /// Connected and about to serve
    Startup,

    /// First update cycle applied
    StartupComplete,

    /// A viewer connected; carries the active viewer count
    FrontendConnected(usize),

    /// A viewer went away; carries the active viewer count
    FrontendDisconnected(usize),

    /// Reply to `get_df`
    Df(Option<DatasetSummary>),
}

impl ProcessMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessMessage::Startup => "startup",
            ProcessMessage::StartupComplete => "startup_complete",
            ProcessMessage::FrontendConnected(_) => "frontend_connected",
            ProcessMessage::FrontendDisconnected(_) => "frontend_disconnected",
            ProcessMessage::Df(_) => "df",
        }
    }
}

/// Description of the active dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSummary {
    pub uid: String,
    pub reference: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Partial application configuration; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfigUpdate {
    /// Reference of the dataset to open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// User-declared column types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtypes: Option<ColumnTypeMapping>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_issues: Option<Vec<IssueReport>>,

    /// Whether analyzers should run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyze: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filebrowsing_allowed: Option<bool>,
}

impl AppConfigUpdate {
    /// Only the layout is set
    pub fn is_layout_only(&self) -> bool {
        self.layout.is_some()
            && self.dataset.is_none()
            && self.dtypes.is_none()
            && self.custom_issues.is_none()
            && self.analyze.is_none()
            && self.project_root.is_none()
            && self.filebrowsing_allowed.is_none()
    }
}

/// Messages from the supervisor to this process
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorMessage {
    Update(Box<AppConfigUpdate>),
    GetDf,
    RefreshFrontends,
}

/// Why an inbound line could not be dispatched
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message without kind: {0}")]
    MissingKind(String),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl SupervisorMessage {
    /// Decode one protocol line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Some(kind) = envelope.kind else {
            return Err(ProtocolError::MissingKind(line.to_string()));
        };

        match kind.as_str() {
            "update" => {
                let data = if envelope.data.is_null() {
                    Value::Object(Default::default())
                } else {
                    envelope.data
                };
                serde_json::from_value(data)
                    .map(|update| SupervisorMessage::Update(Box::new(update)))
                    .map_err(|e| ProtocolError::InvalidPayload {
                        kind,
                        reason: e.to_string(),
                    })
            }
            "get_df" => Ok(SupervisorMessage::GetDf),
            "refresh_frontends" => Ok(SupervisorMessage::RefreshFrontends),
            _ => Err(ProtocolError::UnknownKind(kind)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorMessage::Update(_) => "update",
            SupervisorMessage::GetDf => "get_df",
            SupervisorMessage::RefreshFrontends => "refresh_frontends",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnType, Severity};

    #[test]
    fn test_startup_serialize() {
        let json = serde_json::to_string(&ProcessMessage::Startup).unwrap();
        assert_eq!(json, r#"{"kind":"startup"}"#);
    }

    #[test]
    fn test_startup_complete_serialize() {
        let json = serde_json::to_string(&ProcessMessage::StartupComplete).unwrap();
        assert_eq!(json, r#"{"kind":"startup_complete"}"#);
    }

    #[test]
    fn test_frontend_counts_serialize() {
        let json = serde_json::to_string(&ProcessMessage::FrontendDisconnected(1)).unwrap();
        assert_eq!(json, r#"{"kind":"frontend_disconnected","data":1}"#);
        let json = serde_json::to_string(&ProcessMessage::FrontendConnected(3)).unwrap();
        assert_eq!(json, r#"{"kind":"frontend_connected","data":3}"#);
    }

    #[test]
    fn test_df_serialize() {
        let json = serde_json::to_value(ProcessMessage::Df(None)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "df", "data": null}));

        let summary = DatasetSummary {
            uid: "abc".to_string(),
            reference: "/data".to_string(),
            rows: 2,
            columns: vec!["path".to_string()],
        };
        let json = serde_json::to_value(ProcessMessage::Df(Some(summary))).unwrap();
        assert_eq!(json["data"]["rows"], 2);
        assert_eq!(json["data"]["columns"][0], "path");
    }

    #[test]
    fn test_handshake_serialize() {
        let json = serde_json::to_string(&HandshakeRequest {
            authkey: "secret".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"authkey":"secret"}"#);
        let reply: HandshakeReply = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(reply.ok);
    }

    #[test]
    fn test_parse_update() {
        let line = r#"{"kind":"update","data":{
            "dataset":"/data/images",
            "dtypes":{"file":"image"},
            "analyze":true,
            "custom_issues":[{"title":"Mislabeled","rows":[4,2]}]
        }}"#;
        let SupervisorMessage::Update(update) = SupervisorMessage::parse(line).unwrap() else {
            panic!("Expected update");
        };
        assert_eq!(update.dataset.as_deref(), Some("/data/images"));
        assert_eq!(update.dtypes.as_ref().unwrap()["file"], ColumnType::Image);
        assert_eq!(update.analyze, Some(true));
        let issues = update.custom_issues.as_ref().unwrap();
        assert_eq!(issues[0].severity(), Severity::Medium);
        assert_eq!(issues[0].affected_rows(), &[4, 2]);
        assert!(update.layout.is_none());
        assert!(!update.is_layout_only());
    }

    #[test]
    fn test_parse_layout_only_update() {
        let line = r#"{"kind":"update","data":{"layout":{"children":[]}}}"#;
        let SupervisorMessage::Update(update) = SupervisorMessage::parse(line).unwrap() else {
            panic!("Expected update");
        };
        assert!(update.is_layout_only());
    }

    #[test]
    fn test_parse_update_without_data() {
        let message = SupervisorMessage::parse(r#"{"kind":"update"}"#).unwrap();
        assert_eq!(message, SupervisorMessage::Update(Box::default()));
    }

    #[test]
    fn test_parse_simple_kinds() {
        assert_eq!(SupervisorMessage::parse(r#"{"kind":"get_df"}"#).unwrap(), SupervisorMessage::GetDf);
        assert_eq!(
            SupervisorMessage::parse(r#"{"kind":"refresh_frontends","data":null}"#).unwrap(),
            SupervisorMessage::RefreshFrontends
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SupervisorMessage::parse(r#"{"data":1}"#),
            Err(ProtocolError::MissingKind(_))
        ));
        assert!(matches!(
            SupervisorMessage::parse(r#"{"kind":"reboot"}"#),
            Err(ProtocolError::UnknownKind(kind)) if kind == "reboot"
        ));
        assert!(matches!(
            SupervisorMessage::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            SupervisorMessage::parse(r#"{"kind":"update","data":{"analyze":"yes"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }
}
