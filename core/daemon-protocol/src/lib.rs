//! IPC protocol types and validation for smartband-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_ID_LEN: usize = 128;
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    /// One front-end command inside a conversation.
    Command,
    EndConversation,
    /// Device-side publish into the reported document.
    ReportState,
    RegisterDevice,
    GetShadow,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// `command` params. `operation` is routed by the daemon; unknown names are
/// answered with a spoken reply rather than a protocol error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParams {
    pub conversation_id: String,
    pub operation: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationParams {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportParams {
    pub physical_id: String,
    pub recorded_at: String,
    pub reported: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDeviceParams {
    pub user: String,
    pub nickname: String,
    pub physical_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShadowParams {
    pub physical_id: String,
}

impl CommandParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.conversation_id, "conversation_id")?;
        require_text(&self.operation, "operation")?;
        Ok(())
    }
}

impl ConversationParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.conversation_id, "conversation_id")
    }
}

impl ReportParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.physical_id, "physical_id")?;
        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }
        if self.reported.is_empty() {
            return Err(ErrorInfo::new(
                "missing_field",
                "reported must contain at least one field",
            ));
        }
        Ok(())
    }
}

impl RegisterDeviceParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.user, "user")?;
        require_id(&self.nickname, "nickname")?;
        require_id(&self.physical_id, "physical_id")?;
        Ok(())
    }
}

impl ShadowParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.physical_id, "physical_id")
    }
}

pub fn parse_command(params: Value) -> Result<CommandParams, ErrorInfo> {
    let parsed: CommandParams = parse_params(params, "command")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_conversation(params: Value) -> Result<ConversationParams, ErrorInfo> {
    let parsed: ConversationParams = parse_params(params, "conversation")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_report(params: Value) -> Result<ReportParams, ErrorInfo> {
    let parsed: ReportParams = parse_params(params, "report")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_register_device(params: Value) -> Result<RegisterDeviceParams, ErrorInfo> {
    let parsed: RegisterDeviceParams = parse_params(params, "register_device")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_shadow(params: Value) -> Result<ShadowParams, ErrorInfo> {
    let parsed: ShadowParams = parse_params(params, "shadow")?;
    parsed.validate()?;
    Ok(parsed)
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value, label: &str) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid JSON: {}", label, err),
        )
    })
}

fn require_text(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    require_text(value, field)?;
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_id",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}
