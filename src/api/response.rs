/// Uniform result envelope returned by every gateway endpoint
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical status carried in the envelope
pub const STATUS_ERROR: u8 = 0;
pub const STATUS_SUCCESS: u8 = 1;
pub const STATUS_DECISION_REQUIRED: u8 = 2;

/// A choice offered to the caller when an upload collides with an existing path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: u8,
    pub label: String,
}

/// `{success, message, data?, detail?, code?, status?, options?, selected?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<DecisionOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<u8>,
}

impl ApiResponse {
    /// Successful response with optional payload
    pub fn success(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            detail: None,
            code: None,
            status: Some(STATUS_SUCCESS),
            options: None,
            selected: None,
        }
    }

    /// Failed response
    pub fn error(message: impl Into<String>, detail: Option<String>, code: Option<u16>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            detail,
            code,
            status: Some(STATUS_ERROR),
            options: None,
            selected: None,
        }
    }

    /// Decision required before anything is mutated
    pub fn decision(message: impl Into<String>, options: Vec<DecisionOption>, data: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Some(data),
            detail: Some("Decision required".to_string()),
            code: Some(409),
            status: Some(STATUS_DECISION_REQUIRED),
            options: Some(options),
            selected: None,
        }
    }

    /// Record the option the caller resubmitted with
    pub fn with_selected(mut self, selected: u8) -> Self {
        self.selected = Some(selected);
        self
    }
}

impl From<GatewayError> for ApiResponse {
    fn from(err: GatewayError) -> Self {
        let code = err.status_code().as_u16();
        let (message, detail) = err.message_and_detail();
        ApiResponse::error(message, detail, Some(code))
    }
}
