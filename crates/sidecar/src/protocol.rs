//! Tagged-JSON control protocol spoken with the sidecar.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Requests sent to the sidecar's RPC surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarRequest {
    StartSession {
        #[serde(rename = "requestId")]
        request_id: String,
        session: String,
        #[serde(rename = "authDir", skip_serializing_if = "Option::is_none")]
        auth_dir: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy: Option<String>,
    },
    StopSession {
        #[serde(rename = "requestId")]
        request_id: String,
        session: String,
    },
    UnpairSession {
        #[serde(rename = "requestId")]
        request_id: String,
        session: String,
    },
    RequestPairCode {
        #[serde(rename = "requestId")]
        request_id: String,
        session: String,
        phone: String,
    },
}

impl SidecarRequest {
    pub fn request_id(&self) -> &str {
        match self {
            Self::StartSession { request_id, .. }
            | Self::StopSession { request_id, .. }
            | Self::UnpairSession { request_id, .. }
            | Self::RequestPairCode { request_id, .. } => request_id,
        }
    }
}

/// Responses read back from the RPC surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarResponse {
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        error: Option<String>,
    },
}
