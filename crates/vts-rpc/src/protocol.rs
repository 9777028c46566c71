//! VTube Studio public API message types.
//!
//! Every frame on the socket is a JSON object tagged with the API family name.
//! Requests carry a caller-chosen `requestID` which the peer echoes back in
//! the matching response.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

/// `messageType` used by the peer for every error response.
pub const API_ERROR: &str = "APIError";

/// The API is switched off in the application.
pub const API_NOT_ACTIVE: i32 = 1;
/// The session token was revoked by the user.
pub const INVALID_TOKEN: i32 = 8;

pub const API_STATE_REQUEST: &str = "APIStateRequest";
pub const AUTHENTICATION_REQUEST: &str = "AuthenticationRequest";
pub const AUTHENTICATION_TOKEN_REQUEST: &str = "AuthenticationTokenRequest";

/// Opaque per-call identifier echoed back by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

/// Outbound request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "apiName")]
    pub api_name: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(rename = "requestID")]
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RequestEnvelope {
    #[must_use]
    pub fn new(message_type: impl Into<String>, request_id: RequestId, data: Option<Value>) -> Self {
        Self {
            api_name: API_NAME.to_string(),
            api_version: API_VERSION.to_string(),
            message_type: message_type.into(),
            request_id,
            data,
        }
    }
}

/// Inbound response (or event) frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "apiName")]
    pub api_name: String,
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(rename = "requestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub data: Value,
}

impl ResponseEnvelope {
    /// Build a success response for `request_id`.
    #[must_use]
    pub fn success(message_type: impl Into<String>, request_id: RequestId, data: Value) -> Self {
        Self {
            api_name: API_NAME.to_string(),
            api_version: Some(API_VERSION.to_string()),
            timestamp: None,
            message_type: message_type.into(),
            request_id: Some(request_id),
            data,
        }
    }

    /// Build an error response carrying `code` and `message`.
    #[must_use]
    pub fn error(request_id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        let payload = ApiErrorPayload {
            error_id: code,
            message: message.into(),
        };
        Self {
            api_name: API_NAME.to_string(),
            api_version: Some(API_VERSION.to_string()),
            timestamp: None,
            message_type: API_ERROR.to_string(),
            request_id,
            data: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    #[must_use]
    pub fn is_api_family(&self) -> bool {
        self.api_name == API_NAME
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.message_type == API_ERROR
    }

    /// Decode the error payload of an `APIError` frame.
    ///
    /// Returns `None` for non-error frames.
    #[must_use]
    pub fn error_payload(&self) -> Option<Result<ApiErrorPayload, serde_json::Error>> {
        self.is_error()
            .then(|| ApiErrorPayload::deserialize(&self.data))
    }

    /// Deserialize `data` into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns the serde error when `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// `data` of an `APIError` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorPayload {
    #[serde(rename = "errorID")]
    pub error_id: i32,
    pub message: String,
}

/// Plugin identity sent with both authentication requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationParams {
    pub plugin_name: String,
    pub plugin_developer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiStateData {
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationTokenData {
    #[serde(default)]
    pub authentication_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationData {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
