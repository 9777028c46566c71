//! Caller-visible connection status.
//!
//! Every transition is reported as a [`Status`] triple from a fixed
//! vocabulary. The coarse [`ConnectionStatus`] is derived from it and is
//! informational only: it never decides whether a call may be attempted.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    Blue,
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusText {
    #[serde(rename = "connecting")]
    Connecting,
    #[serde(rename = "authenticating")]
    Authenticating,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "unauthenticated")]
    Unauthenticated,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "invalidated")]
    Invalidated,
    #[serde(rename = "invalid config")]
    InvalidConfig,
}

impl StatusText {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StatusText::Connecting => "connecting",
            StatusText::Authenticating => "authenticating",
            StatusText::Connected => "connected",
            StatusText::Ready => "ready",
            StatusText::Unauthenticated => "unauthenticated",
            StatusText::Error => "error",
            StatusText::Disconnected => "disconnected",
            StatusText::Inactive => "inactive",
            StatusText::Invalidated => "invalidated",
            StatusText::InvalidConfig => "invalid config",
        }
    }

    #[must_use]
    pub fn fill(self) -> Fill {
        match self {
            StatusText::Connecting | StatusText::Authenticating => Fill::Blue,
            StatusText::Connected | StatusText::Ready => Fill::Green,
            StatusText::Unauthenticated
            | StatusText::Error
            | StatusText::Disconnected
            | StatusText::Inactive
            | StatusText::Invalidated
            | StatusText::InvalidConfig => Fill::Red,
        }
    }

    #[must_use]
    pub fn connection_status(self) -> ConnectionStatus {
        match self {
            StatusText::Connecting => ConnectionStatus::Connecting,
            StatusText::Authenticating => ConnectionStatus::Authenticating,
            StatusText::Connected | StatusText::Unauthenticated | StatusText::Invalidated => {
                ConnectionStatus::Connected
            }
            StatusText::Ready => ConnectionStatus::Ready,
            StatusText::Error | StatusText::InvalidConfig => ConnectionStatus::Error,
            StatusText::Disconnected => ConnectionStatus::Disconnected,
            StatusText::Inactive => ConnectionStatus::Inactive,
        }
    }
}

impl std::fmt::Display for StatusText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status report delivered to attached callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub fill: Fill,
    pub shape: Shape,
    pub text: StatusText,
}

impl From<StatusText> for Status {
    fn from(text: StatusText) -> Self {
        Self {
            fill: text.fill(),
            shape: Shape::Dot,
            text,
        }
    }
}

/// Coarse connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Transport open, not (yet) authenticated
    Connected,
    Authenticating,
    Ready,
    Error,
    Inactive,
}
