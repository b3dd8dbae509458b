//! Connection state mirror and failure codes
//!
//! The authoritative connection state lives in the remote VPN service. This
//! module only defines the local mirror of it, as carried by state-change
//! notifications.

use std::fmt;
use std::str::FromStr;

/// Connection state as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VpnState {
    /// No session. Initial and terminal state.
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl VpnState {
    /// Wire token used in state-change notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            VpnState::Idle => "idle",
            VpnState::Connecting => "connecting",
            VpnState::Connected => "connected",
            VpnState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown connection state: {}", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for VpnState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(VpnState::Idle),
            "connecting" => Ok(VpnState::Connecting),
            "connected" => Ok(VpnState::Connected),
            "disconnecting" => Ok(VpnState::Disconnecting),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Failure cause attached to a state transition.
///
/// Numeric codes follow the service's error numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthFailed,
    ConnectionFailed,
    Unreachable,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::AuthFailed => 51,
            ErrorCode::ConnectionFailed => 101,
            ErrorCode::Unreachable => 102,
        }
    }

    /// Map a wire code back to a known cause. Codes outside the known set
    /// yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            51 => Some(ErrorCode::AuthFailed),
            101 => Some(ErrorCode::ConnectionFailed),
            102 => Some(ErrorCode::Unreachable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::AuthFailed => "authentication failed",
            ErrorCode::ConnectionFailed => "connection failed",
            ErrorCode::Unreachable => "server unreachable",
        };
        f.write_str(s)
    }
}

/// A validated state-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub profile_name: String,
    pub state: VpnState,
    pub error: Option<ErrorCode>,
}
