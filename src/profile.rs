//! Session profile and credential types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tunnel protocol spoken by the remote VPN service.
///
/// Only PPTP has seen real-world use so far; the other variants are accepted
/// by the service but unverified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelProtocol {
    Pptp,
    L2tp,
    L2tpIpsecPsk,
    L2tpIpsecRsa,
}

impl fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelProtocol::Pptp => "pptp",
            TunnelProtocol::L2tp => "l2tp",
            TunnelProtocol::L2tpIpsecPsk => "l2tp-ipsec-psk",
            TunnelProtocol::L2tpIpsecRsa => "l2tp-ipsec-rsa",
        };
        f.write_str(s)
    }
}

/// Description of a VPN endpoint.
///
/// Immutable once created; the session controller owns it for the lifetime of
/// one session attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnProfile {
    /// Display name, also the key under which state changes are broadcast.
    pub name: String,
    /// Server hostname or address.
    pub server: String,
    pub protocol: TunnelProtocol,
}

impl VpnProfile {
    pub fn new(name: impl Into<String>, server: impl Into<String>, protocol: TunnelProtocol) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            protocol,
        }
    }
}

/// Credentials for one connect attempt. Passed through to the remote service,
/// never stored.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(TunnelProtocol::Pptp.to_string(), "pptp");
        assert_eq!(TunnelProtocol::L2tpIpsecPsk.to_string(), "l2tp-ipsec-psk");
    }

    #[test]
    fn test_profile_serializes_protocol_kebab_case() {
        let profile = VpnProfile::new("work", "vpn.example.com", TunnelProtocol::L2tpIpsecRsa);
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("\"l2tp-ipsec-rsa\""));

        let back: VpnProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
