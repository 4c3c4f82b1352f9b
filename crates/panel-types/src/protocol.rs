//! Proxy protocol types shared across crates

use serde::{Deserialize, Serialize};

/// Proxy protocol an account or listener speaks.
///
/// Panels report protocols as free-form strings. The four account protocols
/// the sync engine knows how to rebuild credentials for get their own variant;
/// anything else (wireguard, socks, http, an empty string) is kept verbatim in
/// `Other` so snapshots round-trip without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PanelProtocol {
    /// VMess (Xray / V2Ray)
    Vmess,
    /// VLESS (Xray)
    Vless,
    /// Trojan
    Trojan,
    /// Shadowsocks
    Shadowsocks,
    /// Any other protocol, raw name preserved
    Other(String),
}

impl PanelProtocol {
    /// Protocol keys scanned for credentials inside `proxy_settings`.
    pub const SETTINGS_KEYS: [&'static str; 7] =
        ["vmess", "vless", "trojan", "shadowsocks", "hysteria", "ss", "hy2"];

    /// Credential field names scanned inside each protocol entry.
    pub const CREDENTIAL_FIELDS: [&'static str; 3] = ["id", "uuid", "password"];

    /// Account protocols in the order panels are probed for a primary credential.
    pub const ACCOUNT_PROTOCOLS: [PanelProtocol; 4] = [
        PanelProtocol::Vmess,
        PanelProtocol::Vless,
        PanelProtocol::Trojan,
        PanelProtocol::Shadowsocks,
    ];

    /// Get protocol as the string panels use
    pub fn as_str(&self) -> &str {
        match self {
            PanelProtocol::Vmess => "vmess",
            PanelProtocol::Vless => "vless",
            PanelProtocol::Trojan => "trojan",
            PanelProtocol::Shadowsocks => "shadowsocks",
            PanelProtocol::Other(raw) => raw.as_str(),
        }
    }

    /// Get the display name for this protocol
    pub fn display_name(&self) -> &str {
        match self {
            PanelProtocol::Vmess => "VMess",
            PanelProtocol::Vless => "VLESS",
            PanelProtocol::Trojan => "Trojan",
            PanelProtocol::Shadowsocks => "Shadowsocks",
            PanelProtocol::Other(raw) if raw.is_empty() => "unknown",
            PanelProtocol::Other(raw) => raw.as_str(),
        }
    }

    /// Field that carries the account credential in proxy settings.
    ///
    /// UUID-based protocols use `id`, password-based ones use `password`.
    /// Protocols the engine cannot rebuild have no credential field.
    pub fn credential_field(&self) -> Option<&'static str> {
        match self {
            PanelProtocol::Vmess | PanelProtocol::Vless => Some("id"),
            PanelProtocol::Trojan | PanelProtocol::Shadowsocks => Some("password"),
            PanelProtocol::Other(_) => None,
        }
    }

    /// Check if this is a tunnel-style protocol whose settings carry keys
    /// instead of per-client credentials
    pub fn is_tunnel(&self) -> bool {
        matches!(self, PanelProtocol::Other(raw) if raw.eq_ignore_ascii_case("wireguard"))
    }
}

impl Default for PanelProtocol {
    fn default() -> Self {
        PanelProtocol::Other(String::new())
    }
}

impl From<String> for PanelProtocol {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "vmess" => PanelProtocol::Vmess,
            "vless" => PanelProtocol::Vless,
            "trojan" => PanelProtocol::Trojan,
            "shadowsocks" => PanelProtocol::Shadowsocks,
            _ => PanelProtocol::Other(raw),
        }
    }
}

impl From<&str> for PanelProtocol {
    fn from(raw: &str) -> Self {
        PanelProtocol::from(raw.to_string())
    }
}

impl From<PanelProtocol> for String {
    fn from(protocol: PanelProtocol) -> Self {
        match protocol {
            PanelProtocol::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for PanelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_protocols_parse_case_insensitively() {
        assert_eq!(PanelProtocol::from("VLESS"), PanelProtocol::Vless);
        assert_eq!(PanelProtocol::from(" trojan "), PanelProtocol::Trojan);
    }

    #[test]
    fn unknown_protocol_keeps_raw_name() {
        let json = serde_json::to_string(&PanelProtocol::from("wireguard")).unwrap();
        assert_eq!(json, "\"wireguard\"");

        let parsed: PanelProtocol = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, PanelProtocol::default());
    }

    #[test]
    fn credential_fields() {
        assert_eq!(PanelProtocol::Vmess.credential_field(), Some("id"));
        assert_eq!(PanelProtocol::Shadowsocks.credential_field(), Some("password"));
        assert_eq!(PanelProtocol::from("socks").credential_field(), None);
        assert!(PanelProtocol::from("WireGuard").is_tunnel());
        assert!(!PanelProtocol::Vless.is_tunnel());
    }
}
