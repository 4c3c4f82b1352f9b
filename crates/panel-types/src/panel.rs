//! Panel kinds

use serde::{Deserialize, Serialize};

/// The control panels the sync engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanelKind {
    /// 3X-UI: listener-scoped, session-cookie authenticated
    #[serde(rename = "3X-UI")]
    ThreeXui,
    /// PasarGuard: user-scoped, bearer-token authenticated
    #[serde(rename = "PasarGuard")]
    PasarGuard,
}

impl PanelKind {
    /// Tag written to the `panel_type` field of a snapshot
    pub fn tag(&self) -> &'static str {
        match self {
            PanelKind::ThreeXui => "3X-UI",
            PanelKind::PasarGuard => "PasarGuard",
        }
    }
}

impl std::fmt::Display for PanelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for PanelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "3x-ui" | "3xui" | "xui" => Ok(PanelKind::ThreeXui),
            "pasarguard" | "guard" => Ok(PanelKind::PasarGuard),
            _ => Err(format!("Unknown panel type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tag_parses_back() {
        for kind in [PanelKind::ThreeXui, PanelKind::PasarGuard] {
            assert_eq!(kind.tag().parse::<PanelKind>(), Ok(kind));
        }
        assert!("marzban".parse::<PanelKind>().is_err());
    }
}
