//! Operator-facing storage report

use serde::Serialize;

use super::tier::TierKind;

/// Which tier is active and how much it holds
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDiagnostics {
    /// Name of the primary tier, or "none"
    #[serde(rename = "type")]
    pub kind: String,
    pub persistent: bool,
    /// Platform quota in bytes; native platforms report none
    pub quota: Option<u64>,
    pub usage: Option<u64>,
    pub is_mobile_device: bool,
    /// Running under a host that owns file storage
    pub is_standalone_app: bool,
    pub tiers: Vec<TierStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub kind: TierKind,
    pub available: bool,
    pub usage: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_names() {
        let diag = StorageDiagnostics {
            kind: "sqlite".into(),
            persistent: true,
            quota: None,
            usage: Some(4096),
            is_mobile_device: false,
            is_standalone_app: false,
            tiers: vec![TierStatus {
                kind: TierKind::KeyValue,
                available: true,
                usage: None,
            }],
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["type"], "sqlite");
        assert_eq!(json["isMobileDevice"], false);
        assert_eq!(json["isStandaloneApp"], false);
        assert_eq!(json["tiers"][0]["kind"], "key-value");
    }
}
