//! Descriptive metadata about the attached target.

use serde::{Deserialize, Serialize};

/// Target description as reported by `Target.getTargetInfo`.
///
/// Diagnostics only; nothing in the session's behavior depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_get_target_info_payload() {
        let json = r#"{"targetId": "E1A2", "type": "page", "title": "Example", "url": "https://example.com/", "attached": true, "canAccessOpener": false}"#;
        let info: TargetInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.target_id, "E1A2");
        assert_eq!(info.target_type, "page");
        assert!(info.attached);
    }
}
