//! Tunnel helper info endpoint response.

use serde::{Deserialize, Serialize};

/// Body of `GET /api/v1.0/info` on the tunnel helper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: TunnelData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelData {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub local_proxy_port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub tunnel_name: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub version: String,
}

impl TunnelInfo {
    /// The tunnel identifier, if the helper reports a usable tunnel.
    pub fn identifier(&self) -> Option<String> {
        if self.status == "FAILED" || self.data.id <= 0 {
            None
        } else {
            Some(self.data.id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_requires_positive_id() {
        let info: TunnelInfo = serde_json::from_str(
            r#"{"status":"SUCCESS","data":{"id":4211,"localProxyPort":"9090","tunnelName":"host-a"}}"#,
        )
        .unwrap();
        assert_eq!(info.identifier(), Some("4211".to_string()));
        assert_eq!(info.data.local_proxy_port, "9090");

        let starting: TunnelInfo = serde_json::from_str(r#"{"status":"SUCCESS","data":{"id":0}}"#).unwrap();
        assert_eq!(starting.identifier(), None);
    }

    #[test]
    fn test_failed_status_has_no_identifier() {
        let info: TunnelInfo =
            serde_json::from_str(r#"{"status":"FAILED","data":{"id":17}}"#).unwrap();
        assert_eq!(info.identifier(), None);
    }
}
