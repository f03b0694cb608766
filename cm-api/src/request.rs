use serde::{Deserialize, Serialize};

use crate::ClusterConfig;

/// A host as reported by the discovery subsystem.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorNode {
    pub label: String,
    pub serial: String,
    #[serde(rename = "addr")]
    pub mgmt_addr: String,
}

impl MonitorNode {
    pub fn new(
        label: impl Into<String>,
        serial: impl Into<String>,
        mgmt_addr: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            serial: serial.into(),
            mgmt_addr: mgmt_addr.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorEvent {
    pub name: String,
    pub nodes: Vec<MonitorNode>,
}

/// General request body accepted by the control API.
///
/// Every field is optional on the wire. Empty values are left out when the
/// request is serialized so a body only carries what the caller supplied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addrs: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_vars: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_event: Option<MonitorEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ClusterConfig>,
}
