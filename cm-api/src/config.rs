use serde::{Deserialize, Serialize};

/// Extra-vars value used when a request carries none.
pub const DEFAULT_VALID_JSON: &str = "{}";

/// Host group targeted when a request does not name one.
pub const DEFAULT_HOST_GROUP: &str = "service-master";
pub const WORKER_HOST_GROUP: &str = "service-worker";

/// Cluster-wide configuration that can be read and replaced over the API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub ansible: AnsibleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnsibleConfig {
    pub playbook_location: String,
    pub user: String,
    pub private_key: String,
    pub default_host_group: String,
    pub commission_playbook: String,
    pub decommission_playbook: String,
    pub update_playbook: String,
    pub discover_playbook: String,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            playbook_location: "/etc/clusterm/playbooks".to_string(),
            user: "cluster-admin".to_string(),
            private_key: "/etc/clusterm/id_rsa".to_string(),
            default_host_group: DEFAULT_HOST_GROUP.to_string(),
            commission_playbook: "site.yml".to_string(),
            decommission_playbook: "cleanup.yml".to_string(),
            update_playbook: "site.yml".to_string(),
            discover_playbook: "serf.yml".to_string(),
        }
    }
}

/// Settings for the discovery subsystem. Stored and served verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub addr: String,
    pub timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7373".to_string(),
            timeout_ms: 10_000,
        }
    }
}
