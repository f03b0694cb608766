//! Relative paths of the control API, shared by the router and the client.

pub const POST_NODES_COMMISSION: &str = "nodes/commission";
pub const POST_NODES_DECOMMISSION: &str = "nodes/decommission";
pub const POST_NODES_UPDATE: &str = "nodes/update";
pub const POST_NODES_DISCOVER: &str = "nodes/discover";
pub const POST_MONITOR_EVENT: &str = "monitor-event";
pub const GET_POST_GLOBALS: &str = "globals";
pub const GET_POST_CONFIG: &str = "config";
pub const GET_NODES_INFO: &str = "nodes";
pub const GET_NODE_INFO_PREFIX: &str = "nodes";
pub const GET_JOB_PREFIX: &str = "jobs";
pub const GET_JOB_LOG_SUFFIX: &str = "log";

pub const JOB_LABEL_ACTIVE: &str = "active";
pub const JOB_LABEL_LAST: &str = "last";

pub const MONITOR_EVENT_DISCOVERED: &str = "discovered";
pub const MONITOR_EVENT_DISAPPEARED: &str = "disappeared";

pub fn node_path(name: &str) -> String {
    format!("{GET_NODE_INFO_PREFIX}/{name}")
}

pub fn job_path(label: &str) -> String {
    format!("{GET_JOB_PREFIX}/{label}")
}

pub fn job_log_path(label: &str) -> String {
    format!("{GET_JOB_PREFIX}/{label}/{GET_JOB_LOG_SUFFIX}")
}
