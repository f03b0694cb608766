mod client;
mod config;
mod request;
mod routes;

pub use client::{Client, ClientError, LogStream};
pub use config::{
    AnsibleConfig, ClusterConfig, DEFAULT_HOST_GROUP, DEFAULT_VALID_JSON, MonitorConfig,
    WORKER_HOST_GROUP,
};
pub use request::{ApiRequest, MonitorEvent, MonitorNode};
pub use routes::{
    GET_JOB_LOG_SUFFIX, GET_JOB_PREFIX, GET_NODE_INFO_PREFIX, GET_NODES_INFO, GET_POST_CONFIG,
    GET_POST_GLOBALS, JOB_LABEL_ACTIVE, JOB_LABEL_LAST, MONITOR_EVENT_DISAPPEARED,
    MONITOR_EVENT_DISCOVERED, POST_MONITOR_EVENT, POST_NODES_COMMISSION, POST_NODES_DECOMMISSION,
    POST_NODES_DISCOVER, POST_NODES_UPDATE, job_log_path, job_path, node_path,
};
