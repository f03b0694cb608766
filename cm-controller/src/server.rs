use std::{
    io::Cursor,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use api::ClusterConfig;
use axum::{
    Json, Router,
    body::to_bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    AnsibleProvisioner, ApiError, ClusterView, DEFAULT_QUEUE_CAPACITY, Dispatch,
    DryRunProvisioner, EventQueue, JobLabel, MutationRoute, PathVars, Provisioner, canonicalize,
    event_queue, read_request, spawn_event_loop,
    stream::{self, DEFAULT_STREAM_CHUNK_BYTES, JSON_CONTENT_TYPE, LOG_CONTENT_TYPE},
    translate, validate,
};

mod handlers;

use handlers::*;

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Which [`Provisioner`] jobs run through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProvisionerKind {
    #[default]
    DryRun,
    Ansible,
}

impl ProvisionerKind {
    fn build(self) -> Arc<dyn Provisioner> {
        match self {
            ProvisionerKind::DryRun => Arc::new(DryRunProvisioner),
            ProvisionerKind::Ansible => Arc::new(AnsibleProvisioner::default()),
        }
    }
}

impl FromStr for ProvisionerKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "dry-run" | "dryrun" => Ok(ProvisionerKind::DryRun),
            "ansible" => Ok(ProvisionerKind::Ansible),
            other => Err(format!(
                "unknown provisioner {other:?}, expected \"ansible\" or \"dry-run\""
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub queue_capacity: usize,
    pub stream_chunk_bytes: usize,
    /// `None` waits for the consumer without bound.
    pub completion_timeout_ms: Option<u64>,
    pub cluster: ClusterConfig,
    pub provisioner: ProvisionerKind,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            completion_timeout_ms: None,
            cluster: ClusterConfig::default(),
            provisioner: ProvisionerKind::default(),
        }
    }
}

/// Handler state: the producer side of the event queue plus the latest
/// published view. Cloning is cheap.
#[derive(Clone)]
pub struct ControllerState {
    queue: EventQueue,
    views: watch::Receiver<Arc<ClusterView>>,
    config: ControllerConfig,
}

impl ControllerState {
    /// Starts the event consumer. Must be called from within a tokio runtime.
    pub fn new(config: ControllerConfig) -> Self {
        let provisioner = config.provisioner.build();
        Self::with_provisioner(config, provisioner)
    }

    pub fn with_provisioner(config: ControllerConfig, provisioner: Arc<dyn Provisioner>) -> Self {
        let (queue, receiver) = event_queue(config.queue_capacity);
        // The consumer exits on its own once every queue handle is dropped.
        let (views, _consumer) = spawn_event_loop(config.cluster.clone(), provisioner, receiver);
        info!(
            queue_capacity = config.queue_capacity,
            provisioner = ?config.provisioner,
            "controller state initialized"
        );
        Self {
            queue,
            views,
            config,
        }
    }

    pub fn view(&self) -> Arc<ClusterView> {
        Arc::clone(&self.views.borrow())
    }

    fn completion_deadline(&self) -> Option<Duration> {
        self.config.completion_timeout_ms.map(Duration::from_millis)
    }
}

pub fn build_controller_app(state: ControllerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/nodes", get(nodes_handler))
        .route("/nodes/{tag}", get(node_handler))
        .route("/nodes/commission", post(commission_handler))
        .route("/nodes/commission/{tag}", post(commission_tag_handler))
        .route("/nodes/decommission", post(decommission_handler))
        .route("/nodes/decommission/{tag}", post(decommission_tag_handler))
        .route("/nodes/update", post(update_handler))
        .route("/nodes/update/{tag}", post(update_tag_handler))
        .route("/nodes/discover", post(discover_handler))
        .route("/nodes/discover/{addr}", post(discover_addr_handler))
        .route(
            "/globals",
            get(get_globals_handler).post(post_globals_handler),
        )
        .route("/config", get(get_config_handler).post(post_config_handler))
        .route("/monitor-event", post(monitor_event_handler))
        .route("/jobs/{label}", get(job_handler))
        .route("/jobs/{label}/log", get(job_log_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}
