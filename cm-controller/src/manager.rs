//! The single consumer of the event queue and sole owner of cluster state.

use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use api::{AnsibleConfig, ClusterConfig, DEFAULT_VALID_JSON, MonitorNode, WORKER_HOST_GROUP};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    ApiError, ClusterEvent, EventReceiver, Job, JobLabel, JobStatus, Play, Provisioner,
    QueuedEvent, WaitableEvent, job::now_unix_ms, queue::ApplyResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unallocated,
    Provisioning,
    Allocated,
    Decommissioning,
    Maintenance,
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeStatus::Unallocated => "unallocated",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Allocated => "allocated",
            NodeStatus::Decommissioning => "decommissioning",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Discovered,
    Disappeared,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub name: String,
    pub serial: String,
    pub mgmt_addr: String,
    pub status: NodeStatus,
    pub monitor_state: MonitorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_group: Option<String>,
    pub updated_unix_ms: u64,
}

impl NodeRecord {
    fn discovered(node: &MonitorNode, now: u64) -> Self {
        Self {
            name: node.label.clone(),
            serial: node.serial.clone(),
            mgmt_addr: node.mgmt_addr.clone(),
            status: NodeStatus::Unallocated,
            monitor_state: MonitorState::Discovered,
            host_group: None,
            updated_unix_ms: now,
        }
    }

    /// Address the provisioner should reach the node at.
    fn host(&self) -> String {
        if self.mgmt_addr.is_empty() {
            self.name.clone()
        } else {
            self.mgmt_addr.clone()
        }
    }
}

/// Failures raised while applying an event. Reported to waiting callers as text.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("there is already an active job, please retry when it finishes")]
    ActiveJob,
    #[error("at least one node should be specified")]
    NoNodes,
    #[error("at least one address should be specified")]
    NoAddrs,
    #[error("node with name {0:?} doesn't exist")]
    UnknownNode(String),
    #[error("node {name:?} is {status}, expected {expected}")]
    WrongState {
        name: String,
        status: NodeStatus,
        expected: &'static str,
    },
    #[error(
        "invalid host group {0:?}, expected \"service-master\" or \"service-worker\""
    )]
    InvalidHostGroup(String),
    #[error("invalid extra vars: {0}")]
    ExtraVars(String),
}

/// Immutable picture of cluster state as of the last applied event.
#[derive(Clone, Debug)]
pub struct ClusterView {
    pub nodes: BTreeMap<String, NodeRecord>,
    pub globals: String,
    pub config: ClusterConfig,
    pub active_job: Option<Arc<Job>>,
    pub last_job: Option<Arc<Job>>,
}

impl ClusterView {
    pub fn node(&self, name: &str) -> Result<&NodeRecord, ApiError> {
        self.nodes
            .get(name)
            .ok_or_else(|| ApiError::NodeNotFound(name.to_string()))
    }

    pub fn job(&self, label: JobLabel) -> Result<&Arc<Job>, ApiError> {
        let slot = match label {
            JobLabel::Active => self.active_job.as_ref(),
            JobLabel::Last => self.last_job.as_ref(),
        };
        slot.ok_or_else(|| ApiError::JobNotExist(label.as_str().to_string()))
    }

    /// Globals in their served shape, `{"extra_vars": {...}}`.
    pub fn globals_document(&self) -> Result<Value, ApiError> {
        let extra_vars: Map<String, Value> = serde_json::from_str(&self.globals)?;
        let mut document = Map::new();
        document.insert("extra_vars".to_string(), Value::Object(extra_vars));
        Ok(Value::Object(document))
    }
}

#[derive(Clone, Debug)]
enum JobTarget {
    Commission { host_group: String },
    Decommission,
    Update { host_group: String },
    Discover,
}

impl JobTarget {
    fn desc(&self) -> &'static str {
        match self {
            JobTarget::Commission { .. } => "commission",
            JobTarget::Decommission => "decommission",
            JobTarget::Update { .. } => "update",
            JobTarget::Discover => "discover",
        }
    }

    fn playbook<'a>(&self, ansible: &'a AnsibleConfig) -> &'a str {
        match self {
            JobTarget::Commission { .. } => &ansible.commission_playbook,
            JobTarget::Decommission => &ansible.decommission_playbook,
            JobTarget::Update { .. } => &ansible.update_playbook,
            JobTarget::Discover => &ansible.discover_playbook,
        }
    }

    fn host_group(&self) -> &str {
        match self {
            JobTarget::Commission { host_group } | JobTarget::Update { host_group } => host_group,
            JobTarget::Decommission | JobTarget::Discover => "",
        }
    }

    /// States a node may be in for the job to start, and how to describe them.
    fn admits(&self) -> (&'static [NodeStatus], &'static str) {
        match self {
            JobTarget::Commission { .. } => (
                &[NodeStatus::Unallocated, NodeStatus::Failed],
                "unallocated or failed",
            ),
            JobTarget::Decommission => (&[NodeStatus::Allocated, NodeStatus::Failed], "allocated or failed"),
            JobTarget::Update { .. } => (&[NodeStatus::Allocated], "allocated"),
            JobTarget::Discover => (&[], ""),
        }
    }

    fn interim(&self) -> NodeStatus {
        match self {
            JobTarget::Commission { .. } => NodeStatus::Provisioning,
            JobTarget::Decommission => NodeStatus::Decommissioning,
            JobTarget::Update { .. } | JobTarget::Discover => NodeStatus::Maintenance,
        }
    }

    fn settled(&self, succeeded: bool) -> NodeStatus {
        match (self, succeeded) {
            (_, false) => NodeStatus::Failed,
            (JobTarget::Decommission, true) => NodeStatus::Unallocated,
            (_, true) => NodeStatus::Allocated,
        }
    }
}

struct ActiveJob {
    job: Arc<Job>,
    target: JobTarget,
    nodes: Vec<String>,
}

pub struct ClusterManager {
    nodes: BTreeMap<String, NodeRecord>,
    globals: String,
    config: ClusterConfig,
    active: Option<ActiveJob>,
    last_job: Option<Arc<Job>>,
    provisioner: Arc<dyn Provisioner>,
    jobs_done: mpsc::UnboundedSender<String>,
}

impl ClusterManager {
    /// `jobs_done` receives the id of every job this manager starts, once it finishes.
    pub fn new(
        config: ClusterConfig,
        provisioner: Arc<dyn Provisioner>,
        jobs_done: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            nodes: BTreeMap::new(),
            globals: DEFAULT_VALID_JSON.to_string(),
            config,
            active: None,
            last_job: None,
            provisioner,
            jobs_done,
        }
    }

    /// Applies one dequeued item. A waitable event is handed back with its
    /// result so the caller can publish the new state before releasing the waiter.
    pub fn apply_queued(&mut self, queued: QueuedEvent) -> Option<(WaitableEvent, ApplyResult)> {
        match queued {
            QueuedEvent::Waitable(waitable) => {
                let result = self
                    .apply(waitable.event())
                    .map_err(|err| err.to_string());
                Some((waitable, result))
            }
            QueuedEvent::Notify(event) => {
                // monitor notifications are best effort; apply() already logged any failure
                let _ = self.apply(&event);
                None
            }
        }
    }

    pub fn apply(&mut self, event: &ClusterEvent) -> Result<(), ApplyError> {
        let result = match event {
            ClusterEvent::Commission {
                nodes,
                extra_vars,
                host_group,
            } => {
                let host_group = self.resolve_host_group(host_group)?;
                self.start_node_job(JobTarget::Commission { host_group }, nodes, extra_vars)
            }
            ClusterEvent::Decommission { nodes, extra_vars } => {
                self.start_node_job(JobTarget::Decommission, nodes, extra_vars)
            }
            ClusterEvent::Update {
                nodes,
                extra_vars,
                host_group,
            } => {
                let host_group = self.resolve_host_group(host_group)?;
                self.start_node_job(JobTarget::Update { host_group }, nodes, extra_vars)
            }
            ClusterEvent::Discover { addrs, extra_vars } => self.start_discovery(addrs, extra_vars),
            ClusterEvent::SetGlobals { extra_vars } => {
                self.globals = extra_vars.clone();
                Ok(())
            }
            ClusterEvent::SetConfig { config } => {
                self.config = config.clone();
                Ok(())
            }
            ClusterEvent::NodeDiscovered { nodes } => {
                self.record_discovered(nodes);
                Ok(())
            }
            ClusterEvent::NodeDisappeared { nodes } => {
                self.record_disappeared(nodes);
                Ok(())
            }
        };
        match &result {
            Ok(()) => info!(event = event.kind(), "event applied"),
            Err(err) => warn!(event = event.kind(), "event failed: {err}"),
        }
        result
    }

    /// Settles the nodes touched by a finished job and moves it to the `last` slot.
    pub fn job_finished(&mut self, job_id: &str) {
        let Some(active) = self.active.take_if(|active| active.job.id() == job_id) else {
            warn!(job_id, "finished job is not the active job");
            return;
        };

        let succeeded = active.job.status() == JobStatus::Complete;
        let settled = active.target.settled(succeeded);
        let now = now_unix_ms();
        for name in &active.nodes {
            let Some(record) = self.nodes.get_mut(name) else {
                continue;
            };
            record.status = settled;
            record.updated_unix_ms = now;
            if succeeded {
                record.host_group = match &active.target {
                    JobTarget::Decommission => None,
                    target => Some(target.host_group().to_string()),
                };
            }
        }
        info!(
            job_id,
            desc = active.target.desc(),
            succeeded,
            nodes = active.nodes.len(),
            "job settled"
        );
        self.last_job = Some(active.job);
    }

    pub fn view(&self) -> ClusterView {
        ClusterView {
            nodes: self.nodes.clone(),
            globals: self.globals.clone(),
            config: self.config.clone(),
            active_job: self.active.as_ref().map(|active| Arc::clone(&active.job)),
            last_job: self.last_job.clone(),
        }
    }

    fn resolve_host_group(&self, requested: &str) -> Result<String, ApplyError> {
        let requested = requested.trim();
        let group = if requested.is_empty() {
            self.config.ansible.default_host_group.trim()
        } else {
            requested
        };
        if group == api::DEFAULT_HOST_GROUP || group == WORKER_HOST_GROUP {
            Ok(group.to_string())
        } else {
            Err(ApplyError::InvalidHostGroup(group.to_string()))
        }
    }

    fn ensure_idle(&self) -> Result<(), ApplyError> {
        match &self.active {
            Some(_) => Err(ApplyError::ActiveJob),
            None => Ok(()),
        }
    }

    fn start_node_job(
        &mut self,
        target: JobTarget,
        nodes: &[String],
        extra_vars: &str,
    ) -> Result<(), ApplyError> {
        self.ensure_idle()?;
        if nodes.is_empty() {
            return Err(ApplyError::NoNodes);
        }

        let (admitted, expected) = target.admits();
        let mut hosts = Vec::with_capacity(nodes.len());
        for name in nodes {
            let record = self
                .nodes
                .get(name)
                .ok_or_else(|| ApplyError::UnknownNode(name.clone()))?;
            if !admitted.contains(&record.status) {
                return Err(ApplyError::WrongState {
                    name: name.clone(),
                    status: record.status,
                    expected,
                });
            }
            hosts.push(record.host());
        }

        let play = self.play(&target, hosts, extra_vars)?;
        let interim = target.interim();
        let now = now_unix_ms();
        for name in nodes {
            if let Some(record) = self.nodes.get_mut(name) {
                record.status = interim;
                record.updated_unix_ms = now;
            }
        }
        self.launch(target, nodes.to_vec(), play);
        Ok(())
    }

    fn start_discovery(&mut self, addrs: &[String], extra_vars: &str) -> Result<(), ApplyError> {
        self.ensure_idle()?;
        if addrs.is_empty() {
            return Err(ApplyError::NoAddrs);
        }
        let target = JobTarget::Discover;
        let play = self.play(&target, addrs.to_vec(), extra_vars)?;
        self.launch(target, Vec::new(), play);
        Ok(())
    }

    fn play(
        &self,
        target: &JobTarget,
        hosts: Vec<String>,
        extra_vars: &str,
    ) -> Result<Play, ApplyError> {
        let ansible = &self.config.ansible;
        let playbook = Path::new(&ansible.playbook_location).join(target.playbook(ansible));
        Ok(Play {
            playbook: playbook.to_string_lossy().into_owned(),
            hosts,
            host_group: target.host_group().to_string(),
            user: ansible.user.clone(),
            private_key: ansible.private_key.clone(),
            extra_vars: merge_extra_vars(&self.globals, extra_vars)?,
        })
    }

    fn launch(&mut self, target: JobTarget, nodes: Vec<String>, play: Play) {
        let job = Job::new(target.desc(), play);
        info!(
            job_id = job.id(),
            desc = target.desc(),
            hosts = job.play().hosts.len(),
            "starting job"
        );
        job.start(Arc::clone(&self.provisioner), self.jobs_done.clone());
        self.active = Some(ActiveJob { job, target, nodes });
    }

    fn record_discovered(&mut self, nodes: &[MonitorNode]) {
        let now = now_unix_ms();
        for node in nodes {
            if node.label.is_empty() {
                warn!(serial = %node.serial, "ignoring discovered node without a label");
                continue;
            }
            self.nodes
                .entry(node.label.clone())
                .and_modify(|record| {
                    record.serial = node.serial.clone();
                    record.mgmt_addr = node.mgmt_addr.clone();
                    record.monitor_state = MonitorState::Discovered;
                    record.updated_unix_ms = now;
                })
                .or_insert_with(|| NodeRecord::discovered(node, now));
        }
    }

    fn record_disappeared(&mut self, nodes: &[MonitorNode]) {
        let now = now_unix_ms();
        for node in nodes {
            match self.nodes.get_mut(&node.label) {
                Some(record) => {
                    record.monitor_state = MonitorState::Disappeared;
                    record.updated_unix_ms = now;
                }
                None => warn!(node = %node.label, "disappeared event for unknown node"),
            }
        }
    }
}

/// Overlays request extra vars on the globals; request keys win.
pub fn merge_extra_vars(globals: &str, overrides: &str) -> Result<String, ApplyError> {
    let mut merged = parse_object(globals)?;
    merged.extend(parse_object(overrides)?);
    Ok(Value::Object(merged).to_string())
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ApplyError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw).map_err(|err| ApplyError::ExtraVars(err.to_string()))
}

/// Runs a [`ClusterManager`] on its own task, draining `receiver` in order.
///
/// Returns the channel the latest [`ClusterView`] is published on. A new view
/// is published after every applied item and before the matching waiter is
/// released, so a caller that saw success reads its own write.
pub fn spawn_event_loop(
    config: ClusterConfig,
    provisioner: Arc<dyn Provisioner>,
    mut receiver: EventReceiver,
) -> (watch::Receiver<Arc<ClusterView>>, JoinHandle<()>) {
    let (jobs_done, mut finished_jobs) = mpsc::unbounded_channel();
    let mut manager = ClusterManager::new(config, provisioner, jobs_done);
    let (views, view_rx) = watch::channel(Arc::new(manager.view()));

    let handle = tokio::spawn(async move {
        info!("cluster event consumer started");
        loop {
            tokio::select! {
                queued = receiver.recv() => {
                    let Some(queued) = queued else {
                        break;
                    };
                    let pending = manager.apply_queued(queued);
                    views.send_replace(Arc::new(manager.view()));
                    if let Some((waitable, result)) = pending {
                        waitable.complete(result);
                    }
                }
                Some(job_id) = finished_jobs.recv() => {
                    manager.job_finished(&job_id);
                    views.send_replace(Arc::new(manager.view()));
                }
            }
        }
        info!("cluster event consumer stopped");
    });
    (view_rx, handle)
}
