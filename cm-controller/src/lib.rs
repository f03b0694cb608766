mod canonical;
mod error;
mod event;
mod job;
mod manager;
mod provisioner;
mod queue;
mod server;
pub mod stream;
mod translate;
mod validate;

pub use canonical::{PathVars, canonicalize, read_request};
pub use error::ApiError;
pub use event::ClusterEvent;
pub use job::{Job, JobLogWriter, JobSnapshot, JobStatus, Play};
pub use manager::{
    ApplyError, ClusterManager, ClusterView, MonitorState, NodeRecord, NodeStatus,
    merge_extra_vars, spawn_event_loop,
};
pub use provisioner::{AnsibleProvisioner, DryRunProvisioner, Provisioner};
pub use queue::{
    ApplyResult, Completion, DEFAULT_QUEUE_CAPACITY, EventQueue, EventReceiver, QueuedEvent,
    WaitableEvent, event_queue,
};
pub use server::{
    ControllerConfig, ControllerState, MAX_REQUEST_BODY_BYTES, ProvisionerKind,
    build_controller_app,
};
pub use translate::{Dispatch, MutationRoute, translate};
pub use validate::{JobLabel, MonitorEventKind, ValidatedRequest, sanitize_extra_vars, validate};
