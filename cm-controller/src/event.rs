use api::{ClusterConfig, MonitorNode};

/// The closed set of cluster mutations.
///
/// Built once per request by the translator and moved into the event queue;
/// only the consumer ever looks at it afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterEvent {
    Commission {
        nodes: Vec<String>,
        extra_vars: String,
        host_group: String,
    },
    Decommission {
        nodes: Vec<String>,
        extra_vars: String,
    },
    Update {
        nodes: Vec<String>,
        extra_vars: String,
        host_group: String,
    },
    Discover {
        addrs: Vec<String>,
        extra_vars: String,
    },
    SetGlobals {
        extra_vars: String,
    },
    SetConfig {
        config: ClusterConfig,
    },
    NodeDiscovered {
        nodes: Vec<MonitorNode>,
    },
    NodeDisappeared {
        nodes: Vec<MonitorNode>,
    },
}

impl ClusterEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::Commission { .. } => "commission",
            ClusterEvent::Decommission { .. } => "decommission",
            ClusterEvent::Update { .. } => "update",
            ClusterEvent::Discover { .. } => "discover",
            ClusterEvent::SetGlobals { .. } => "set_globals",
            ClusterEvent::SetConfig { .. } => "set_config",
            ClusterEvent::NodeDiscovered { .. } => "node_discovered",
            ClusterEvent::NodeDisappeared { .. } => "node_disappeared",
        }
    }
}
