use api::ApiRequest;

use crate::{ApiError, ClusterEvent, MonitorEventKind, ValidatedRequest};

/// Identity of a mutating control API route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationRoute {
    Commission,
    Decommission,
    Update,
    Discover,
    SetGlobals,
    SetConfig,
    MonitorEvent,
}

impl MutationRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationRoute::Commission => "node-commission",
            MutationRoute::Decommission => "node-decommission",
            MutationRoute::Update => "node-update",
            MutationRoute::Discover => "node-discover",
            MutationRoute::SetGlobals => "globals-set",
            MutationRoute::SetConfig => "config-set",
            MutationRoute::MonitorEvent => "monitor-event",
        }
    }
}

/// How an event enters the queue.
///
/// `Await` events carry a completion channel back to the caller. `Notify`
/// events are monitor notifications nobody waits on; they still take their
/// place in the same total order.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    Await(ClusterEvent),
    Notify(ClusterEvent),
}

impl Dispatch {
    pub fn event(&self) -> &ClusterEvent {
        match self {
            Dispatch::Await(event) | Dispatch::Notify(event) => event,
        }
    }
}

pub fn translate(route: MutationRoute, validated: ValidatedRequest) -> Result<Dispatch, ApiError> {
    let ValidatedRequest {
        request,
        monitor_kind,
    } = validated;
    let ApiRequest {
        nodes,
        addrs,
        host_group,
        extra_vars,
        monitor_event,
        config,
        ..
    } = request;

    let dispatch = match route {
        MutationRoute::Commission => Dispatch::Await(ClusterEvent::Commission {
            nodes,
            extra_vars,
            host_group,
        }),
        MutationRoute::Decommission => {
            Dispatch::Await(ClusterEvent::Decommission { nodes, extra_vars })
        }
        MutationRoute::Update => Dispatch::Await(ClusterEvent::Update {
            nodes,
            extra_vars,
            host_group,
        }),
        MutationRoute::Discover => Dispatch::Await(ClusterEvent::Discover { addrs, extra_vars }),
        MutationRoute::SetGlobals => Dispatch::Await(ClusterEvent::SetGlobals { extra_vars }),
        MutationRoute::SetConfig => {
            let config = config.ok_or(ApiError::NilConfig)?;
            Dispatch::Await(ClusterEvent::SetConfig { config })
        }
        MutationRoute::MonitorEvent => {
            let (name, nodes) = monitor_event
                .map(|event| (event.name, event.nodes))
                .unwrap_or_default();
            match monitor_kind {
                Some(MonitorEventKind::Discovered) => {
                    Dispatch::Notify(ClusterEvent::NodeDiscovered { nodes })
                }
                Some(MonitorEventKind::Disappeared) => {
                    Dispatch::Notify(ClusterEvent::NodeDisappeared { nodes })
                }
                None => return Err(ApiError::InvalidEventName(name)),
            }
        }
    };
    Ok(dispatch)
}
