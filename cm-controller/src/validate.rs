use api::{
    ApiRequest, DEFAULT_VALID_JSON, JOB_LABEL_ACTIVE, JOB_LABEL_LAST, MONITOR_EVENT_DISAPPEARED,
    MONITOR_EVENT_DISCOVERED,
};
use serde_json::{Map, Value};
use tracing::error;

use crate::{ApiError, MutationRoute};

/// Normalizes an extra-vars blob.
///
/// Blank input becomes [`DEFAULT_VALID_JSON`]; anything else has to be a JSON
/// object and is returned unchanged.
pub fn sanitize_extra_vars(prefix: &str, raw: &str) -> Result<String, ApiError> {
    if raw.trim().is_empty() {
        return Ok(DEFAULT_VALID_JSON.to_string());
    }

    if let Err(source) = serde_json::from_str::<Map<String, Value>>(raw) {
        error!("failed to parse json: '{raw}'. Error: {source}");
        return Err(ApiError::InvalidJson {
            field: prefix.to_string(),
            source,
        });
    }
    Ok(raw.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobLabel {
    Active,
    Last,
}

impl JobLabel {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            JOB_LABEL_ACTIVE => Ok(JobLabel::Active),
            JOB_LABEL_LAST => Ok(JobLabel::Last),
            other => Err(ApiError::InvalidJobLabel(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobLabel::Active => JOB_LABEL_ACTIVE,
            JobLabel::Last => JOB_LABEL_LAST,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorEventKind {
    Discovered,
    Disappeared,
}

impl MonitorEventKind {
    /// Case-insensitive.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        if raw.eq_ignore_ascii_case(MONITOR_EVENT_DISCOVERED) {
            Ok(MonitorEventKind::Discovered)
        } else if raw.eq_ignore_ascii_case(MONITOR_EVENT_DISAPPEARED) {
            Ok(MonitorEventKind::Disappeared)
        } else {
            Err(ApiError::InvalidEventName(raw.to_string()))
        }
    }
}

/// A request that passed every field check for its route.
#[derive(Clone, Debug)]
pub struct ValidatedRequest {
    pub(crate) request: ApiRequest,
    pub(crate) monitor_kind: Option<MonitorEventKind>,
}

impl ValidatedRequest {
    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn monitor_kind(&self) -> Option<MonitorEventKind> {
        self.monitor_kind
    }
}

pub fn validate(route: MutationRoute, mut request: ApiRequest) -> Result<ValidatedRequest, ApiError> {
    request.extra_vars = sanitize_extra_vars("extra_vars", &request.extra_vars)?;

    let monitor_kind = match route {
        MutationRoute::MonitorEvent => {
            let name = request
                .monitor_event
                .as_ref()
                .map(|event| event.name.as_str())
                .unwrap_or_default();
            Some(MonitorEventKind::parse(name)?)
        }
        _ => None,
    };

    Ok(ValidatedRequest {
        request,
        monitor_kind,
    })
}
