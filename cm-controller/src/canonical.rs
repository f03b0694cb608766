//! Maps raw HTTP input onto an [`ApiRequest`].

use api::ApiRequest;

use crate::ApiError;

/// Named path segments captured by the router.
#[derive(Clone, Debug, Default)]
pub struct PathVars {
    pub tag: Option<String>,
    pub addr: Option<String>,
    pub job: Option<String>,
}

impl PathVars {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn addr(addr: impl Into<String>) -> Self {
        Self {
            addr: Some(addr.into()),
            ..Self::default()
        }
    }

    pub fn job(job: impl Into<String>) -> Self {
        Self {
            job: Some(job.into()),
            ..Self::default()
        }
    }
}

/// Builds the request for a mutating route.
///
/// A non-empty body must decode as JSON. Path supplied `tag`/`addr` values are
/// appended after whatever the body listed.
pub fn canonicalize(body: &[u8], vars: PathVars) -> Result<ApiRequest, ApiError> {
    let mut request = if body.is_empty() {
        ApiRequest::default()
    } else {
        serde_json::from_slice::<ApiRequest>(body).map_err(|err| ApiError::Decode(err.to_string()))?
    };

    if let Some(tag) = vars.tag.filter(|tag| !tag.is_empty()) {
        request.nodes.push(tag);
    }
    if let Some(addr) = vars.addr.filter(|addr| !addr.is_empty()) {
        request.addrs.push(addr);
    }
    Ok(request)
}

/// Builds the request for a read route from path segments alone.
pub fn read_request(vars: PathVars) -> ApiRequest {
    ApiRequest {
        nodes: vars
            .tag
            .map(|tag| vec![tag.trim().to_string()])
            .unwrap_or_default(),
        job: vars
            .job
            .map(|job| job.trim().to_string())
            .unwrap_or_default(),
        ..ApiRequest::default()
    }
}
