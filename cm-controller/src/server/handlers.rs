use super::*;

pub(super) async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        elapsed_ms = elapsed_ms,
        "http access"
    );
    response
}

#[derive(Serialize)]
pub(super) struct StatusResponse {
    status: &'static str,
}

pub(super) async fn healthz_handler() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

pub(super) async fn commission_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Commission, PathVars::default(), request).await
}

pub(super) async fn commission_tag_handler(
    State(state): State<ControllerState>,
    Path(tag): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Commission, PathVars::tag(tag), request).await
}

pub(super) async fn decommission_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Decommission, PathVars::default(), request).await
}

pub(super) async fn decommission_tag_handler(
    State(state): State<ControllerState>,
    Path(tag): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Decommission, PathVars::tag(tag), request).await
}

pub(super) async fn update_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Update, PathVars::default(), request).await
}

pub(super) async fn update_tag_handler(
    State(state): State<ControllerState>,
    Path(tag): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Update, PathVars::tag(tag), request).await
}

pub(super) async fn discover_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Discover, PathVars::default(), request).await
}

pub(super) async fn discover_addr_handler(
    State(state): State<ControllerState>,
    Path(addr): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::Discover, PathVars::addr(addr), request).await
}

pub(super) async fn post_globals_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::SetGlobals, PathVars::default(), request).await
}

pub(super) async fn post_config_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::SetConfig, PathVars::default(), request).await
}

pub(super) async fn monitor_event_handler(
    State(state): State<ControllerState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    mutate(&state, MutationRoute::MonitorEvent, PathVars::default(), request).await
}

/// Runs one mutating request through the pipeline. Nothing is enqueued
/// unless the request decoded, validated and translated cleanly.
async fn mutate(
    state: &ControllerState,
    route: MutationRoute,
    vars: PathVars,
    request: Request,
) -> Result<StatusCode, ApiError> {
    match dispatch(state, route, vars, request).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(err) => {
            warn!(
                route = route.as_str(),
                rejected = err.is_rejection(),
                "request failed: {err}"
            );
            Err(err)
        }
    }
}

async fn dispatch(
    state: &ControllerState,
    route: MutationRoute,
    vars: PathVars,
    request: Request,
) -> Result<(), ApiError> {
    let body = to_bytes(request.into_body(), MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|err| ApiError::ReadBody(err.to_string()))?;
    let request = canonicalize(&body, vars)?;
    let validated = validate(route, request)?;
    match translate(route, validated)? {
        Dispatch::Await(event) => {
            state
                .queue
                .submit(event, state.completion_deadline())
                .await
        }
        Dispatch::Notify(event) => state.queue.notify(event).await,
    }
}

pub(super) async fn nodes_handler(
    State(state): State<ControllerState>,
) -> Result<Response, ApiError> {
    let view = state.view();
    json_snapshot(&state, &view.nodes)
}

pub(super) async fn node_handler(
    State(state): State<ControllerState>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let request = read_request(PathVars::tag(tag));
    let name = request.nodes.first().map(String::as_str).unwrap_or_default();
    let view = state.view();
    json_snapshot(&state, view.node(name)?)
}

pub(super) async fn get_globals_handler(
    State(state): State<ControllerState>,
) -> Result<Response, ApiError> {
    let document = state.view().globals_document()?;
    json_snapshot(&state, &document)
}

pub(super) async fn get_config_handler(
    State(state): State<ControllerState>,
) -> Result<Response, ApiError> {
    let view = state.view();
    json_snapshot(&state, &view.config)
}

pub(super) async fn job_handler(
    State(state): State<ControllerState>,
    Path(label): Path<String>,
) -> Result<Response, ApiError> {
    let label = job_label(label)?;
    let view = state.view();
    json_snapshot(&state, &view.job(label)?.snapshot())
}

pub(super) async fn job_log_handler(
    State(state): State<ControllerState>,
    Path(label): Path<String>,
) -> Result<Response, ApiError> {
    let label = job_label(label)?;
    let reader = state.view().job(label)?.log_reader();
    Ok(stream::serve(
        reader,
        state.config.stream_chunk_bytes,
        LOG_CONTENT_TYPE,
    ))
}

fn job_label(raw: String) -> Result<JobLabel, ApiError> {
    let request = read_request(PathVars::job(raw));
    JobLabel::parse(&request.job)
}

/// Encodes `value` and streams it through the same chunked writer as job logs.
fn json_snapshot<T>(state: &ControllerState, value: &T) -> Result<Response, ApiError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)?;
    Ok(stream::serve(
        Cursor::new(body),
        state.config.stream_chunk_bytes,
        JSON_CONTENT_TYPE,
    ))
}
