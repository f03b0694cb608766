use std::{env, fs, net::SocketAddr};

use api::ClusterConfig;
use cm_controller::{
    ControllerConfig, ControllerState, DEFAULT_QUEUE_CAPACITY, ProvisionerKind,
    build_controller_app, stream::DEFAULT_STREAM_CHUNK_BYTES,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{}", binary_version_text());
        return Ok(());
    }

    init_logging();
    info!("{}", binary_version_text());

    let addr = parse_addr("CLUSTERM_ADDR", "0.0.0.0:9007")?;
    let config = ControllerConfig {
        queue_capacity: parse_usize("CLUSTERM_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
        stream_chunk_bytes: parse_usize("CLUSTERM_STREAM_CHUNK_BYTES", DEFAULT_STREAM_CHUNK_BYTES)?,
        completion_timeout_ms: parse_optional_u64("CLUSTERM_COMPLETION_TIMEOUT_MS")?,
        cluster: load_cluster_config("CLUSTERM_CONFIG_PATH")?,
        provisioner: env::var("CLUSTERM_PROVISIONER")
            .unwrap_or_default()
            .parse::<ProvisionerKind>()?,
    };

    let state = ControllerState::new(config);
    let app = build_controller_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("clusterm listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_logging() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(value.parse()?)
}

fn parse_usize(key: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_optional_u64(key: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().parse()?)),
        _ => Ok(None),
    }
}

fn load_cluster_config(key: &str) -> Result<ClusterConfig, Box<dyn std::error::Error>> {
    let Ok(path) = env::var(key) else {
        return Ok(ClusterConfig::default());
    };
    let path = path.trim();
    if path.is_empty() {
        return Ok(ClusterConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read cluster config {path}: {err}"))?;
    let config = serde_json::from_str(&raw)
        .map_err(|err| format!("failed to parse cluster config {path}: {err}"))?;
    info!(path, "loaded cluster config");
    Ok(config)
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
}

fn binary_version_text() -> String {
    let binary = env!("CARGO_PKG_NAME");
    let git_tag = option_env!("CM_BUILD_GIT_TAG").unwrap_or(env!("CARGO_PKG_VERSION"));
    let git_commit = option_env!("CM_BUILD_GIT_COMMIT").unwrap_or("unknown");
    let git_dirty = option_env!("CM_BUILD_GIT_DIRTY").unwrap_or("false");
    let dirty = matches!(git_dirty, "true" | "1" | "yes" | "dirty");

    if dirty {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag} ({git_commit})")
    }
}
