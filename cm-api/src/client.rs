use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    ApiRequest, ClusterConfig, GET_NODES_INFO, GET_POST_CONFIG, GET_POST_GLOBALS, MonitorEvent,
    MonitorNode, POST_MONITOR_EVENT, POST_NODES_COMMISSION, POST_NODES_DECOMMISSION,
    POST_NODES_DISCOVER, POST_NODES_UPDATE, job_log_path, job_path, node_path,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid control-plane url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("control-plane transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("control-plane request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Async client for the cluster manager's control API.
#[derive(Clone, Debug)]
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
}

impl Client {
    /// Accepts either a full url or a bare `host:port`, which is treated as plain http.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_http_client(base_url, reqwest::Client::new())
    }

    pub fn with_http_client(base_url: &str, http: reqwest::Client) -> Result<Self, ClientError> {
        let normalized = normalize_base_url(base_url);
        let base_url = Url::parse(&normalized).map_err(|source| ClientError::Url {
            url: normalized.clone(),
            source,
        })?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn post_nodes_commission(
        &self,
        nodes: &[String],
        extra_vars: &str,
        host_group: &str,
    ) -> Result<(), ClientError> {
        let request = ApiRequest {
            nodes: nodes.to_vec(),
            extra_vars: extra_vars.to_string(),
            host_group: host_group.to_string(),
            ..ApiRequest::default()
        };
        self.post(POST_NODES_COMMISSION, &request).await
    }

    pub async fn post_nodes_decommission(
        &self,
        nodes: &[String],
        extra_vars: &str,
    ) -> Result<(), ClientError> {
        let request = ApiRequest {
            nodes: nodes.to_vec(),
            extra_vars: extra_vars.to_string(),
            ..ApiRequest::default()
        };
        self.post(POST_NODES_DECOMMISSION, &request).await
    }

    pub async fn post_nodes_update(
        &self,
        nodes: &[String],
        extra_vars: &str,
        host_group: &str,
    ) -> Result<(), ClientError> {
        let request = ApiRequest {
            nodes: nodes.to_vec(),
            extra_vars: extra_vars.to_string(),
            host_group: host_group.to_string(),
            ..ApiRequest::default()
        };
        self.post(POST_NODES_UPDATE, &request).await
    }

    pub async fn post_nodes_discover(
        &self,
        addrs: &[String],
        extra_vars: &str,
    ) -> Result<(), ClientError> {
        let request = ApiRequest {
            addrs: addrs.to_vec(),
            extra_vars: extra_vars.to_string(),
            ..ApiRequest::default()
        };
        self.post(POST_NODES_DISCOVER, &request).await
    }

    pub async fn post_globals(&self, extra_vars: &str) -> Result<(), ClientError> {
        let request = ApiRequest {
            extra_vars: extra_vars.to_string(),
            ..ApiRequest::default()
        };
        self.post(GET_POST_GLOBALS, &request).await
    }

    pub async fn post_monitor_event(
        &self,
        name: &str,
        nodes: Vec<MonitorNode>,
    ) -> Result<(), ClientError> {
        let request = ApiRequest {
            monitor_event: Some(MonitorEvent {
                name: name.to_string(),
                nodes,
            }),
            ..ApiRequest::default()
        };
        self.post(POST_MONITOR_EVENT, &request).await
    }

    pub async fn post_config(&self, config: &ClusterConfig) -> Result<(), ClientError> {
        let request = ApiRequest {
            config: Some(config.clone()),
            ..ApiRequest::default()
        };
        self.post(GET_POST_CONFIG, &request).await
    }

    pub async fn get_node(&self, name: &str) -> Result<Vec<u8>, ClientError> {
        self.get(&node_path(name)).await
    }

    pub async fn get_all_nodes(&self) -> Result<Vec<u8>, ClientError> {
        self.get(GET_NODES_INFO).await
    }

    pub async fn get_globals(&self) -> Result<Vec<u8>, ClientError> {
        self.get(GET_POST_GLOBALS).await
    }

    pub async fn get_config(&self) -> Result<Vec<u8>, ClientError> {
        self.get(GET_POST_CONFIG).await
    }

    pub async fn get_job(&self, label: &str) -> Result<Vec<u8>, ClientError> {
        self.get(&job_path(label)).await
    }

    /// Opens the log of the `active` or `last` job. Bytes arrive as the server flushes them.
    pub async fn stream_logs(&self, label: &str) -> Result<LogStream, ClientError> {
        let response = self.send_get(&job_log_path(label)).await?;
        Ok(LogStream { response })
    }

    async fn post(&self, path: &str, request: &ApiRequest) -> Result<(), ClientError> {
        let url = self.endpoint(path)?;
        debug!("control-plane post url={url}");
        let response = self.http.post(url).json(request).send().await?;
        check_status(response).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.send_get(path).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        let url = self.endpoint(path)?;
        debug!("control-plane get url={url}");
        let response = self.http.get(url).send().await?;
        check_status(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url.join(path).map_err(|source| ClientError::Url {
            url: format!("{}{path}", self.base_url),
            source,
        })
    }
}

/// Streamed job log body.
pub struct LogStream {
    response: reqwest::Response,
}

impl LogStream {
    /// Returns the next chunk, or `None` once the server closed the log.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self.response.chunk().await?.map(|chunk| chunk.to_vec()))
    }

    pub async fn read_to_end(mut self) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        format!("{trimmed}/")
    } else {
        format!("http://{trimmed}/")
    }
}
