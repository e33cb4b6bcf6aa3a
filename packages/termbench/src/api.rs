//! REST client for the workbench server.

use anyhow::Context;
use bench_core::{SessionId, WorkbenchId};
use futures::future::BoxFuture;
use serde::Deserialize;
use session_transport::{FileBridge, PastedImage};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::models::{NewSession, Session, SessionPatch, WorkbenchInfo};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Everything the workbench controller needs from the server.
pub trait SessionBackend: Send + Sync {
    fn list_sessions(&self, workbench: Option<&WorkbenchId>) -> BoxFuture<'static, ApiResult<Vec<Session>>>;
    fn create_session(&self, req: NewSession) -> BoxFuture<'static, ApiResult<Session>>;
    fn update_session(&self, id: &SessionId, patch: SessionPatch) -> BoxFuture<'static, ApiResult<Session>>;
    fn delete_session(&self, id: &SessionId) -> BoxFuture<'static, ApiResult<()>>;

    fn list_workbenches(&self) -> BoxFuture<'static, ApiResult<Vec<WorkbenchInfo>>>;
    fn create_workbench(&self, name: &str) -> BoxFuture<'static, ApiResult<WorkbenchInfo>>;
    fn update_workbench(&self, id: &WorkbenchId, name: &str, color: &str) -> BoxFuture<'static, ApiResult<()>>;
    fn delete_workbench(&self, id: &WorkbenchId) -> BoxFuture<'static, ApiResult<()>>;
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct PathResponse {
    path: PathBuf,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/terminal{}", self.base_url, path)
    }
}

/// Turn a non-2xx response into [`ApiError::Status`] with the body text.
async fn check(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn json<T: serde::de::DeserializeOwned>(req: reqwest::RequestBuilder) -> ApiResult<T> {
    let resp = req.send().await.map_err(ApiError::from_reqwest)?;
    let resp = check(resp).await?;
    resp.json().await.map_err(ApiError::from_reqwest)
}

async fn empty(req: reqwest::RequestBuilder) -> ApiResult<()> {
    let resp = req.send().await.map_err(ApiError::from_reqwest)?;
    check(resp).await.map(|_| ())
}

impl SessionBackend for ApiClient {
    fn list_sessions(&self, workbench: Option<&WorkbenchId>) -> BoxFuture<'static, ApiResult<Vec<Session>>> {
        let mut req = self.client.get(self.url("/sessions"));
        if let Some(wb) = workbench {
            req = req.query(&[("workbench_id", wb.as_str())]);
        }
        Box::pin(json::<Vec<Session>>(req))
    }

    fn create_session(&self, body: NewSession) -> BoxFuture<'static, ApiResult<Session>> {
        let req = self.client.post(self.url("/sessions")).json(&body);
        Box::pin(async move {
            let session: Session = json(req).await?;
            debug!(session = %session.id, "created session");
            Ok(session)
        })
    }

    fn update_session(&self, id: &SessionId, patch: SessionPatch) -> BoxFuture<'static, ApiResult<Session>> {
        let req = self.client.put(self.url(&format!("/sessions/{id}"))).json(&patch);
        Box::pin(json::<Session>(req))
    }

    fn delete_session(&self, id: &SessionId) -> BoxFuture<'static, ApiResult<()>> {
        let req = self.client.delete(self.url(&format!("/sessions/{id}")));
        Box::pin(empty(req))
    }

    fn list_workbenches(&self) -> BoxFuture<'static, ApiResult<Vec<WorkbenchInfo>>> {
        Box::pin(json::<Vec<WorkbenchInfo>>(self.client.get(self.url("/workbenches"))))
    }

    fn create_workbench(&self, name: &str) -> BoxFuture<'static, ApiResult<WorkbenchInfo>> {
        let req = self
            .client
            .post(self.url("/workbenches"))
            .json(&serde_json::json!({ "name": name }));
        Box::pin(json::<WorkbenchInfo>(req))
    }

    fn update_workbench(&self, id: &WorkbenchId, name: &str, color: &str) -> BoxFuture<'static, ApiResult<()>> {
        let req = self
            .client
            .put(self.url(&format!("/workbenches/{id}")))
            .json(&serde_json::json!({ "name": name, "color": color }));
        Box::pin(empty(req))
    }

    fn delete_workbench(&self, id: &WorkbenchId) -> BoxFuture<'static, ApiResult<()>> {
        let req = self.client.delete(self.url(&format!("/workbenches/{id}")));
        Box::pin(empty(req))
    }
}

impl FileBridge for ApiClient {
    fn resolve_path(&self, name: &str, is_dir: bool) -> BoxFuture<'static, anyhow::Result<PathBuf>> {
        let req = self
            .client
            .post(self.url("/resolve-path"))
            .json(&serde_json::json!({ "name": name, "is_dir": is_dir }));
        let name = name.to_string();
        Box::pin(async move {
            let resp: PathResponse = json(req)
                .await
                .with_context(|| format!("Failed to resolve path for {name}"))?;
            Ok(resp.path)
        })
    }

    fn upload(&self, image: PastedImage) -> BoxFuture<'static, anyhow::Result<PathBuf>> {
        let url = self.url("/upload");
        let client = self.client.clone();
        Box::pin(async move {
            let filename = image.filename.clone();
            let part = reqwest::multipart::Part::bytes(image.bytes)
                .file_name(image.filename)
                .mime_str(&image.mime)
                .with_context(|| format!("Invalid mime type for {filename}"))?;
            let form = reqwest::multipart::Form::new().part("file", part);
            let resp: PathResponse = json(client.post(url).multipart(form))
                .await
                .with_context(|| format!("Failed to upload {filename}"))?;
            Ok(resp.path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_under_terminal_api() {
        let api = ApiClient::new("http://localhost:7070/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "http://localhost:7070");
        assert_eq!(
            api.url("/sessions/abc"),
            "http://localhost:7070/api/v1/terminal/sessions/abc"
        );
    }

    #[tokio::test]
    async fn connection_refused_maps_to_unavailable() {
        let api = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = api.list_workbenches().await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable), "got {err:?}");
    }
}
