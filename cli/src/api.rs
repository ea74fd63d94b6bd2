use anyhow::{anyhow, bail, Context, Result};
use reqwest::{cookie::Jar, Url};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::{
    types::{
        GenerateResponse, SongRecord, SongScope, TaskStatus, TaskStatusResponse, ToggleResponse,
        Track, TrackId, Visibility,
    },
    watcher::StatusSource,
};

const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(
        base_url: Option<&str>,
        session_cookie: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let url = parse_base_url(base_url.unwrap_or(DEFAULT_BASE_URL))?;

        let jar = Arc::new(Jar::default());
        if let Some(cookie) = session_cookie {
            jar.add_cookie_str(cookie, &url);
        }

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .cookie_provider(jar)
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn health(&self) -> Result<Value> {
        let url = self.base_url.clone();
        let response = self.http.get(url).send().await.context("backend health request failed")?;
        if !response.status().is_success() {
            bail!("backend responded with status {}", response.status());
        }
        response.json().await.context("failed to decode health payload")
    }

    pub async fn submit_generation(&self, prompt: &str) -> Result<String> {
        let url = self.endpoint("generate")?;
        let response = self
            .http
            .post(url)
            .query(&[("q", prompt)])
            .send()
            .await
            .context("generation request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body: Option<GenerateResponse> = response.json().await.ok();
            match body.and_then(|b| b.message) {
                Some(message) => bail!("generation rejected ({status}): {message}"),
                None => bail!("generation rejected with status {status}"),
            }
        }
        let body: GenerateResponse =
            response.json().await.context("failed to decode generation response")?;
        match body.task_id {
            Some(task_id) if !task_id.trim().is_empty() => {
                debug!("backend accepted generation as task {task_id}");
                Ok(task_id)
            }
            _ => bail!("generation response did not include a task id"),
        }
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.id_endpoint(&["task-status"], task_id, None)?;
        let response = self.http.get(url).send().await.context("status request failed")?;
        if !response.status().is_success() {
            bail!("status check responded with {}", response.status());
        }
        let body: TaskStatusResponse =
            response.json().await.context("failed to decode task status")?;
        Ok(TaskStatus::from(body.status))
    }

    pub async fn list_songs(&self, scope: SongScope) -> Result<Vec<Track>> {
        let url = self.endpoint(scope.path())?;
        let response = self.http.get(url).send().await.context("song listing request failed")?;
        if !response.status().is_success() {
            bail!("{} responded with {}", scope.label(), response.status());
        }
        let records: Vec<SongRecord> =
            response.json().await.context("failed to decode song listing")?;
        Ok(records.into_iter().map(|record| record.into_track(scope)).collect())
    }

    pub async fn toggle_visibility(&self, id: &TrackId) -> Result<Visibility> {
        let url = self.id_endpoint(&["api", "songs"], id.as_str(), Some("toggle"))?;
        let response = self.http.put(url).send().await.context("visibility toggle failed")?;
        if !response.status().is_success() {
            bail!("visibility toggle responded with {}", response.status());
        }
        let body: ToggleResponse =
            response.json().await.context("failed to decode visibility toggle")?;
        Ok(Visibility::from_is_public(body.is_public))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).with_context(|| format!("failed to build URL for {path}"))
    }

    // Ids are opaque; each one becomes a single percent-encoded path segment.
    fn id_endpoint(&self, prefix: &[&str], id: &str, suffix: Option<&str>) -> Result<Url> {
        if matches!(id.trim(), "" | "." | "..") {
            bail!("invalid id `{id}`");
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(prefix)
            .push(id)
            .extend(suffix);
        Ok(url)
    }
}

impl StatusSource for Client {
    async fn check_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.task_status(task_id).await
    }
}

// Relative joins only keep the last path segment when it ends in `/`.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).context("invalid backend base URL")?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
