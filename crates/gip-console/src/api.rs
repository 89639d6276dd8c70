//! Control plane REST surface.
//!
//! Every endpoint family is served under one normalized prefix
//! (`{base_url}{api_prefix}/api/...`). Any non-2xx reply is a failure; the
//! `{error: ...}` body is carried into the message when present.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::config::ConsoleConfig;
use crate::error::{Error, Result};
use crate::model::{
    Agent, AgentList, AgentStatus, Build, BuildCreated, ErrorBody, Labels, LabelsUpdate,
    NewBuild, NewProject, Project, ProjectCreated, ProjectList, StatusFilter, StatusUpdate,
};

/// Operations the console needs from the backend.
pub trait ControlPlane: Send + Sync {
    fn list_projects(&self) -> Result<Vec<Project>>;
    fn create_project(&self, project: &NewProject) -> Result<ProjectCreated>;
    fn project_builds(&self, project_id: u64) -> Result<Vec<Build>>;
    fn create_build(&self, build: &NewBuild) -> Result<BuildCreated>;
    fn get_build(&self, id: u64) -> Result<Build>;
    fn download_artifact(&self, id: u64, dest_dir: &Path) -> Result<Download>;
    fn list_agents(&self, filter: StatusFilter) -> Result<Vec<Agent>>;
    fn get_agent(&self, id: u64) -> Result<Agent>;
    fn set_agent_status(&self, id: u64, status: &AgentStatus) -> Result<Agent>;
    fn set_agent_labels(&self, id: u64, labels: &Labels) -> Result<Agent>;
    fn delete_agent(&self, id: u64) -> Result<()>;
}

/// A build artifact written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: String,
}

impl Endpoints {
    pub fn new(base_url: &str, api_prefix: &str) -> Self {
        let base = base_url.trim().trim_end_matches('/');
        let prefix = normalize_prefix(api_prefix);
        Self {
            root: format!("{base}{prefix}/api"),
        }
    }

    pub fn projects(&self) -> String {
        format!("{}/projects", self.root)
    }

    pub fn project_builds(&self, project_id: u64) -> String {
        format!("{}/builds/project/{project_id}", self.root)
    }

    pub fn builds(&self) -> String {
        format!("{}/builds/", self.root)
    }

    pub fn build(&self, id: u64) -> String {
        format!("{}/builds/{id}", self.root)
    }

    pub fn build_download(&self, id: u64) -> String {
        format!("{}/builds/{id}/download", self.root)
    }

    pub fn agents(&self) -> String {
        format!("{}/agents", self.root)
    }

    pub fn agent(&self, id: u64) -> String {
        format!("{}/agents/{id}", self.root)
    }

    pub fn agent_status(&self, id: u64) -> String {
        format!("{}/agents/{id}/status", self.root)
    }

    pub fn agent_labels(&self, id: u64) -> String {
        format!("{}/agents/{id}/labels", self.root)
    }
}

/// `"v1/"` -> `"/v1"`, `"/"` -> `""`.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

pub struct HttpControlPlane {
    client: Client,
    endpoints: Endpoints,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, api_prefix: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoints: Endpoints::new(base_url, api_prefix),
        })
    }

    pub fn from_config(cfg: &ConsoleConfig) -> Result<Self> {
        Self::new(&cfg.base_url, &cfg.api_prefix, cfg.request_timeout())
    }

    fn send(&self, what: &str, req: RequestBuilder) -> Result<Response> {
        let res = req
            .send()
            .map_err(|e| Error::network(format!("{what} failed: {e}")))?;
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error);
        tracing::warn!(what, status, detail = detail.as_deref(), "control plane refused request");
        Err(Error::server(status, detail.as_deref()))
    }

    fn json<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> Result<T> {
        let res = self.send(what, req)?;
        res.json::<T>()
            .map_err(|e| Error::msg(format!("{what}: invalid response body: {e}")))
    }
}

impl ControlPlane for HttpControlPlane {
    fn list_projects(&self) -> Result<Vec<Project>> {
        let list: ProjectList =
            self.json("list projects", self.client.get(self.endpoints.projects()))?;
        Ok(list.projects)
    }

    fn create_project(&self, project: &NewProject) -> Result<ProjectCreated> {
        self.json(
            "create project",
            self.client.post(self.endpoints.projects()).json(project),
        )
    }

    fn project_builds(&self, project_id: u64) -> Result<Vec<Build>> {
        // An empty history comes back as `null`.
        let builds: Option<Vec<Build>> = self.json(
            "list builds",
            self.client.get(self.endpoints.project_builds(project_id)),
        )?;
        Ok(builds.unwrap_or_default())
    }

    fn create_build(&self, build: &NewBuild) -> Result<BuildCreated> {
        self.json(
            "trigger build",
            self.client.post(self.endpoints.builds()).json(build),
        )
    }

    fn get_build(&self, id: u64) -> Result<Build> {
        self.json("fetch build", self.client.get(self.endpoints.build(id)))
    }

    fn download_artifact(&self, id: u64, dest_dir: &Path) -> Result<Download> {
        let res = self.send(
            "download artifact",
            self.client.get(self.endpoints.build_download(id)),
        )?;
        let name = res
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| format!("build-{id}"));
        write_artifact(res, dest_dir, &name)
    }

    fn list_agents(&self, filter: StatusFilter) -> Result<Vec<Agent>> {
        let url = match filter.query_value() {
            Some(status) => format!("{}?status={status}", self.endpoints.agents()),
            None => self.endpoints.agents(),
        };
        let list: AgentList = self.json("list agents", self.client.get(url))?;
        Ok(list.agents)
    }

    fn get_agent(&self, id: u64) -> Result<Agent> {
        self.json("fetch agent", self.client.get(self.endpoints.agent(id)))
    }

    fn set_agent_status(&self, id: u64, status: &AgentStatus) -> Result<Agent> {
        self.json(
            "set agent status",
            self.client
                .put(self.endpoints.agent_status(id))
                .json(&StatusUpdate {
                    status: status.as_str(),
                }),
        )
    }

    fn set_agent_labels(&self, id: u64, labels: &Labels) -> Result<Agent> {
        self.json(
            "set agent labels",
            self.client
                .put(self.endpoints.agent_labels(id))
                .json(&LabelsUpdate { labels }),
        )
    }

    fn delete_agent(&self, id: u64) -> Result<()> {
        self.send("delete agent", self.client.delete(self.endpoints.agent(id)))?;
        Ok(())
    }
}

fn disposition_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)filename\s*=\s*"?([^";]+)"?"#).ok())
        .as_ref()
}

/// File name from a `Content-Disposition` header, reduced to its last path
/// component.
pub fn attachment_filename(header: &str) -> Option<String> {
    let caps = disposition_re()?.captures(header)?;
    let raw = caps.get(1)?.as_str().trim();
    let name = Path::new(raw).file_name()?.to_str()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn write_artifact(mut body: impl Read, dest_dir: &Path, name: &str) -> Result<Download> {
    fs::create_dir_all(dest_dir).map_err(|e| {
        Error::msg(format!(
            "failed to create download dir {}: {e}",
            dest_dir.display()
        ))
    })?;
    // Stage next to the target so the final rename stays on one filesystem.
    let mut tmp = tempfile::NamedTempFile::new_in(dest_dir)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = body
            .read(&mut buf)
            .map_err(|e| Error::network(format!("download interrupted: {e}")))?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        hasher.update(chunk);
        tmp.write_all(chunk)?;
        total = total.saturating_add(n as u64);
    }
    tmp.flush()?;
    let path = dest_dir.join(name);
    tmp.persist(&path)
        .map_err(|e| Error::msg(format!("failed to save {}: {}", path.display(), e.error)))?;
    Ok(Download {
        path,
        bytes: total,
        sha256: hex::encode(hasher.finalize()),
    })
}
