use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use crate::api::{ControlPlane, Download};
use crate::error::Result;
use crate::model::{
    Agent, AgentStatus, Build, BuildCreated, Labels, NewBuild, NewProject, Project,
    ProjectCreated, StatusFilter,
};
use crate::navigator::MountId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListProjects,
    ProjectBuilds { project_id: u64 },
    GetBuild { id: u64 },
    ListAgents { filter: StatusFilter },
    GetAgent { id: u64 },
    CreateProject(NewProject),
    CreateBuild(NewBuild),
    SetAgentStatus { id: u64, status: AgentStatus },
    SetAgentLabels { id: u64, labels: Labels },
    DeleteAgent { id: u64 },
    DownloadArtifact { id: u64, dest_dir: PathBuf },
}

impl Request {
    pub fn describe(&self) -> String {
        match self {
            Self::ListProjects => "load projects".into(),
            Self::ProjectBuilds { project_id } => format!("load builds of project {project_id}"),
            Self::GetBuild { id } => format!("refresh build {id}"),
            Self::ListAgents { filter } => format!("load agents ({})", filter.label()),
            Self::GetAgent { id } => format!("refresh agent {id}"),
            Self::CreateProject(p) => format!("create project '{}'", p.name),
            Self::CreateBuild(b) => format!("start build of project {}", b.project_id),
            Self::SetAgentStatus { id, status } => format!("set agent {id} {status}"),
            Self::SetAgentLabels { id, .. } => format!("save labels of agent {id}"),
            Self::DeleteAgent { id } => format!("delete agent {id}"),
            Self::DownloadArtifact { id, .. } => format!("download build {id}"),
        }
    }

    /// Blocking; runs on a worker thread.
    pub fn execute(&self, api: &dyn ControlPlane) -> Result<Reply> {
        Ok(match self {
            Self::ListProjects => Reply::Projects(api.list_projects()?),
            Self::ProjectBuilds { project_id } => Reply::Builds(api.project_builds(*project_id)?),
            Self::GetBuild { id } => Reply::Build(api.get_build(*id)?),
            Self::ListAgents { filter } => Reply::Agents(api.list_agents(*filter)?),
            Self::GetAgent { id } => Reply::Agent(api.get_agent(*id)?),
            Self::CreateProject(p) => Reply::ProjectCreated(api.create_project(p)?),
            Self::CreateBuild(b) => Reply::BuildCreated(api.create_build(b)?),
            Self::SetAgentStatus { id, status } => {
                Reply::StatusChanged(api.set_agent_status(*id, status)?)
            }
            Self::SetAgentLabels { id, labels } => {
                Reply::LabelsSaved(api.set_agent_labels(*id, labels)?)
            }
            Self::DeleteAgent { id } => {
                api.delete_agent(*id)?;
                Reply::AgentDeleted { id: *id }
            }
            Self::DownloadArtifact { id, dest_dir } => {
                Reply::Downloaded(api.download_artifact(*id, dest_dir)?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Projects(Vec<Project>),
    Builds(Vec<Build>),
    Build(Build),
    Agents(Vec<Agent>),
    Agent(Agent),
    StatusChanged(Agent),
    LabelsSaved(Agent),
    ProjectCreated(ProjectCreated),
    BuildCreated(BuildCreated),
    AgentDeleted { id: u64 },
    Downloaded(Download),
}

impl Reply {
    /// Whether a status-conditional poller should keep going after this.
    pub fn keeps_polling(&self) -> bool {
        match self {
            Self::Build(b) => b.status.is_in_progress(),
            _ => true,
        }
    }
}

/// Which stream a request belongs to within its mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Live Sync fetches; at most one in flight per mount.
    Sync,
    /// User actions (create, status change, delete, ...).
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub mount: MountId,
    pub lane: Lane,
    pub seq: u64,
}

#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub what: String,
    pub result: Result<Reply>,
}

/// Where requests go. Submitting never blocks; the outcome comes back later
/// as a [`Completion`].
pub trait RequestSink {
    fn submit(&self, ticket: Ticket, request: Request);
}

/// Runs each request on its own worker thread against a shared client and
/// reports back over a channel drained by the UI loop.
pub struct ThreadSink {
    api: Arc<dyn ControlPlane>,
    tx: mpsc::Sender<Completion>,
}

impl ThreadSink {
    pub fn new(api: Arc<dyn ControlPlane>) -> (Self, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        (Self { api, tx }, rx)
    }
}

impl RequestSink for ThreadSink {
    fn submit(&self, ticket: Ticket, request: Request) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let what = request.describe();
        tracing::debug!(mount = ticket.mount.0, lane = ?ticket.lane, seq = ticket.seq, %what, "request submitted");
        let label = what.clone();
        let spawned = thread::Builder::new()
            .name(format!("gip-req-{}", ticket.seq))
            .spawn(move || {
                let started = Instant::now();
                let result = request.execute(api.as_ref());
                let elapsed_ms = started.elapsed().as_millis();
                match &result {
                    Ok(_) => tracing::debug!(%what, elapsed_ms, "request finished"),
                    Err(e) => tracing::info!(%what, elapsed_ms, error = %e, "request failed"),
                }
                // The receiver is gone only when the console is shutting down.
                let _ = tx.send(Completion {
                    ticket,
                    what,
                    result,
                });
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn request worker");
            let _ = self.tx.send(Completion {
                ticket,
                what: label,
                result: Err(crate::error::Error::msg(format!(
                    "failed to spawn request worker: {e}"
                ))),
            });
        }
    }
}
