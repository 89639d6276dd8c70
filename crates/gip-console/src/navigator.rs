//! Which screen is shown, and with which selected entity.
//!
//! The view hierarchy is a tree of depth two:
//!
//! ```text
//! projects ── project-detail ── build-detail
//! agents   ── agent-detail
//! ```
//!
//! `navigate` jumps to a root and clears every selection, `back` pops exactly
//! one level. Each view change mounts a fresh view under a new [`MountId`];
//! anything still in flight for an older mount is stale.

use crate::model::{Agent, Build, Project};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewKind {
    #[default]
    Projects,
    ProjectDetail,
    BuildDetail,
    Agents,
    AgentDetail,
}

impl ViewKind {
    pub fn is_detail(self) -> bool {
        matches!(
            self,
            Self::ProjectDetail | Self::BuildDetail | Self::AgentDetail
        )
    }

    pub fn root(self) -> Root {
        match self {
            Self::Projects | Self::ProjectDetail | Self::BuildDetail => Root::Projects,
            Self::Agents | Self::AgentDetail => Root::Agents,
        }
    }
}

/// Top-level menu entries; the only targets of `navigate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Projects,
    Agents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Projects,
    ProjectDetail { project: Project },
    BuildDetail { project: Project, build: Build },
    Agents,
    AgentDetail { agent: Agent },
}

impl View {
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::Projects => ViewKind::Projects,
            Self::ProjectDetail { .. } => ViewKind::ProjectDetail,
            Self::BuildDetail { .. } => ViewKind::BuildDetail,
            Self::Agents => ViewKind::Agents,
            Self::AgentDetail { .. } => ViewKind::AgentDetail,
        }
    }

    pub fn selected_project(&self) -> Option<&Project> {
        match self {
            Self::ProjectDetail { project } | Self::BuildDetail { project, .. } => Some(project),
            _ => None,
        }
    }

    pub fn selected_build(&self) -> Option<&Build> {
        match self {
            Self::BuildDetail { build, .. } => Some(build),
            _ => None,
        }
    }

    pub fn selected_agent(&self) -> Option<&Agent> {
        match self {
            Self::AgentDetail { agent } => Some(agent),
            _ => None,
        }
    }

    /// Flatten into the nullable-field form.
    pub fn state(&self) -> ViewState {
        ViewState {
            view: self.kind(),
            selected_project: self.selected_project().cloned(),
            selected_build: self.selected_build().cloned(),
            selected_agent: self.selected_agent().cloned(),
        }
    }

    /// Rebuild a view from loose fields. A detail view missing the entity it
    /// needs yields `None` ("nothing to show") instead of a half-built view.
    pub fn from_state(state: ViewState) -> Option<Self> {
        let ViewState {
            view,
            selected_project,
            selected_build,
            selected_agent,
        } = state;
        match view {
            ViewKind::Projects => Some(Self::Projects),
            ViewKind::Agents => Some(Self::Agents),
            ViewKind::ProjectDetail => Some(Self::ProjectDetail {
                project: selected_project?,
            }),
            ViewKind::BuildDetail => Some(Self::BuildDetail {
                project: selected_project?,
                build: selected_build?,
            }),
            ViewKind::AgentDetail => Some(Self::AgentDetail {
                agent: selected_agent?,
            }),
        }
    }
}

/// Loose snapshot of the navigation state, as a flat record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub view: ViewKind,
    pub selected_project: Option<Project>,
    pub selected_build: Option<Build>,
    pub selected_agent: Option<Agent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavEvent {
    SelectProject(Project),
    SelectBuild(Build),
    SelectAgent(Agent),
    Back,
    Navigate(Root),
}

impl NavEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::SelectProject(_) => "select-project",
            Self::SelectBuild(_) => "select-build",
            Self::SelectAgent(_) => "select-agent",
            Self::Back => "back",
            Self::Navigate(_) => "navigate",
        }
    }
}

/// Identity of one mounted view instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MountId(pub u64);

/// Returned when an event replaced the mounted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remount {
    pub unmounted: MountId,
    pub mounted: MountId,
    pub from: ViewKind,
    pub to: ViewKind,
}

#[derive(Debug)]
pub struct Navigator {
    view: View,
    mount: MountId,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            view: View::Projects,
            mount: MountId(1),
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn kind(&self) -> ViewKind {
        self.view.kind()
    }

    pub fn state(&self) -> ViewState {
        self.view.state()
    }

    pub fn mount_id(&self) -> MountId {
        self.mount
    }

    /// Apply one event. Events that make no sense from the current view are
    /// dropped and `None` is returned; the current mount stays alive.
    pub fn apply(&mut self, event: NavEvent) -> Option<Remount> {
        let name = event.name();
        let next = match (&self.view, event) {
            (View::Projects, NavEvent::SelectProject(project)) => View::ProjectDetail { project },
            (View::ProjectDetail { project }, NavEvent::SelectBuild(build)) => View::BuildDetail {
                project: project.clone(),
                build,
            },
            (View::Agents, NavEvent::SelectAgent(agent)) => View::AgentDetail { agent },
            (View::ProjectDetail { .. }, NavEvent::Back) => View::Projects,
            (View::BuildDetail { project, .. }, NavEvent::Back) => View::ProjectDetail {
                project: project.clone(),
            },
            (View::AgentDetail { .. }, NavEvent::Back) => View::Agents,
            (_, NavEvent::Navigate(Root::Projects)) => View::Projects,
            (_, NavEvent::Navigate(Root::Agents)) => View::Agents,
            (current, _) => {
                tracing::debug!(event = name, view = ?current.kind(), "navigation event ignored");
                return None;
            }
        };
        Some(self.mount_view(next, name))
    }

    fn mount_view(&mut self, next: View, cause: &'static str) -> Remount {
        let unmounted = self.mount;
        let from = self.view.kind();
        self.mount = MountId(self.mount.0.saturating_add(1));
        self.view = next;
        let remount = Remount {
            unmounted,
            mounted: self.mount,
            from,
            to: self.view.kind(),
        };
        tracing::debug!(
            cause,
            from = ?remount.from,
            to = ?remount.to,
            mount = remount.mounted.0,
            "view mounted"
        );
        remount
    }
}
