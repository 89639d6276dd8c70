use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;

use crate::api::HttpControlPlane;
use crate::banner::BannerSlot;
use crate::config::ConsoleConfig;
use crate::dispatch::{Completion, Lane, Reply, Request, RequestSink, ThreadSink, Ticket};
use crate::error::{Error, Result};
use crate::forms::{Form, Submission};
use crate::labels::LabelDraft;
use crate::model::{Agent, AgentStatus, Build, BuildStatus, Project, StatusFilter};
use crate::navigator::{NavEvent, Navigator, Root, View};
use crate::sync::{Cadence, LiveSync};

mod draw;

struct ProjectsScreen {
    sync: LiveSync,
    projects: Vec<Project>,
    list: ListState,
    loaded: bool,
}

struct ProjectScreen {
    project: Project,
    sync: LiveSync,
    builds: Vec<Build>,
    list: ListState,
    loaded: bool,
}

struct BuildScreen {
    project: Project,
    build: Build,
    sync: LiveSync,
    log_scroll: u16,
}

struct AgentsScreen {
    sync: LiveSync,
    filter: StatusFilter,
    agents: Vec<Agent>,
    list: ListState,
    loaded: bool,
}

struct AgentScreen {
    agent: Agent,
    sync: LiveSync,
    /// Open label editor. Polling keeps refreshing `agent` underneath it.
    draft: Option<LabelDraft>,
}

/// State owned by the mounted view; replaced wholesale on every remount.
enum Screen {
    Projects(ProjectsScreen),
    Project(ProjectScreen),
    Build(BuildScreen),
    Agents(AgentsScreen),
    Agent(AgentScreen),
}

impl Screen {
    fn sync_mut(&mut self) -> &mut LiveSync {
        match self {
            Self::Projects(s) => &mut s.sync,
            Self::Project(s) => &mut s.sync,
            Self::Build(s) => &mut s.sync,
            Self::Agents(s) => &mut s.sync,
            Self::Agent(s) => &mut s.sync,
        }
    }

    fn sync(&self) -> &LiveSync {
        match self {
            Self::Projects(s) => &s.sync,
            Self::Project(s) => &s.sync,
            Self::Build(s) => &s.sync,
            Self::Agents(s) => &s.sync,
            Self::Agent(s) => &s.sync,
        }
    }
}

enum InputMode {
    Normal,
    Form(Form),
    ConfirmDelete { agent_id: u64, name: String },
}

pub(crate) struct App {
    cfg: ConsoleConfig,
    sink: Box<dyn RequestSink>,
    completions: Option<Receiver<Completion>>,
    nav: Navigator,
    screen: Screen,
    banner: BannerSlot,
    input: InputMode,
    action_seq: u64,
}

fn list_state(len: usize) -> ListState {
    let mut st = ListState::default();
    if len > 0 {
        st.select(Some(0));
    }
    st
}

fn clamp_selection(list: &mut ListState, len: usize) {
    match (list.selected(), len) {
        (_, 0) => list.select(None),
        (None, _) => list.select(Some(0)),
        (Some(i), n) if i >= n => list.select(Some(n - 1)),
        _ => {}
    }
}

fn move_selection(list: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        list.select(None);
        return;
    }
    let cur = list.selected().unwrap_or(0) as isize;
    let next = (cur + delta).clamp(0, len as isize - 1);
    list.select(Some(next as usize));
}

impl App {
    pub(crate) fn new(
        cfg: ConsoleConfig,
        sink: Box<dyn RequestSink>,
        completions: Option<Receiver<Completion>>,
        now: Instant,
    ) -> Self {
        let nav = Navigator::new();
        let banner = BannerSlot::new(cfg.banner_ttl());
        let screen = mount_screen(&nav, &cfg, sink.as_ref(), now);
        Self {
            cfg,
            sink,
            completions,
            nav,
            screen,
            banner,
            input: InputMode::Normal,
            action_seq: 0,
        }
    }

    fn go(&mut self, event: NavEvent, now: Instant) {
        if self.nav.apply(event).is_none() {
            return;
        }
        self.screen.sync_mut().unmount();
        self.input = InputMode::Normal;
        self.screen = mount_screen(&self.nav, &self.cfg, self.sink.as_ref(), now);
    }

    fn refresh(&mut self, now: Instant) {
        if !self.screen.sync_mut().refresh(self.sink.as_ref()) {
            self.banner.info("Refresh already in progress", now);
        }
    }

    fn submit_action(&mut self, request: Request, now: Instant) {
        self.action_seq = self.action_seq.saturating_add(1);
        let ticket = Ticket {
            mount: self.nav.mount_id(),
            lane: Lane::Action,
            seq: self.action_seq,
        };
        self.banner.info(format!("Working: {}", request.describe()), now);
        self.sink.submit(ticket, request);
    }

    fn submit_form(&mut self, now: Instant) {
        let InputMode::Form(form) = &self.input else {
            return;
        };
        match form.submit() {
            Ok(submission) => {
                self.input = InputMode::Normal;
                let request = match submission {
                    Submission::CreateProject(p) => Request::CreateProject(p),
                    Submission::CreateBuild(b) => Request::CreateBuild(b),
                    Submission::Download { build_id } => Request::DownloadArtifact {
                        id: build_id,
                        dest_dir: self.cfg.download_dir.clone(),
                    },
                };
                self.submit_action(request, now);
            }
            Err(e) => self.banner.failure("submit", &e, now),
        }
    }

    /// Pull finished requests, fire due timers and age the banner.
    pub(crate) fn tick(&mut self, now: Instant) {
        let finished: Vec<Completion> = match &self.completions {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        for done in finished {
            self.on_completion(done, now);
        }
        self.screen.sync_mut().poll(now, self.sink.as_ref());
        self.banner.expire(now);
    }

    pub(crate) fn on_completion(&mut self, done: Completion, now: Instant) {
        let Completion {
            ticket,
            what,
            result,
        } = done;
        let current = ticket.mount == self.nav.mount_id();
        match ticket.lane {
            Lane::Sync => {
                if !current {
                    tracing::trace!(mount = ticket.mount.0, seq = ticket.seq, %what, "late sync result dropped");
                    return;
                }
                let sync = self.screen.sync_mut();
                let applies = sync.resolve(ticket.seq, &result, now);
                // Issue a reload or filter change queued behind this fetch.
                sync.poll(now, self.sink.as_ref());
                if !applies {
                    tracing::trace!(mount = ticket.mount.0, seq = ticket.seq, %what, "stale sync result dropped");
                    return;
                }
                match result {
                    Ok(reply) => self.apply_sync(reply),
                    Err(e) => self.banner.failure(&what, &e, now),
                }
            }
            Lane::Action => match result {
                Ok(reply) => self.apply_action(reply, current, now),
                Err(e) => self.banner.failure(&what, &e, now),
            },
        }
    }

    fn apply_sync(&mut self, reply: Reply) {
        match (&mut self.screen, reply) {
            (Screen::Projects(s), Reply::Projects(projects)) => {
                s.projects = projects;
                s.loaded = true;
                clamp_selection(&mut s.list, s.projects.len());
            }
            (Screen::Project(s), Reply::Builds(builds)) => {
                s.builds = builds;
                s.loaded = true;
                clamp_selection(&mut s.list, s.builds.len());
            }
            (Screen::Build(s), Reply::Build(build)) => s.build = build,
            (Screen::Agents(s), Reply::Agents(agents)) => {
                s.agents = agents;
                s.loaded = true;
                clamp_selection(&mut s.list, s.agents.len());
            }
            (Screen::Agent(s), Reply::Agent(agent)) => s.agent = agent,
            (_, other) => tracing::warn!(reply = ?other, "sync reply does not fit the mounted view"),
        }
    }

    /// Banners are posted regardless; view state only changes while the
    /// originating view is still mounted.
    fn apply_action(&mut self, reply: Reply, current: bool, now: Instant) {
        match reply {
            Reply::ProjectCreated(created) => {
                self.banner
                    .success(format!("Project created (id {})", created.id), now);
                if current && matches!(self.screen, Screen::Projects(_)) {
                    self.screen.sync_mut().request_reload(self.sink.as_ref());
                }
            }
            Reply::BuildCreated(created) => {
                self.banner.success(
                    format!("Build {} started ({})", created.id, created.status),
                    now,
                );
                if current && matches!(self.screen, Screen::Project(_)) {
                    self.screen.sync_mut().request_reload(self.sink.as_ref());
                }
            }
            Reply::StatusChanged(agent) => {
                self.banner
                    .success(format!("Agent {} is now {}", agent.name, agent.status), now);
                if let (true, Screen::Agent(s)) = (current, &mut self.screen) {
                    if s.agent.id == agent.id {
                        s.agent = agent;
                    }
                }
            }
            Reply::LabelsSaved(agent) => {
                self.banner
                    .success(format!("Labels saved for {}", agent.name), now);
                if let (true, Screen::Agent(s)) = (current, &mut self.screen) {
                    if s.agent.id == agent.id {
                        s.agent = agent;
                        s.draft = None;
                    }
                }
            }
            Reply::AgentDeleted { id } => {
                self.banner.success(format!("Agent {id} deleted"), now);
                let showing = matches!(&self.screen, Screen::Agent(s) if s.agent.id == id);
                if current && showing {
                    self.go(NavEvent::Back, now);
                }
            }
            Reply::Downloaded(dl) => {
                let short = dl.sha256.get(..12).unwrap_or(&dl.sha256);
                self.banner.success(
                    format!(
                        "Saved {} ({} bytes, sha256 {short})",
                        dl.path.display(),
                        dl.bytes
                    ),
                    now,
                );
            }
            other => tracing::warn!(reply = ?other, "unexpected action reply"),
        }
    }

    /// Returns `true` when the console should exit.
    pub(crate) fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers, now: Instant) -> bool {
        if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
            return true;
        }

        match &mut self.input {
            InputMode::Form(form) => {
                match code {
                    KeyCode::Esc => self.input = InputMode::Normal,
                    KeyCode::Enter => self.submit_form(now),
                    KeyCode::Tab | KeyCode::Down => form.next_field(),
                    KeyCode::BackTab | KeyCode::Up => form.prev_field(),
                    KeyCode::Backspace => form.pop(),
                    KeyCode::Char(c) => form.push(c),
                    _ => {}
                }
                return false;
            }
            InputMode::ConfirmDelete { agent_id, .. } => {
                let id = *agent_id;
                match code {
                    KeyCode::Char('y') | KeyCode::Enter => {
                        self.input = InputMode::Normal;
                        self.submit_action(Request::DeleteAgent { id }, now);
                    }
                    KeyCode::Char('n') | KeyCode::Esc => self.input = InputMode::Normal,
                    _ => {}
                }
                return false;
            }
            InputMode::Normal => {}
        }

        if let Screen::Agent(s) = &mut self.screen {
            if let Some(draft) = s.draft.as_mut() {
                match code {
                    KeyCode::Esc => s.draft = None,
                    KeyCode::Char('s') if mods.contains(KeyModifiers::CONTROL) => {
                        let request = Request::SetAgentLabels {
                            id: s.agent.id,
                            labels: draft.labels().clone(),
                        };
                        self.submit_action(request, now);
                    }
                    KeyCode::Enter => draft.push('\n'),
                    KeyCode::Backspace => draft.pop(),
                    KeyCode::Char(c) => draft.push(c),
                    _ => {}
                }
                return false;
            }
        }

        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('1') => self.go(NavEvent::Navigate(Root::Projects), now),
            KeyCode::Char('2') => self.go(NavEvent::Navigate(Root::Agents), now),
            KeyCode::Tab => {
                let target = match self.nav.kind().root() {
                    Root::Projects => Root::Agents,
                    Root::Agents => Root::Projects,
                };
                self.go(NavEvent::Navigate(target), now);
            }
            KeyCode::Esc | KeyCode::Backspace | KeyCode::Left | KeyCode::Char('h') => {
                self.go(NavEvent::Back, now)
            }
            KeyCode::Char('r') => self.refresh(now),
            KeyCode::Char('D') => self.input = InputMode::Form(Form::download_by_id()),
            _ => self.handle_view_key(code, now),
        }
        false
    }

    fn handle_view_key(&mut self, code: KeyCode, now: Instant) {
        let delta = match code {
            KeyCode::Down | KeyCode::Char('j') => 1,
            KeyCode::Up | KeyCode::Char('k') => -1,
            KeyCode::PageDown => 10,
            KeyCode::PageUp => -10,
            _ => 0,
        };
        let select = matches!(code, KeyCode::Enter | KeyCode::Right | KeyCode::Char('l'));

        let mut nav_event = None;
        match &mut self.screen {
            Screen::Projects(s) => {
                if delta != 0 {
                    move_selection(&mut s.list, s.projects.len(), delta);
                } else if select {
                    nav_event = s
                        .list
                        .selected()
                        .and_then(|i| s.projects.get(i))
                        .cloned()
                        .map(NavEvent::SelectProject);
                } else if code == KeyCode::Char('n') {
                    self.input = InputMode::Form(Form::new_project());
                }
            }
            Screen::Project(s) => {
                if delta != 0 {
                    move_selection(&mut s.list, s.builds.len(), delta);
                } else if select {
                    nav_event = s
                        .list
                        .selected()
                        .and_then(|i| s.builds.get(i))
                        .cloned()
                        .map(NavEvent::SelectBuild);
                } else if code == KeyCode::Char('b') {
                    self.input = InputMode::Form(Form::trigger_build(&s.project));
                }
            }
            Screen::Build(s) => {
                if delta != 0 {
                    s.log_scroll = if delta > 0 {
                        s.log_scroll.saturating_add(delta as u16)
                    } else {
                        s.log_scroll.saturating_sub(delta.unsigned_abs() as u16)
                    };
                } else if code == KeyCode::Char('d') {
                    if s.build.status == BuildStatus::Success {
                        let request = Request::DownloadArtifact {
                            id: s.build.id,
                            dest_dir: self.cfg.download_dir.clone(),
                        };
                        self.submit_action(request, now);
                    } else {
                        let err = Error::validation(format!(
                            "Build {} is {}; artifacts exist only for successful builds",
                            s.build.id, s.build.status
                        ));
                        self.banner.failure("download", &err, now);
                    }
                }
            }
            Screen::Agents(s) => {
                if delta != 0 {
                    move_selection(&mut s.list, s.agents.len(), delta);
                } else if select {
                    nav_event = s
                        .list
                        .selected()
                        .and_then(|i| s.agents.get(i))
                        .cloned()
                        .map(NavEvent::SelectAgent);
                } else if code == KeyCode::Char('f') {
                    s.filter = s.filter.next();
                    s.sync.retarget(
                        Request::ListAgents { filter: s.filter },
                        self.sink.as_ref(),
                    );
                }
            }
            Screen::Agent(s) => {
                let target = match code {
                    KeyCode::Char('o') => Some(AgentStatus::Online),
                    KeyCode::Char('f') => Some(AgentStatus::Offline),
                    KeyCode::Char('x') => Some(AgentStatus::Draining),
                    _ => None,
                };
                if let Some(status) = target {
                    if s.agent.status == status {
                        self.banner
                            .info(format!("Agent {} is already {status}", s.agent.name), now);
                    } else {
                        let request = Request::SetAgentStatus {
                            id: s.agent.id,
                            status,
                        };
                        self.submit_action(request, now);
                    }
                } else if code == KeyCode::Char('e') {
                    s.draft = Some(LabelDraft::begin(&s.agent.labels));
                } else if code == KeyCode::Char('X') {
                    self.input = InputMode::ConfirmDelete {
                        agent_id: s.agent.id,
                        name: s.agent.name.clone(),
                    };
                }
            }
        }
        if let Some(event) = nav_event {
            self.go(event, now);
        }
    }
}

/// Build the state for whatever the navigator now shows and start its sync.
fn mount_screen(
    nav: &Navigator,
    cfg: &ConsoleConfig,
    sink: &dyn RequestSink,
    now: Instant,
) -> Screen {
    let mount = nav.mount_id();
    match nav.view() {
        View::Projects => Screen::Projects(ProjectsScreen {
            sync: LiveSync::mount(mount, Request::ListProjects, Cadence::Once, false, now, sink),
            projects: Vec::new(),
            list: list_state(0),
            loaded: false,
        }),
        View::ProjectDetail { project } => Screen::Project(ProjectScreen {
            project: project.clone(),
            sync: LiveSync::mount(
                mount,
                Request::ProjectBuilds {
                    project_id: project.id,
                },
                Cadence::Once,
                false,
                now,
                sink,
            ),
            builds: Vec::new(),
            list: list_state(0),
            loaded: false,
        }),
        View::BuildDetail { project, build } => Screen::Build(BuildScreen {
            project: project.clone(),
            build: build.clone(),
            sync: LiveSync::mount(
                mount,
                Request::GetBuild { id: build.id },
                Cadence::WhileInProgress(cfg.build_poll()),
                build.status.is_in_progress(),
                now,
                sink,
            ),
            log_scroll: 0,
        }),
        View::Agents => {
            let filter = StatusFilter::All;
            Screen::Agents(AgentsScreen {
                sync: LiveSync::mount(
                    mount,
                    Request::ListAgents { filter },
                    Cadence::Every(cfg.agents_list_poll()),
                    true,
                    now,
                    sink,
                ),
                filter,
                agents: Vec::new(),
                list: list_state(0),
                loaded: false,
            })
        }
        View::AgentDetail { agent } => Screen::Agent(AgentScreen {
            agent: agent.clone(),
            sync: LiveSync::mount(
                mount,
                Request::GetAgent { id: agent.id },
                Cadence::Every(cfg.agent_poll()),
                true,
                now,
                sink,
            ),
            draft: None,
        }),
    }
}

pub fn run_tui(cfg: ConsoleConfig) -> Result<()> {
    let api = Arc::new(HttpControlPlane::from_config(&cfg)?);
    let (sink, rx) = ThreadSink::new(api);

    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let app = App::new(cfg, Box::new(sink), Some(rx), Instant::now());
    let result = run_loop(&mut terminal, app);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<()> {
    let tick = Duration::from_millis(100);
    loop {
        app.tick(Instant::now());

        let mut draw_panicked = false;
        let draw_result = terminal.draw(|f| {
            if catch_unwind(AssertUnwindSafe(|| app.draw(f))).is_err() {
                draw_panicked = true;
            }
        });
        if draw_panicked {
            tracing::error!("draw panicked; clearing terminal");
            let _ = terminal.clear();
            continue;
        }
        if let Err(e) = draw_result {
            tracing::warn!(error = %e, "draw failed; clearing terminal");
            let _ = terminal.clear();
            continue;
        }

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            match event::read().map_err(|e| Error::msg(e.to_string()))? {
                Event::Key(k) => {
                    if k.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.handle_key(k.code, k.modifiers, Instant::now()) {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }
    tracing::info!("console closed");
    Ok(())
}
