//! Headless build watching: the build-detail poll loop without a screen.

use std::io::Write;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::api::ControlPlane;
use crate::dispatch::{Reply, Request, ThreadSink};
use crate::error::{Error, Result};
use crate::model::Build;
use crate::navigator::MountId;
use crate::sync::{Cadence, LiveSync, Phase};

const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Poll build `id` every `period` while it is pending or building, writing a
/// line for each status change. Returns the terminal build. A failure on the
/// very first fetch is returned; later failures are reported and retried on
/// the normal cadence.
pub fn watch_build(
    api: Arc<dyn ControlPlane>,
    id: u64,
    period: Duration,
    out: &mut dyn Write,
) -> Result<Build> {
    let (sink, rx) = ThreadSink::new(api);
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::GetBuild { id },
        Cadence::WhileInProgress(period),
        true,
        Instant::now(),
        &sink,
    );
    let mut last: Option<Build> = None;

    loop {
        if sync.phase() == Phase::Settled {
            break;
        }
        let wait = sync
            .next_due()
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);
        let done = match rx.recv_timeout(wait) {
            Ok(done) => done,
            Err(RecvTimeoutError::Timeout) => {
                sync.poll(Instant::now(), &sink);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::msg("request workers went away"));
            }
        };
        if !sync.resolve(done.ticket.seq, &done.result, Instant::now()) {
            continue;
        }
        match done.result {
            Ok(Reply::Build(build)) => {
                let changed = last.as_ref().is_none_or(|prev| prev.status != build.status);
                if changed {
                    writeln!(
                        out,
                        "{}  build {}  {}",
                        chrono::Local::now().format("%H:%M:%S"),
                        build.id,
                        build.status
                    )?;
                }
                last = Some(build);
            }
            Ok(other) => {
                return Err(Error::msg(format!("unexpected reply to {}: {other:?}", done.what)));
            }
            Err(e) if last.is_none() => return Err(e),
            Err(e) => {
                tracing::warn!(build = id, error = %e, "poll failed, retrying");
                writeln!(out, "{}  {} failed: {e}", chrono::Local::now().format("%H:%M:%S"), done.what)?;
            }
        }
    }

    last.ok_or_else(|| Error::msg(format!("build {id} was never fetched")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Download;
    use crate::model::{
        Agent, AgentStatus, BuildCreated, BuildStatus, Labels, NewBuild, NewProject, Project,
        ProjectCreated, StatusFilter,
    };
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;

    /// Serves a scripted status sequence, repeating the last one.
    struct Scripted {
        statuses: Mutex<Vec<BuildStatus>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut seq: Vec<BuildStatus>) -> Self {
            seq.reverse();
            Self {
                statuses: Mutex::new(seq),
                calls: Mutex::new(0),
            }
        }
    }

    impl ControlPlane for Scripted {
        fn list_projects(&self) -> Result<Vec<Project>> {
            unimplemented!()
        }
        fn create_project(&self, _: &NewProject) -> Result<ProjectCreated> {
            unimplemented!()
        }
        fn project_builds(&self, _: u64) -> Result<Vec<Build>> {
            unimplemented!()
        }
        fn create_build(&self, _: &NewBuild) -> Result<BuildCreated> {
            unimplemented!()
        }
        fn get_build(&self, id: u64) -> Result<Build> {
            *self.calls.lock().unwrap() += 1;
            let mut seq = self.statuses.lock().unwrap();
            let status = if seq.len() > 1 {
                seq.pop().unwrap()
            } else {
                seq.last().cloned().ok_or_else(|| Error::server(404, Some("Build not found")))?
            };
            Ok(Build {
                id,
                project_id: 7,
                branch: "main".into(),
                status,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                log_output: None,
            })
        }
        fn download_artifact(&self, _: u64, _: &Path) -> Result<Download> {
            unimplemented!()
        }
        fn list_agents(&self, _: StatusFilter) -> Result<Vec<Agent>> {
            unimplemented!()
        }
        fn get_agent(&self, _: u64) -> Result<Agent> {
            unimplemented!()
        }
        fn set_agent_status(&self, _: u64, _: &AgentStatus) -> Result<Agent> {
            unimplemented!()
        }
        fn set_agent_labels(&self, _: u64, _: &Labels) -> Result<Agent> {
            unimplemented!()
        }
        fn delete_agent(&self, _: u64) -> Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn stops_at_terminal_status_and_prints_changes() {
        let api = Arc::new(Scripted::new(vec![
            BuildStatus::Pending,
            BuildStatus::Building,
            BuildStatus::Building,
            BuildStatus::Success,
        ]));
        let mut out = Vec::new();
        let build = watch_build(api.clone(), 42, Duration::from_millis(5), &mut out).unwrap();
        assert_eq!(build.status, BuildStatus::Success);
        assert_eq!(*api.calls.lock().unwrap(), 4);

        let text = String::from_utf8(out).unwrap();
        let statuses: Vec<&str> = text
            .lines()
            .map(|l| l.rsplit("  ").next().unwrap())
            .collect();
        assert_eq!(statuses, vec!["pending", "building", "success"]);
    }

    #[test]
    fn first_fetch_failure_is_returned() {
        let api = Arc::new(Scripted::new(Vec::new()));
        let mut out = Vec::new();
        let err = watch_build(api, 9, Duration::from_millis(5), &mut out).unwrap_err();
        assert_eq!(err.to_string(), "server error (404): Build not found");
    }
}
