use std::cell::RefCell;
use std::time::{Duration, Instant};

use chrono::Utc;
use gip_console::Error;
use gip_console::dispatch::{Lane, Reply, Request, RequestSink, Ticket};
use gip_console::model::{Agent, AgentStatus, Build, BuildStatus, StatusFilter};
use gip_console::navigator::MountId;
use gip_console::sync::{Cadence, LiveSync, Phase};

#[derive(Default)]
struct Recorder {
    sent: RefCell<Vec<(Ticket, Request)>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.sent.borrow().len()
    }

    fn last(&self) -> (Ticket, Request) {
        self.sent.borrow().last().cloned().expect("nothing sent")
    }
}

impl RequestSink for Recorder {
    fn submit(&self, ticket: Ticket, request: Request) {
        self.sent.borrow_mut().push((ticket, request));
    }
}

fn build(status: BuildStatus) -> Build {
    Build {
        id: 42,
        project_id: 7,
        branch: "main".into(),
        status,
        created_at: Utc::now(),
        started_at: None,
        ended_at: None,
        log_output: None,
    }
}

fn agent(status: AgentStatus) -> Agent {
    Agent {
        id: 3,
        name: "runner-3".into(),
        status,
        labels: Default::default(),
        created_at: Utc::now(),
        last_seen_at: None,
    }
}

const BUILD_TICK: Duration = Duration::from_secs(3);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn build_polling_ends_with_the_terminal_fetch() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::GetBuild { id: 42 },
        Cadence::WhileInProgress(BUILD_TICK),
        true,
        t0,
        &sink,
    );
    assert_eq!(sink.count(), 1);

    let mut now = t0;
    for status in [BuildStatus::Pending, BuildStatus::Building, BuildStatus::Building] {
        let (ticket, _) = sink.last();
        assert!(sync.resolve(ticket.seq, &Ok(Reply::Build(build(status))), now));
        assert_eq!(sync.next_due(), Some(now + BUILD_TICK));
        // Not due yet: nothing fires early.
        assert!(!sync.poll(now + secs(2), &sink));
        now += BUILD_TICK;
        assert!(sync.poll(now, &sink));
    }
    assert_eq!(sink.count(), 4);

    let (ticket, _) = sink.last();
    assert!(sync.resolve(ticket.seq, &Ok(Reply::Build(build(BuildStatus::Failed))), now));
    assert_eq!(sync.phase(), Phase::Settled);
    for later in 1..20 {
        assert!(!sync.poll(now + secs(later * 3), &sink));
    }
    assert_eq!(sink.count(), 4);
}

#[test]
fn mounting_an_already_finished_build_fetches_once() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(5),
        Request::GetBuild { id: 42 },
        Cadence::WhileInProgress(BUILD_TICK),
        false,
        t0,
        &sink,
    );
    let (ticket, _) = sink.last();
    sync.resolve(ticket.seq, &Ok(Reply::Build(build(BuildStatus::Success))), t0);
    assert!(!sync.poll(t0 + secs(30), &sink));
    assert_eq!(sink.count(), 1);
}

#[test]
fn at_most_one_request_or_timer_at_a_time() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::GetAgent { id: 3 },
        Cadence::Every(secs(5)),
        true,
        t0,
        &sink,
    );
    // In flight: neither the timer nor a manual refresh may add a request.
    assert!(!sync.is_armed());
    assert!(!sync.poll(t0 + secs(60), &sink));
    assert!(!sync.refresh(&sink));
    assert_eq!(sink.count(), 1);

    let (ticket, _) = sink.last();
    sync.resolve(ticket.seq, &Ok(Reply::Agent(agent(AgentStatus::Online))), t0 + secs(1));
    assert!(sync.is_armed() && !sync.is_in_flight());

    // A manual refresh replaces the armed timer instead of adding one.
    assert!(sync.refresh(&sink));
    assert!(sync.is_in_flight() && !sync.is_armed());
    assert!(!sync.poll(t0 + secs(6), &sink));
    assert_eq!(sink.count(), 2);
}

#[test]
fn unmount_cancels_the_armed_timer_and_in_flight_result() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::GetAgent { id: 3 },
        Cadence::Every(secs(5)),
        true,
        t0,
        &sink,
    );
    let (ticket, _) = sink.last();
    sync.resolve(ticket.seq, &Ok(Reply::Agent(agent(AgentStatus::Online))), t0);
    assert_eq!(sync.next_due(), Some(t0 + secs(5)));

    sync.unmount();
    assert!(!sync.poll(t0 + secs(5), &sink));
    assert!(!sync.poll(t0 + secs(500), &sink));
    assert_eq!(sink.count(), 1);

    // Unmount mid-request: the late result is not applied.
    let sink = Recorder::default();
    let mut sync = LiveSync::mount(
        MountId(2),
        Request::GetBuild { id: 42 },
        Cadence::WhileInProgress(BUILD_TICK),
        true,
        t0,
        &sink,
    );
    let (ticket, _) = sink.last();
    sync.unmount();
    assert!(!sync.resolve(ticket.seq, &Ok(Reply::Build(build(BuildStatus::Building))), t0));
    assert_eq!(sync.next_due(), None);
}

#[test]
fn filter_change_restarts_the_cycle_without_a_second_timer() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::ListAgents {
            filter: StatusFilter::All,
        },
        Cadence::Every(secs(10)),
        true,
        t0,
        &sink,
    );
    let (first, _) = sink.last();
    sync.resolve(first.seq, &Ok(Reply::Agents(Vec::new())), t0);
    assert_eq!(sync.next_due(), Some(t0 + secs(10)));

    // Timer pending; change the filter.
    sync.retarget(
        Request::ListAgents {
            filter: StatusFilter::Draining,
        },
        &sink,
    );
    assert_eq!(sink.count(), 2);
    let (ticket, request) = sink.last();
    assert_eq!(
        request,
        Request::ListAgents {
            filter: StatusFilter::Draining
        }
    );
    assert_eq!(ticket.lane, Lane::Sync);
    assert_eq!(sync.next_due(), None);
    // The old deadline passes without a fetch.
    assert!(!sync.poll(t0 + secs(10), &sink));

    sync.resolve(ticket.seq, &Ok(Reply::Agents(Vec::new())), t0 + secs(5));
    assert_eq!(sync.next_due(), Some(t0 + secs(15)));
    assert!(sync.poll(t0 + secs(15), &sink));
    assert_eq!(
        sink.last().1,
        Request::ListAgents {
            filter: StatusFilter::Draining
        }
    );
}

#[test]
fn filter_change_mid_request_waits_and_discards_the_old_result() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::ListAgents {
            filter: StatusFilter::All,
        },
        Cadence::Every(secs(10)),
        true,
        t0,
        &sink,
    );
    let (old, _) = sink.last();
    sync.retarget(
        Request::ListAgents {
            filter: StatusFilter::Online,
        },
        &sink,
    );
    // Never two fetches in flight for one view.
    assert_eq!(sink.count(), 1);
    sync.retarget(
        Request::ListAgents {
            filter: StatusFilter::Offline,
        },
        &sink,
    );
    assert_eq!(sink.count(), 1);

    // The unfiltered answer is not applied; the latest filter goes out next.
    assert!(!sync.resolve(old.seq, &Ok(Reply::Agents(Vec::new())), t0 + secs(1)));
    assert_eq!(sync.next_due(), Some(t0 + secs(1)));
    assert!(sync.poll(t0 + secs(1), &sink));
    let (new, request) = sink.last();
    assert_eq!(
        request,
        Request::ListAgents {
            filter: StatusFilter::Offline
        }
    );
    assert!(sync.resolve(new.seq, &Ok(Reply::Agents(Vec::new())), t0 + secs(2)));
    assert_eq!(sync.next_due(), Some(t0 + secs(12)));
    assert_eq!(sink.count(), 2);
}

#[test]
fn failed_tick_rearms_on_the_normal_cadence() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(1),
        Request::GetBuild { id: 42 },
        Cadence::WhileInProgress(BUILD_TICK),
        true,
        t0,
        &sink,
    );
    let (ticket, _) = sink.last();
    let failed = Err(Error::network("connection refused"));
    assert!(sync.resolve(ticket.seq, &failed, t0));
    assert_eq!(sync.next_due(), Some(t0 + BUILD_TICK));

    assert!(sync.poll(t0 + BUILD_TICK, &sink));
    let (ticket, _) = sink.last();
    sync.resolve(ticket.seq, &Ok(Reply::Build(build(BuildStatus::Success))), t0 + BUILD_TICK);

    // A manual refresh after the end fetches once and stays settled, even
    // when that refresh fails.
    assert!(sync.refresh(&sink));
    let (ticket, _) = sink.last();
    sync.resolve(ticket.seq, &Err(Error::server(502, None)), t0 + secs(20));
    assert_eq!(sync.phase(), Phase::Settled);
    assert_eq!(sink.count(), 3);
}

#[test]
fn every_fetch_carries_the_mount_and_a_fresh_sequence() {
    let sink = Recorder::default();
    let t0 = Instant::now();
    let mut sync = LiveSync::mount(
        MountId(9),
        Request::GetAgent { id: 3 },
        Cadence::Every(secs(5)),
        true,
        t0,
        &sink,
    );
    for i in 0..3u64 {
        let (ticket, _) = sink.last();
        sync.resolve(ticket.seq, &Ok(Reply::Agent(agent(AgentStatus::Draining))), t0 + secs(i * 5));
        sync.poll(t0 + secs(i * 5 + 5), &sink);
    }
    let seqs: Vec<u64> = sink.sent.borrow().iter().map(|(t, _)| t.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert!(sink.sent.borrow().iter().all(|(t, _)| t.mount == MountId(9)));
    assert_eq!(sync.issued(), 4);
}
