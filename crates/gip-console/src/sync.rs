//! Live Sync: keeps one mounted view's data fresh.
//!
//! A [`LiveSync`] fetches on mount, then re-arms a single timer after each
//! completed fetch according to its [`Cadence`]. There is never more than one
//! fetch in flight and never more than one armed timer: the next request is
//! issued only after the previous one resolved (or failed), so results apply
//! in order. Reloads and query changes that arrive mid-fetch are queued and
//! fire once the outstanding fetch resolves. Time is passed in explicitly;
//! the owner calls [`LiveSync::poll`] from its event loop, and again right
//! after [`LiveSync::resolve`] to pick up a queued fetch.
//!
//! Cancellation is by identity. Every fetch carries a [`Ticket`] with the
//! mount id and a sequence number; once the poller is unmounted or dropped,
//! results for older tickets are discarded instead of applied.

use std::time::{Duration, Instant};

use crate::dispatch::{Lane, Reply, Request, RequestSink, Ticket};
use crate::error::Result;
use crate::navigator::MountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fetch on mount and on demand only.
    Once,
    /// Re-fetch every period for as long as the view is mounted.
    Every(Duration),
    /// Re-fetch every period while the last observed entity is still in
    /// progress; stops by itself once it reaches a terminal state.
    WhileInProgress(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InFlight { seq: u64 },
    Armed { due: Instant },
    /// Nothing scheduled; a manual refresh may still fetch.
    Settled,
    Unmounted,
}

#[derive(Debug)]
pub struct LiveSync {
    mount: MountId,
    query: Request,
    cadence: Cadence,
    phase: Phase,
    seq: u64,
    in_progress: bool,
    issued: u64,
    /// Fetch once more as soon as the in-flight one resolves.
    reload_pending: bool,
    /// The in-flight fetch answers a query that has since been replaced.
    superseded: bool,
}

impl LiveSync {
    /// Mount and issue the initial fetch right away. `in_progress` describes
    /// the snapshot the view was opened with; it decides re-arming if the
    /// first fetch fails.
    pub fn mount(
        mount: MountId,
        query: Request,
        cadence: Cadence,
        in_progress: bool,
        now: Instant,
        sink: &dyn RequestSink,
    ) -> Self {
        let mut sync = Self {
            mount,
            query,
            cadence,
            phase: Phase::Settled,
            seq: 0,
            in_progress,
            issued: 0,
            reload_pending: false,
            superseded: false,
        };
        tracing::debug!(mount = mount.0, query = %sync.query.describe(), cadence = ?cadence, "live sync mounted");
        sync.fire(sink);
        sync
    }

    pub fn mount_id(&self) -> MountId {
        self.mount
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Fetches issued since mount, including the initial one.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.phase, Phase::InFlight { .. })
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.phase, Phase::Armed { .. })
    }

    /// Whether the cadence is still driving fetches. A one-off fetch of a
    /// build that already finished does not count.
    pub fn is_live(&self) -> bool {
        match (self.cadence, self.phase) {
            (Cadence::Once, _) => false,
            (_, Phase::Armed { .. }) => true,
            (Cadence::Every(_), Phase::InFlight { .. }) => true,
            (Cadence::WhileInProgress(_), Phase::InFlight { .. }) => self.in_progress,
            _ => false,
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        match self.phase {
            Phase::Armed { due } => Some(due),
            _ => None,
        }
    }

    /// Fire the armed timer if it is due. Returns whether a fetch was issued.
    pub fn poll(&mut self, now: Instant, sink: &dyn RequestSink) -> bool {
        match self.phase {
            Phase::Armed { due } if now >= due => {
                self.fire(sink);
                true
            }
            _ => false,
        }
    }

    /// Take a completed fetch. Returns `true` when the result belongs to the
    /// outstanding request and should be applied to the view; stale or
    /// post-unmount results return `false` and change nothing. An answer to a
    /// query replaced by [`retarget`](Self::retarget) also returns `false`.
    ///
    /// A queued reload or query change arms the timer for `now`, so the
    /// owner's next [`poll`](Self::poll) issues it.
    pub fn resolve(&mut self, seq: u64, result: &Result<Reply>, now: Instant) -> bool {
        if self.phase != (Phase::InFlight { seq }) {
            tracing::trace!(mount = self.mount.0, seq, phase = ?self.phase, "stale sync result discarded");
            return false;
        }
        if std::mem::take(&mut self.superseded) {
            self.reload_pending = false;
            self.phase = Phase::Armed { due: now };
            tracing::trace!(mount = self.mount.0, seq, "result for replaced query discarded");
            return false;
        }
        if let Ok(reply) = result {
            self.in_progress = reply.keeps_polling();
        }
        if std::mem::take(&mut self.reload_pending) {
            self.phase = Phase::Armed { due: now };
            return true;
        }
        self.phase = match self.cadence {
            Cadence::Once => Phase::Settled,
            Cadence::Every(period) => Phase::Armed { due: now + period },
            Cadence::WhileInProgress(period) if self.in_progress => Phase::Armed { due: now + period },
            Cadence::WhileInProgress(_) => {
                tracing::debug!(mount = self.mount.0, "entity settled, polling stops");
                Phase::Settled
            }
        };
        true
    }

    /// User-requested reload. Ignored while a fetch is already in flight so
    /// two requests for the same data never overlap; otherwise it replaces
    /// the armed timer.
    pub fn refresh(&mut self, sink: &dyn RequestSink) -> bool {
        match self.phase {
            Phase::InFlight { .. } | Phase::Unmounted => false,
            Phase::Armed { .. } | Phase::Settled => {
                self.fire(sink);
                true
            }
        }
    }

    /// Reload after a change the user made elsewhere (a created project, a
    /// triggered build). Unlike [`refresh`](Self::refresh) it is never
    /// refused: while a fetch is in flight the reload is queued behind it.
    /// Returns whether a fetch was issued now.
    pub fn request_reload(&mut self, sink: &dyn RequestSink) -> bool {
        match self.phase {
            Phase::Unmounted => false,
            Phase::InFlight { .. } => {
                tracing::trace!(mount = self.mount.0, "reload queued behind in-flight fetch");
                self.reload_pending = true;
                false
            }
            Phase::Armed { .. } | Phase::Settled => {
                self.fire(sink);
                true
            }
        }
    }

    /// Point the poller at a different query (e.g. a new list filter) and
    /// restart the cycle. Any timer is dropped. With a fetch in flight the
    /// new query waits for it, and that older result is discarded.
    pub fn retarget(&mut self, query: Request, sink: &dyn RequestSink) {
        if self.phase == Phase::Unmounted {
            return;
        }
        tracing::debug!(mount = self.mount.0, from = %self.query.describe(), to = %query.describe(), "live sync retargeted");
        self.query = query;
        if self.is_in_flight() {
            self.superseded = true;
        } else {
            self.fire(sink);
        }
    }

    pub fn unmount(&mut self) {
        if self.phase != Phase::Unmounted {
            tracing::debug!(mount = self.mount.0, issued = self.issued, "live sync unmounted");
            self.phase = Phase::Unmounted;
        }
    }

    fn fire(&mut self, sink: &dyn RequestSink) {
        self.reload_pending = false;
        self.superseded = false;
        self.seq = self.seq.saturating_add(1);
        self.issued = self.issued.saturating_add(1);
        self.phase = Phase::InFlight { seq: self.seq };
        let ticket = Ticket {
            mount: self.mount,
            lane: Lane::Sync,
            seq: self.seq,
        };
        tracing::trace!(mount = self.mount.0, seq = self.seq, "sync fetch issued");
        sink.submit(ticket, self.query.clone());
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.unmount();
    }
}
