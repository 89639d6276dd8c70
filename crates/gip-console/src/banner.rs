use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub text: String,
    pub tone: Tone,
    pub posted_at: Instant,
}

/// Single short-lived message line. Posting replaces whatever was shown.
#[derive(Debug)]
pub struct BannerSlot {
    current: Option<Banner>,
    ttl: Duration,
}

impl BannerSlot {
    pub fn new(ttl: Duration) -> Self {
        Self { current: None, ttl }
    }

    pub fn post(&mut self, tone: Tone, text: impl Into<String>, now: Instant) {
        let text = text.into();
        tracing::debug!(tone = ?tone, %text, "banner");
        self.current = Some(Banner {
            text,
            tone,
            posted_at: now,
        });
    }

    pub fn info(&mut self, text: impl Into<String>, now: Instant) {
        self.post(Tone::Info, text, now);
    }

    pub fn success(&mut self, text: impl Into<String>, now: Instant) {
        self.post(Tone::Success, text, now);
    }

    /// Report a failed operation. Validation errors are already phrased for
    /// the user and are shown as-is; others get the operation as context.
    pub fn failure(&mut self, what: &str, err: &Error, now: Instant) {
        let text = match err.kind() {
            ErrorKind::Validation => err.message().to_string(),
            _ => format!("{what} failed: {err}"),
        };
        self.post(Tone::Error, text, now);
    }

    pub fn current(&self, now: Instant) -> Option<&Banner> {
        self.current
            .as_ref()
            .filter(|b| now.saturating_duration_since(b.posted_at) < self.ttl)
    }

    /// Drop an expired message.
    pub fn expire(&mut self, now: Instant) {
        if self.current(now).is_none() {
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_message_replaces_older() {
        let t0 = Instant::now();
        let mut slot = BannerSlot::new(Duration::from_secs(5));
        slot.info("first", t0);
        slot.success("Project created (id 7)", t0 + Duration::from_secs(1));
        let b = slot.current(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(b.text, "Project created (id 7)");
        assert_eq!(b.tone, Tone::Success);
    }

    #[test]
    fn messages_expire() {
        let t0 = Instant::now();
        let mut slot = BannerSlot::new(Duration::from_secs(5));
        slot.info("hello", t0);
        assert!(slot.current(t0 + Duration::from_millis(4999)).is_some());
        assert!(slot.current(t0 + Duration::from_secs(5)).is_none());
        slot.expire(t0 + Duration::from_secs(6));
        assert!(slot.current(t0).is_none());
    }

    #[test]
    fn failures_carry_context_except_validation() {
        let t0 = Instant::now();
        let mut slot = BannerSlot::new(Duration::from_secs(5));
        slot.failure("delete agent 3", &Error::server(404, Some("Agent not found")), t0);
        assert_eq!(
            slot.current(t0).unwrap().text,
            "delete agent 3 failed: server error (404): Agent not found"
        );

        slot.failure("create project", &Error::validation("name is required"), t0);
        let b = slot.current(t0).unwrap();
        assert_eq!(b.text, "name is required");
        assert_eq!(b.tone, Tone::Error);
    }
}
