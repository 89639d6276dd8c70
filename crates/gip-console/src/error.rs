use std::fmt;

/// Failure classes surfaced to the user. They only change how a message is
/// phrased; every kind is handled the same way by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request could not complete (connect, timeout, broken body).
    Network,
    /// The control plane answered with a non-2xx status.
    Server,
    /// Rejected locally before anything was sent.
    Validation,
    Other,
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Other,
            msg: msg.into(),
        }
    }

    pub fn network<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Network,
            msg: msg.into(),
        }
    }

    pub fn validation<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Validation,
            msg: msg.into(),
        }
    }

    /// Non-2xx reply. `detail` is the `{error: ...}` field when the body had one.
    pub fn server(status: u16, detail: Option<&str>) -> Self {
        let msg = match detail.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => format!("server error ({status}): {d}"),
            None => format!("server error ({status})"),
        };
        Self {
            kind: ErrorKind::Server,
            msg,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("invalid JSON: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::server(status.as_u16(), None);
        }
        Self::network(format!("network error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
