pub mod api;
pub mod banner;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forms;
pub mod labels;
pub mod log_sanitize;
pub mod logging;
pub mod model;
pub mod navigator;
pub mod status;
pub mod sync;
pub mod ui;
pub mod watch;

pub use error::{Error, Result};
