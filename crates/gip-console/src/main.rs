use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use gip_console::api::{ControlPlane, HttpControlPlane};
use gip_console::config::{self, ConsoleConfig, Overrides};
use gip_console::logging::{self, LogTarget};
use gip_console::model::{BuildStatus, StatusFilter};
use gip_console::status::{agent_badge, build_badge};
use gip_console::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Console settings (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Control plane root URL; beats the config file and GIP_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Write logs here instead of the default location
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive console (default)
    Tui,
    /// Print all projects
    Projects,
    /// Print agents, optionally filtered by status
    Agents {
        /// ONLINE, OFFLINE or DRAINING
        #[arg(long)]
        status: Option<String>,
    },
    /// Follow a build until it succeeds (exit 0) or fails (exit 1)
    WatchBuild { id: u64 },
    /// Save a build artifact
    Download {
        id: u64,
        /// Target directory (defaults to download_dir from the config)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cmd = args.cmd.unwrap_or(Command::Tui);

    let target = match (&args.log_file, &cmd) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, Command::Tui) => LogTarget::File(logging::default_log_path()),
        (None, _) => LogTarget::Stderr,
    };
    logging::init(&target, args.log_json)?;

    let overrides = Overrides::from_env().then(Overrides {
        base_url: args.base_url,
        api_prefix: None,
    });
    let cfg = config::load(args.config.as_deref(), &overrides)?;

    match cmd {
        Command::Tui => gip_console::ui::run_tui(cfg),
        Command::Projects => cmd_projects(&cfg),
        Command::Agents { status } => cmd_agents(&cfg, status.as_deref()),
        Command::WatchBuild { id } => cmd_watch(&cfg, id),
        Command::Download { id, out } => cmd_download(&cfg, id, out),
    }
}

fn cmd_projects(cfg: &ConsoleConfig) -> Result<()> {
    let api = HttpControlPlane::from_config(cfg)?;
    let projects = api.list_projects()?;
    if projects.is_empty() {
        println!("no projects");
        return Ok(());
    }
    for p in projects {
        println!(
            "{:>5}  {:<24} {:<12} {}{}",
            p.id,
            p.name,
            p.branch,
            p.repo_url,
            p.subdir.map(|s| format!(" ({s})")).unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_agents(cfg: &ConsoleConfig, status: Option<&str>) -> Result<()> {
    let filter = match status {
        Some(raw) => StatusFilter::parse(raw).ok_or_else(|| {
            Error::validation(format!(
                "unknown status '{raw}' (expected ONLINE, OFFLINE or DRAINING)"
            ))
        })?,
        None => StatusFilter::All,
    };
    let api = HttpControlPlane::from_config(cfg)?;
    let agents = api.list_agents(filter)?;
    if agents.is_empty() {
        println!("no agents ({})", filter.label());
        return Ok(());
    }
    let now = chrono::Utc::now();
    for a in agents {
        let badge = agent_badge(a.status.as_str());
        let labels = a
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:>5}  {:<20} {} {:<9} seen {:<10} {}",
            a.id,
            a.name,
            badge.icon,
            badge.label,
            a.last_seen_label(now),
            labels
        );
    }
    Ok(())
}

fn cmd_watch(cfg: &ConsoleConfig, id: u64) -> Result<()> {
    let api: Arc<dyn ControlPlane> = Arc::new(HttpControlPlane::from_config(cfg)?);
    let mut stdout = io::stdout();
    let build = gip_console::watch::watch_build(api, id, cfg.build_poll(), &mut stdout)?;
    let badge = build_badge(build.status.as_str());
    println!("build {} finished: {} {}", build.id, badge.icon, badge.label);
    if build.status != BuildStatus::Success {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_download(cfg: &ConsoleConfig, id: u64, out: Option<PathBuf>) -> Result<()> {
    let api = HttpControlPlane::from_config(cfg)?;
    let dir = out.unwrap_or_else(|| cfg.download_dir.clone());
    let dl = api.download_artifact(id, &dir)?;
    println!("{}  {} bytes  sha256 {}", dl.path.display(), dl.bytes, dl.sha256);
    Ok(())
}
