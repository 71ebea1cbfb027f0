//! CLI definition using clap derive.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lastseen", about = "chat presence tracker and last-seen archive", version)]
pub struct Cli {
    /// Configuration file (default: $LASTSEEN_CONFIG, ./lastseen.toml, /etc/lastseen.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// UDS socket path (default: /tmp/lastseen-$USER/lastseend.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (poll loop + UDS server)
    Daemon(DaemonOpts),
    /// Log in to every source once, interactively
    Setup,
    /// Add a subject to the watch-list
    Watch(SubjectArgs),
    /// Remove a user from the watch-list
    Unwatch(UnwatchOpts),
    /// List watched subjects
    Ls,
    /// Query a user's last-seen time right now
    Status(StatusOpts),
    /// Show archived last-seen times
    Archive(ArchiveOpts),
    /// Append a last-seen time to the archive by hand
    Record(RecordOpts),
    /// List registered sources
    Sources,
}

impl Command {
    /// Long-running commands log to stderr; client commands print only their result.
    pub fn logs(&self) -> bool {
        matches!(self, Self::Daemon(_) | Self::Setup)
    }
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Seconds between poll cycles
    #[arg(long, env = "LASTSEEN_INTERVAL")]
    pub interval: Option<u64>,

    /// SQLite database path
    #[arg(long, env = "LASTSEEN_DATABASE_PATH")]
    pub database: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct SubjectArgs {
    pub user: String,
    pub source: String,
}

#[derive(clap::Args)]
pub struct UnwatchOpts {
    pub user: String,

    /// Only this source (default: every source)
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    pub user: String,

    /// Only this source (default: every source)
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(clap::Args)]
pub struct ArchiveOpts {
    /// Comma-separated users
    #[arg(long, value_delimiter = ',')]
    pub user: Vec<String>,

    /// Comma-separated sources
    #[arg(long, value_delimiter = ',')]
    pub source: Vec<String>,
}

#[derive(clap::Args)]
pub struct RecordOpts {
    pub user: String,
    pub source: String,

    /// RFC 3339 timestamp (default: now)
    #[arg(long, value_parser = parse_rfc3339)]
    pub at: Option<DateTime<Utc>>,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/lastseen/lastseend.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/lastseen-{user}/lastseend.sock")
}
