use crate::config::DaemonConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages (default)
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cfgstored")]
#[command(about = "cfgstored - centralized configuration store daemon")]
#[command(version)]
pub struct Cli {
    /// Log level (defaults to info)
    #[arg(short = 'l', long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file path
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Unix socket path (overrides config file)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Do not listen on the Unix socket
    #[arg(long)]
    pub no_unix: bool,

    /// TCP port on the configured host (overrides config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Do not listen on TCP
    #[arg(long)]
    pub no_tcp: bool,

    /// Snapshot file (overrides config file)
    #[arg(long)]
    pub data_file: Option<PathBuf>,

    /// Seconds between a change and the snapshot write
    #[arg(long)]
    pub save_delay: Option<u64>,

    /// PID file path (overrides config file)
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
}

impl Cli {
    pub fn level(&self) -> LevelFilter {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => LevelFilter::DEBUG,
            (None, false) => LevelFilter::INFO,
        }
    }

    /// Overlay command line flags on `config`.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(path) = &self.socket {
            config.unix.path = path.clone();
        }
        if self.no_unix {
            config.unix.enabled = false;
        }
        if let Some(port) = self.port {
            config.tcp.port = port;
        }
        if self.no_tcp {
            config.tcp.enabled = false;
        }
        if let Some(path) = &self.data_file {
            config.data_file = path.clone();
        }
        if let Some(secs) = self.save_delay {
            config.save_delay_secs = secs;
        }
        if let Some(path) = &self.pid_file {
            config.pid_file = path.clone();
        }
    }
}
