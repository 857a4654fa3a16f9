use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
    ValueEnum,
};

#[derive(Parser)]
#[command(name = "localport")]
#[command(about = "Supervise kubectl and ssh port forwards with health checks")]
#[command(version)]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "LOCALPORT_CONFIG",
        help = "Path to the configuration file",
        value_name = "PATH"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Only log errors")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start services and supervise them in the foreground
    Start {
        /// Service names to start
        names: Vec<String>,
        #[arg(long, help = "Start every enabled service")]
        all: bool,
        #[arg(long, value_name = "TAG", help = "Start services carrying this tag")]
        tag: Option<String>,
        #[arg(long, help = "Restart services that are already running")]
        force: bool,
    },
    /// Stop services
    Stop {
        /// Service names to stop
        names: Vec<String>,
        #[arg(long, help = "Stop every service")]
        all: bool,
        #[arg(long, value_name = "TAG", help = "Stop services carrying this tag")]
        tag: Option<String>,
    },
    /// Show service status
    Status {
        /// Limit to these service names
        names: Vec<String>,
        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,
        #[arg(long, help = "Refresh continuously until interrupted")]
        watch: bool,
        #[arg(long, default_value_t = 5, value_name = "SECONDS")]
        interval: u64,
    },
    /// Control the long-running daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Inspect or export the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show where the daemon writes its logs
    Logs {
        #[arg(long, value_name = "NAME", help = "Service to show logs for")]
        service: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Run the daemon in the foreground until signalled
    Start,
    /// Ask a running daemon to shut down
    Stop,
    /// Stop a running daemon, then run a fresh one in the foreground
    Restart,
    /// Report whether a daemon is running
    Status,
    /// Ask a running daemon to reload its configuration
    Reload,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Parse and validate the configuration
    Validate,
    /// Print the loaded configuration back as YAML
    Export {
        #[arg(short, long, value_name = "PATH", help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
