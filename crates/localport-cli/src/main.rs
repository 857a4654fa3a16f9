mod cli;
mod commands;
mod exit;

use clap::Parser;
use localport_commons::utils::config_dir::get_daemon_log_path;
use localport_commons::utils::logging::{
    init_logging,
    init_logging_to_file,
};

use crate::cli::{
    Cli,
    Command,
    DaemonAction,
};

fn runs_daemon(command: &Command) -> bool {
    matches!(
        command,
        Command::Daemon {
            action: DaemonAction::Start | DaemonAction::Restart
        }
    )
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // The daemon logs to its state-dir file; one-shot commands log to
    // stderr. Falls back to stderr when the log file cannot be opened.
    let mut file_logging = false;
    if runs_daemon(&cli.command) {
        if let Ok(path) = get_daemon_log_path() {
            file_logging = init_logging_to_file(cli.verbose, cli.quiet, &path).is_ok();
        }
    }
    if !file_logging {
        init_logging(cli.verbose, cli.quiet);
    }

    let result = match &cli.command {
        Command::Start {
            names,
            all,
            tag,
            force,
        } => commands::service::start(&cli, names, *all, tag.as_deref(), *force).await,
        Command::Stop { names, all, tag } => {
            commands::service::stop(&cli, names, *all, tag.as_deref()).await
        }
        Command::Status {
            names,
            output,
            watch,
            interval,
        } => commands::service::status(&cli, names, *output, *watch, *interval).await,
        Command::Daemon { action } => commands::daemon::run(&cli, action).await,
        Command::Config { action } => commands::config::run(&cli, action).await,
        Command::Logs { service } => commands::logs::run(service.as_deref()).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit::code(exit::EXIT_FAILURE)
        }
    }
}
