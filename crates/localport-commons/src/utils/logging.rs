use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use env_logger::fmt::Formatter;
use log::{
    LevelFilter,
    Record,
};

/// Initializes the process-wide logger on stderr. Verbosity flags win over
/// `RUST_LOG`; `NO_COLOR` disables styled output per convention.
pub fn init_logging(verbose: bool, quiet: bool) {
    let _ = builder(verbose, quiet).try_init();
}

/// Daemon variant: the same format appended to a log file so `logs` has
/// something to point at. The parent directory is created if needed.
pub fn init_logging_to_file(verbose: bool, quiet: bool, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let mut builder = builder(verbose, quiet);
    builder.target(env_logger::Target::Pipe(Box::new(file)));
    builder.write_style(env_logger::WriteStyle::Never);
    let _ = builder.try_init();
    Ok(())
}

fn builder(verbose: bool, quiet: bool) -> env_logger::Builder {
    let level = if quiet {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);

    if no_color() {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    builder.format(format_record);
    builder
}

pub fn no_color() -> bool {
    env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
}

fn format_record(buf: &mut Formatter, record: &Record<'_>) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} [{}] {} - {}",
        buf.timestamp_seconds(),
        record.level(),
        record.target(),
        record.args()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(true, false);
        init_logging(false, false);
        log::debug!("logger survives double init");
    }
}
