use std::fs;
use std::path::Path;

use anyhow::{
    Context,
    Result,
};
use log::debug;

use crate::utils::config_dir::get_pid_file_path;

/// Writes the daemon PID file, creating the state directory if needed.
pub fn write_pid_file(pid: u32) -> Result<()> {
    let path = get_pid_file_path().map_err(anyhow::Error::msg)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory {}", parent.display()))?;
    }

    fs::write(&path, format!("{pid}\n"))
        .with_context(|| format!("failed to write pid file {}", path.display()))?;
    debug!("Wrote pid file {} (pid {pid})", path.display());
    Ok(())
}

/// Reads the recorded daemon PID, if a pid file exists and parses.
pub fn read_pid_file() -> Result<Option<u32>> {
    let path = get_pid_file_path().map_err(anyhow::Error::msg)?;
    read_pid_from(&path)
}

pub fn read_pid_from(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read pid file {}", path.display()))?;
    let pid = raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("pid file {} contains garbage", path.display()))?;
    Ok(Some(pid))
}

/// Removes the PID file. Missing files are fine; the daemon may have never
/// finished booting.
pub fn remove_pid_file() -> Result<()> {
    let path = get_pid_file_path().map_err(anyhow::Error::msg)?;

    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("Removed pid file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove pid file {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_read_pid_parses_trimmed_value() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"  4242\n").unwrap();

        let pid = read_pid_from(file.path()).unwrap();
        assert_eq!(pid, Some(4242));
    }

    #[test]
    fn test_read_pid_missing_file_is_none() {
        let pid = read_pid_from(Path::new("/nonexistent/localport/daemon.pid")).unwrap();
        assert!(pid.is_none());
    }

    #[test]
    fn test_read_pid_garbage_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not-a-pid").unwrap();

        assert!(read_pid_from(file.path()).is_err());
    }
}
