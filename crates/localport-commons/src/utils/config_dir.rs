use std::env;
use std::path::PathBuf;

pub const CONFIG_ENV_VAR: &str = "LOCALPORT_CONFIG";

/// Returns the config file search order: `./localport.yaml`, then
/// `~/.config/localport/config.yaml`, then `/etc/localport/config.yaml`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("localport.yaml")];

    if let Some(config_home) = dirs::config_dir() {
        paths.push(config_home.join("localport").join("config.yaml"));
    }

    paths.push(PathBuf::from("/etc/localport/config.yaml"));
    paths
}

/// Resolves the active config path: explicit path, then `LOCALPORT_CONFIG`,
/// then the first existing file in the search order.
pub fn resolve_config_path(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.clone());
    }

    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    config_search_paths().into_iter().find(|p| p.exists())
}

/// State directory for runtime artifacts (pid file, daemon log), e.g.
/// `~/.local/state/localport` on Linux.
pub fn get_state_dir() -> Result<PathBuf, String> {
    if let Some(state_dir) = dirs::state_dir() {
        return Ok(state_dir.join("localport"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        return Ok(home_dir.join(".localport"));
    }

    Err("Unable to determine the state directory".to_string())
}

pub fn get_pid_file_path() -> Result<PathBuf, String> {
    let mut path = get_state_dir()?;
    path.push("daemon.pid");
    Ok(path)
}

pub fn get_daemon_log_path() -> Result<PathBuf, String> {
    let mut path = get_state_dir()?;
    path.push("daemon.log");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_order_starts_in_cwd_and_ends_in_etc() {
        let paths = config_search_paths();

        assert_eq!(paths.first().unwrap(), &PathBuf::from("localport.yaml"));
        assert_eq!(
            paths.last().unwrap(),
            &PathBuf::from("/etc/localport/config.yaml")
        );
    }

    #[test]
    fn test_explicit_path_wins_over_everything() {
        let explicit = PathBuf::from("/tmp/custom.yaml");
        let resolved = resolve_config_path(Some(&explicit));

        assert_eq!(resolved, Some(explicit));
    }

    #[test]
    fn test_pid_file_lives_under_state_dir() {
        let pid_path = get_pid_file_path().unwrap();

        assert!(pid_path.ends_with("daemon.pid"));
        assert!(pid_path.parent().unwrap().ends_with("localport"));
    }
}
