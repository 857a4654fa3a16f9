use std::process::ExitCode;

use localport_commons::utils::config_dir::get_daemon_log_path;

use crate::exit::{
    code,
    EXIT_FAILURE,
    EXIT_OK,
};

/// The daemon writes one structured log stream; forwarder child output is
/// folded into it line by line. This points the user at it.
pub async fn run(service: Option<&str>) -> anyhow::Result<ExitCode> {
    let path = match get_daemon_log_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(code(EXIT_FAILURE));
        }
    };

    println!("Daemon log: {}", path.display());
    if let Some(service) = service {
        println!(
            "Filter a single service with: grep 'service={service}' {}",
            path.display()
        );
    } else {
        println!("Follow it with: tail -f {}", path.display());
    }

    if !path.exists() {
        println!("(no log file yet; it appears once 'localport daemon start' runs)");
    }

    Ok(code(EXIT_OK))
}
