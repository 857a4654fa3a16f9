use std::process::ExitCode;

use localport_commons::utils::config::{
    export_config,
    load_config,
};

use crate::cli::{
    Cli,
    ConfigAction,
};
use crate::exit::{
    code,
    EXIT_OK,
    EXIT_USAGE,
};

pub async fn run(cli: &Cli, action: &ConfigAction) -> anyhow::Result<ExitCode> {
    let services = match load_config(cli.config.as_ref()) {
        Ok(services) => services,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(code(EXIT_USAGE));
        }
    };

    match action {
        ConfigAction::Validate => {
            println!("Configuration valid ({} service(s))", services.len());
            for service in &services {
                let health = service
                    .health_check
                    .as_ref()
                    .map(|c| c.kind.to_string())
                    .unwrap_or_else(|| "none".to_string());
                println!(
                    "  {:<20} {} 127.0.0.1:{} -> {} (health: {health})",
                    service.name, service.technology, service.local_port, service.remote_port
                );
            }
        }
        ConfigAction::Export { output } => {
            let yaml = export_config(&services)?;
            match output {
                Some(path) => {
                    std::fs::write(path, &yaml)?;
                    println!("Configuration exported to {}", path.display());
                }
                None => print!("{yaml}"),
            }
        }
    }

    Ok(code(EXIT_OK))
}
