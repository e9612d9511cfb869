use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::Path;
use std::sync::Arc;

use fail2ban_notify::application::config::Config;
use fail2ban_notify::application::service::NotifierService;
use fail2ban_notify::core::error::NotifierError;
use fail2ban_notify::core::notification::Action;
use fail2ban_notify::infrastructure::executor::ConnectorManager;
use fail2ban_notify::infrastructure::geoip::GeoManager;
use fail2ban_notify::interfaces::cli::{Cli, Commands};

fn init_logging(debug: bool, log_level: &str) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        log_level.parse().unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // `init` decides itself whether an existing file may be replaced
    let config = match cli.command {
        Commands::Init { .. } if !cli.config.exists() => Config::default(),
        _ => Config::load(&cli.config)?,
    };
    init_logging(cli.debug || config.debug, &config.log_level);

    let config = Arc::new(config);
    let manager = ConnectorManager::new(Arc::clone(&config))?;

    match cli.command {
        Commands::Notify {
            ip,
            jail,
            action,
            failures,
        } => {
            let action: Action = action.parse()?;
            let geo = Arc::new(GeoManager::new(config.geoip.clone())?);
            let service = NotifierService::new(geo, Box::new(manager));

            match service.notify(&ip, &jail, action, failures).await {
                Ok(Some(batch)) => info!(
                    "Notification sent to {} connectors ({})",
                    batch.successful_count, batch.run_id
                ),
                Ok(None) => {}
                // fail2ban should not see a failed action because one connector broke
                Err(NotifierError::ConnectorFailures(failures)) => {
                    for failure in &failures {
                        error!("Connector {} failed: {}", failure.connector, failure.message);
                    }
                    warn!("{} connectors failed", failures.len());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Init { force } => init_config(&cli.config, &manager, force)?,
        Commands::Discover => {
            let connectors = manager.discover_connectors()?;
            if connectors.is_empty() {
                println!("No connectors found in {:?}", config.connector_path);
            } else {
                println!("Found {} connectors:", connectors.len());
                for connector in connectors {
                    println!("{} ({}): {:?}", connector.name, connector.kind, connector.path);
                }
            }
        }
        Commands::Status => {
            let statuses = manager.connector_status();
            if statuses.is_empty() {
                println!("No connectors configured.");
            }
            for status in statuses.values() {
                println!("{} [{}] {}", status.name, status.kind, status.status);
                if !status.description.is_empty() {
                    println!("  {}", status.description);
                }
                if let Some(error) = &status.error {
                    println!("  Error: {}", error);
                }
            }
        }
        Commands::Test { name } => {
            let result = manager.test_connector(&name, None).await?;
            println!(
                "Connector {} succeeded in {}ms after {} attempt(s)",
                result.connector_name, result.duration_ms, result.attempts
            );
        }
        Commands::Lookup { ips } => {
            let geo = Arc::new(GeoManager::new(config.geoip.clone())?);

            if let [ip] = ips.as_slice() {
                let info = geo.lookup(ip).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                let results = geo.batch_lookup(&ips).await;
                for ip in &ips {
                    if let Some(info) = results.get(ip) {
                        println!("{}", serde_json::to_string(info)?);
                    }
                }
            }

            println!("{}", serde_json::to_string_pretty(&geo.cache_stats())?);
        }
        Commands::Services { check } => {
            let geo = GeoManager::new(config.geoip.clone())?;
            for name in geo.available_services() {
                let marker = if name == config.geoip.service { " (active)" } else { "" };
                if !check {
                    println!("{}{}", name, marker);
                    continue;
                }

                match geo.validate_service(&name).await {
                    Ok(()) => println!("{}{}: ok", name, marker),
                    Err(e) => println!("{}{}: {}", name, marker, e),
                }
            }
        }
    }

    Ok(())
}

fn init_config(path: &Path, manager: &ConnectorManager, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists, use --force to overwrite it", path);
    }

    let config = manager.initial_config();
    config.save(path)?;

    println!("Configuration saved to {:?}", path);
    println!("Connector directory: {:?}", config.connector_path);
    println!("{} connectors configured", config.connectors.len());
    Ok(())
}
