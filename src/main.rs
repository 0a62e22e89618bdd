use tracing::info;

use ble_central::{logging, BleCoordinator, Config, PeripheralId, Result, ScanRequest};

mod app_config;
mod commands;

use app_config::{Cli, Commands};
use commands::Output;

#[tokio::main]
async fn main() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => Config::load_from(Some(path))?,
        None => Config::load()?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging)?;
    info!(command = cli.command.name(), "Starting ble-central");

    if let Commands::WriteConfig { path } = &cli.command {
        config.save(path)?;
        println!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    let factory = commands::adapter_factory(cli.simulate);
    let (coordinator, events) =
        BleCoordinator::with_subscription(factory, config.coordinator_config()).await?;
    let output = Output { json: cli.json };

    let default_request = |duration: Option<std::time::Duration>| {
        ScanRequest::new()
            .with_services(config.scan.service_filters.clone())
            .with_duration(duration.unwrap_or(config.scan.default_duration))
    };

    let result = match cli.command {
        Commands::Scan { duration, services } => {
            let mut request = default_request(duration);
            if !services.is_empty() {
                request = request.with_services(services);
            }
            commands::scan(&coordinator, events, request, output).await
        }
        Commands::Connect { id, scan } => {
            let request = default_request(scan);
            commands::connect(&coordinator, events, PeripheralId::new(id), request, output).await
        }
        Commands::Watch => commands::watch(events, output).await,
        Commands::WriteConfig { .. } => Ok(()),
    };

    coordinator.shutdown().await?;
    result
}
