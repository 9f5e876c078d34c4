//! Dispatch engine CLI: wires the in-memory reference collaborators, loads
//! matching configuration, and drives incidents from the command line for
//! local testing and demos.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use roadcall_dispatch::clock::{Clock, SystemClock};
use roadcall_dispatch::config::{ConfigProvider, MatchingConfig, StaticConfigProvider};
use roadcall_dispatch::dispatch::DispatchEngine;
use roadcall_dispatch::domain::{GeoPoint, Incident, PriorityTier, ServiceType};
use roadcall_dispatch::eventbus::InMemoryEventBus;
use roadcall_dispatch::ids::{Ids, UuidIds, VendorId};
use roadcall_dispatch::stores::{IncidentStore, InMemoryIncidentStore, InMemoryOfferStore};
use roadcall_dispatch::vendor_directory::InMemoryVendorDirectory;

#[derive(Parser)]
#[command(name = "dispatchd")]
#[command(about = "Roadside-assistance dispatch engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML matching-configuration file; falls back to built-in defaults.
    #[arg(long, env = "DISPATCH_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a new incident and start its dispatch run.
    ReportIncident {
        #[arg(long)]
        driver_id: String,
        #[arg(long, value_enum)]
        service_type: CliServiceType,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Seed an available vendor at a coverage center.
    SeedVendor {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 50.0)]
        radius_miles: f64,
    },
    /// Run the engine for a fixed duration, useful for local smoke testing.
    RunFor {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliServiceType {
    Tire,
    Engine,
    Tow,
}

impl From<CliServiceType> for ServiceType {
    fn from(value: CliServiceType) -> Self {
        match value {
            CliServiceType::Tire => ServiceType::Tire,
            CliServiceType::Engine => ServiceType::Engine,
            CliServiceType::Tow => ServiceType::Tow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let config = match &cli.config_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            StaticConfigProvider::from_toml_str(&contents).map_err(|e| format!("invalid config: {e}"))?
        }
        None => StaticConfigProvider::from_defaults(),
    };
    let config = Arc::new(config);

    let directory = Arc::new(InMemoryVendorDirectory::new());
    let incidents = Arc::new(InMemoryIncidentStore::new());
    let offers = Arc::new(InMemoryOfferStore::new());
    let events = Arc::new(InMemoryEventBus::default());
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UuidIds);

    let engine = DispatchEngine::new(
        directory.clone(),
        incidents.clone(),
        offers,
        events,
        config.clone() as Arc<dyn ConfigProvider>,
        clock.clone(),
        ids.clone(),
    );
    engine.subscribe_to_incident_events();

    match cli.command {
        Commands::ReportIncident { driver_id, service_type, lat, lon } => {
            let incident = Incident::new(
                ids.new_incident_id(),
                driver_id,
                service_type.into(),
                GeoPoint { lat, lon },
                PriorityTier::Standard,
                clock.now(),
            );
            let incident_id = incident.id;
            incidents.create(incident).await?;
            engine.handle_incident_created(incident_id);
            println!("incident reported: {incident_id}");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Commands::SeedVendor { lat, lon, radius_miles } => {
            let vendor = seed_vendor(lat, lon, radius_miles);
            let id: VendorId = vendor.id;
            directory.upsert(vendor);
            println!("vendor seeded: {id}");
        }
        Commands::RunFor { seconds } => {
            println!("running for {seconds}s, active runs: {:?}", engine.active_runs());
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            engine.shutdown(Duration::from_secs(5)).await;
        }
    }

    Ok(())
}

fn seed_vendor(lat: f64, lon: f64, radius_miles: f64) -> roadcall_dispatch::domain::Vendor {
    use roadcall_dispatch::domain::{Availability, Capability, PriceSchedule, VendorMetrics};
    use std::collections::HashMap;

    roadcall_dispatch::domain::Vendor {
        id: VendorId::new(),
        capabilities: vec![Capability::TireRepair, Capability::TireReplacement, Capability::EngineRepair, Capability::Towing],
        coverage_center: GeoPoint { lat, lon },
        coverage_radius_miles: radius_miles,
        availability: Availability::Available,
        active_incident: None,
        metrics: VendorMetrics { acceptance_rate: 0.8, rating: 4.5, completion_rate: 0.9 },
        pricing: HashMap::from([
            (ServiceType::Tire, PriceSchedule { base_price: 45.0, per_mile_rate: 1.25 }),
            (ServiceType::Engine, PriceSchedule { base_price: 90.0, per_mile_rate: 1.5 }),
            (ServiceType::Tow, PriceSchedule { base_price: 75.0, per_mile_rate: 2.0 }),
        ]),
    }
}
