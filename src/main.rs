use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use respectful::{
    config::Settings,
    realm::load_realm_specs_from_file,
    RespectfulService,
};

/// Manage shared rate-limit realms and admit actions against them
#[derive(Parser, Debug)]
#[command(name = "respectful", version, about)]
struct Cli {
    /// Config file (defaults to $RESPECTFUL_CONFIG, then ./respectful.config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics after the command completes
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Realm registry operations
    #[command(subcommand)]
    Realms(RealmsCommand),

    /// Admit one action against the given realms
    Admit {
        #[arg(required = true)]
        realms: Vec<String>,

        /// Wait until every realm admits instead of failing
        #[arg(long)]
        wait: bool,
    },

    /// Show the current window of a realm
    Status { realm: String },

    /// Check connectivity to the store
    Health,
}

#[derive(Subcommand, Debug)]
enum RealmsCommand {
    /// List registered realm names
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show a realm's limits
    Show { realm: String },

    /// Register a realm
    Register {
        realm: String,
        max_requests: u64,
        timespan: u64,

        /// Override the configured default safety threshold
        #[arg(long)]
        safety_threshold: Option<u64>,
    },

    /// Register every realm in a YAML file, all or nothing
    Load { file: String },

    /// Replace a realm's limits
    Update {
        realm: String,
        max_requests: u64,
        timespan: u64,
    },

    /// Unregister realms and discard their usage counters
    Unregister {
        #[arg(required = true)]
        realms: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "respectful=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(path.as_path())),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;

    info!(store = %settings.store.url(), "Connecting to realm store");
    let service = RespectfulService::connect(settings)
        .await
        .context("Failed to connect to the realm store")?;

    run(&service, cli.command).await?;

    if cli.metrics {
        print!("{}", service.metrics().encode_text()?);
    }
    Ok(())
}

async fn run(service: &RespectfulService, command: Command) -> Result<()> {
    match command {
        Command::Realms(command) => run_realms(service, command).await?,
        Command::Admit { realms, wait } => {
            service.evaluate(realms.as_slice(), wait).await?;
            println!("admitted: {}", realms.join(", "));
        }
        Command::Status { realm } => {
            let usage = service.realm_usage(&realm).await?;
            println!("{}", serde_json::to_string_pretty(&usage)?);
        }
        Command::Health => {
            service.health_check().await?;
            println!(
                "{}",
                json!({
                    "status": "healthy",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                })
            );
        }
    }
    Ok(())
}

async fn run_realms(service: &RespectfulService, command: RealmsCommand) -> Result<()> {
    match command {
        RealmsCommand::List { json } => {
            let mut names = service.fetch_registered_realms().await?;
            names.sort();
            if json {
                println!("{}", serde_json::to_string(&names)?);
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        RealmsCommand::Show { realm } => {
            let realm = service.realm(&realm).await?;
            println!("{}", serde_json::to_string_pretty(&realm)?);
        }
        RealmsCommand::Register {
            realm,
            max_requests,
            timespan,
            safety_threshold,
        } => {
            let realm = match safety_threshold {
                Some(threshold) => {
                    service
                        .registry()
                        .register_with_threshold(&realm, max_requests, timespan, threshold)
                        .await?
                }
                None => service.register_realm(&realm, max_requests, timespan).await?,
            };
            println!("{}", serde_json::to_string_pretty(&realm)?);
        }
        RealmsCommand::Load { file } => {
            let specs = load_realm_specs_from_file(&file)
                .with_context(|| format!("Failed to read realms from {}", file))?;
            let realms = service.register_realms(specs).await?;
            println!("registered {} realm(s)", realms.len());
        }
        RealmsCommand::Update {
            realm,
            max_requests,
            timespan,
        } => {
            let realm = service.update_realm(&realm, max_requests, timespan).await?;
            println!("{}", serde_json::to_string_pretty(&realm)?);
        }
        RealmsCommand::Unregister { realms } => {
            service.unregister_realms(&realms).await?;
            println!("unregistered: {}", realms.join(", "));
        }
    }
    Ok(())
}
