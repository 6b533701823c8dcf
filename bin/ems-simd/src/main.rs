//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the sensor simulator daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ems_sim_common::{init_tracing, LogFormat, SimulatorConfig};
use ems_sim_core::{Simulator, StopHandle};
use ems_sim_metrics::{new_registry, spawn_http_server, SimulatorMetrics};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Synthetic energy sensor traffic generator",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to a TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "URL", help = "Override the backend API base URL")]
    api_base_url: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Override the pacing interval")]
    interval_seconds: Option<u64>,

    #[arg(long, value_name = "N", help = "Maximum in-flight deliveries per iteration")]
    concurrency: Option<usize>,

    #[arg(long, value_name = "SEED", help = "Seed the reading generator")]
    seed: Option<u64>,

    #[arg(long, value_name = "FORMAT", help = "Log format: pretty or structured-json")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulator until interrupted")]
    Run,
    #[command(about = "Validate configuration and print the effective settings")]
    CheckConfig,
}

impl Cli {
    fn apply_overrides(&self, config: &mut SimulatorConfig) {
        if let Some(url) = &self.api_base_url {
            config.api_base_url = url.clone();
        }
        if let Some(secs) = self.interval_seconds {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(concurrency) = self.concurrency {
            config.delivery_concurrency = concurrency;
        }
        if let Some(seed) = self.seed {
            config.random_seed = Some(seed);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }

    fn resolve_config(&self) -> Result<SimulatorConfig> {
        let mut config =
            SimulatorConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        self.apply_overrides(&mut config);
        config.validate().context("invalid command-line override")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("ems-simd", &config.logging)?;
            run_simulator(config).await
        }
        Commands::CheckConfig => {
            println!("{}", render_config(&config)?);
            Ok(())
        }
    }
}

fn render_config(config: &SimulatorConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to render configuration")
}

async fn run_simulator(config: SimulatorConfig) -> Result<()> {
    info!(
        api_base_url = %config.api_base_url,
        interval_secs = config.interval.as_secs(),
        concurrency = config.delivery_concurrency,
        "starting sensor simulator"
    );

    let mut simulator =
        Simulator::from_config(&config).context("failed to build simulator")?;

    let metrics_server = if config.metrics.enabled {
        let registry = new_registry();
        let metrics = SimulatorMetrics::new(registry.clone())?;
        simulator = simulator.with_metrics(metrics);
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        None
    };

    tokio::spawn(stop_on_signal(simulator.stop_handle()));

    let report = simulator.run().await?;
    info!(
        iterations = report.iterations,
        attempted = report.attempted,
        delivered = report.delivered,
        "simulator stopped"
    );

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn stop_on_signal(stop: StopHandle) {
    shutdown_signal().await;
    info!("shutdown signal received");
    stop.stop();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_precedence() {
        let cli = Cli::parse_from([
            "ems-simd",
            "--api-base-url",
            "http://backend:9000/api/v1",
            "--interval-seconds",
            "2",
            "--concurrency",
            "4",
            "--seed",
            "7",
            "--log-format",
            "json",
            "check-config",
        ]);
        let mut config = SimulatorConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.api_base_url, "http://backend:9000/api/v1");
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.delivery_concurrency, 4);
        assert_eq!(config.random_seed, Some(7));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let cli = Cli::parse_from(["ems-simd"]);
        let mut config = SimulatorConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config, SimulatorConfig::default());
        assert!(cli.command.is_none());
    }

    #[test]
    fn zero_interval_override_is_rejected() {
        let cli = Cli::parse_from(["ems-simd", "--interval-seconds", "0"]);
        let mut config = SimulatorConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_seed_override_fails_validation_before_rendering() {
        let seed = u64::MAX.to_string();
        let cli = Cli::parse_from(["ems-simd", "--seed", seed.as_str(), "check-config"]);
        let mut config = SimulatorConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.validate().is_err());

        config.random_seed = Some(ems_sim_common::config::MAX_RANDOM_SEED);
        let rendered = render_config(&config).unwrap();
        assert!(rendered.contains("random_seed"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
