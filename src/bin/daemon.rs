// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! rpi-fanctl: polls the processor temperature and drives the fan PWM
//! until interrupted. With `--test` it sweeps the fan through a fixed duty
//! ramp instead, for checking the wiring.

use anyhow::Context;
use clap::Parser;
use rpi_fan_control::config::{self, Config, OutputConfig};
use rpi_fan_control::control_loop::ControlLoop;
use rpi_fan_control::pwm::ConfiguredOutput;
use rpi_fan_control::sensor::ConfiguredSensor;
use rpi_fan_control::sweep;
use std::sync::Arc;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "rpi-fanctl", about = "Temperature-driven PWM fan controller")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Sweep the fan through a fixed duty ramp instead of following the
    /// temperature.
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Log PWM commands instead of driving the configured output.
    #[arg(long)]
    dry_run: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    write_default_config: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));

    if cli.write_default_config {
        config::save_config(&config_path, &Config::default())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        return Ok(());
    }

    let cfg = config::load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    cfg.validate().context("refusing to start")?;

    // Registered before the output is opened so an early SIGTERM still
    // reaches the guard.
    let signals = ShutdownSignals::install();

    let output_config = if cli.dry_run {
        OutputConfig::DryRun
    } else {
        cfg.fan.output.clone()
    };
    let output = ConfiguredOutput::open(&output_config, cfg.fan.pwm_frequency_hz)
        .context("failed to open the fan PWM output")?;

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();

    // Signal handler
    tokio::spawn(async move {
        signals.recv().await;
        log::info!("Received shutdown signal");
        shutdown_signal.notify_one();
    });

    if cli.test {
        sweep::run_sweep(output, sweep::SWEEP_STEP_INTERVAL, &shutdown).await?;
        log::info!("Fan test finished");
        return Ok(());
    }

    let settings = cfg.control_settings()?;
    log::info!(
        "Step table {:?}°C -> {:?}%, polling every {:?}",
        settings.temperatures,
        settings.duties,
        settings.poll_interval
    );

    let sensor = ConfiguredSensor::from_config(&cfg.sensor);
    let mut control = ControlLoop::initialize(settings, sensor, output)
        .await
        .context("failed to start fan control")?;
    control.run(&shutdown).await?;

    log::info!("Fan control stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// SIGINT and SIGTERM listeners. Once installed, a signal is queued until
/// [`ShutdownSignals::recv`] picks it up instead of killing the process.
struct ShutdownSignals {
    #[cfg(unix)]
    listeners: Option<(
        tokio::signal::unix::Signal,
        tokio::signal::unix::Signal,
    )>,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn install() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = || -> std::io::Result<_> {
            Ok((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            ))
        };
        match listen() {
            Ok(listeners) => Self {
                listeners: Some(listeners),
            },
            Err(e) => {
                log::warn!("Cannot listen for SIGINT/SIGTERM: {e}");
                Self { listeners: None }
            }
        }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    /// Resolve on the first SIGINT or SIGTERM.
    async fn recv(self) {
        #[cfg(unix)]
        if let Some((mut int, mut term)) = self.listeners {
            tokio::select! {
                _ = int.recv() => {}
                _ = term.recv() => {}
            }
            return;
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_recv_is_not_lost() {
        let signals = ShutdownSignals::install();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM was not delivered to the listener");
    }
}
