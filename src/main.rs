//! Console entry point for the coating machine controller.
//!
//! Discovers the machine's serial port (or takes one explicitly), then
//! loops forever: wait for the operator to start, read force and cycle
//! count, run the full sequence, report the outcome, repeat. Recoverable
//! failures never terminate the loop; Ctrl-C does.

use anyhow::Result;
use clap::Parser;
use coater::config::Settings;
use coater::error::CoaterError;
use coater::link::{self, LinkFactory, MockLink, MockLinkFactory, SerialLinkFactory};
use coater::operator::{Checkpoint, ConsoleOperator, OperatorGate};
use coater::process::{ProcessOrchestrator, RunOutcome};
use env_logger::Env;
use log::{error, info, warn};
use serialport::SerialPortType;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "coater", about = "Coating machine process controller")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Serial port to use, bypassing discovery.
    #[arg(long)]
    port: Option<String>,

    /// List visible serial ports with their USB descriptors and exit.
    #[arg(long)]
    list_ports: bool,

    /// Run against a simulated machine instead of real hardware.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }

    let mut settings = Settings::new(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.serial.port = Some(port);
    }

    let operator = Arc::new(ConsoleOperator::new());

    let links: Arc<dyn LinkFactory> = if cli.dry_run {
        info!("Dry run: using a simulated machine");
        // Sensor always reads above the detection threshold.
        Arc::new(MockLinkFactory::new(MockLink::machine(
            settings.detection.threshold + 10,
        )))
    } else {
        let port = match settings.serial.port.clone() {
            Some(port) => port,
            None => match link::discover(&settings.serial.descriptor_hint)? {
                Some(port) => port,
                None => {
                    // Recoverable only in the sense that the operator gets
                    // to acknowledge it before the process exits.
                    operator.confirm(Checkpoint::PortNotFound).await?;
                    return Err(CoaterError::PortNotFound.into());
                }
            },
        };
        info!("Using machine port {port}");
        Arc::new(SerialLinkFactory::new(
            port,
            settings.serial.baud_rate,
            settings.serial.settle(),
        ))
    };

    let orchestrator = ProcessOrchestrator::new(
        settings.clone(),
        links,
        operator.clone(),
        operator.clone(),
    );

    tokio::select! {
        result = run_forever(&orchestrator, &operator, &settings) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

/// The governing loop: every run, completed or aborted, leads back to the
/// start checkpoint.
async fn run_forever(
    orchestrator: &ProcessOrchestrator,
    operator: &ConsoleOperator,
    settings: &Settings,
) -> Result<()> {
    loop {
        operator.confirm(Checkpoint::Start).await?;
        let params = operator.read_parameters(&settings.limits).await?;

        match orchestrator.run(params).await {
            Ok(RunOutcome::Completed) => info!("Run completed"),
            Ok(RunOutcome::Aborted(reason)) => warn!("Run aborted: {reason}"),
            Err(e) => error!("Run failed: {e:#}"),
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let descriptor = match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone().unwrap_or_default(),
            other => format!("{other:?}"),
        };
        println!("{}\t{}", port.port_name, descriptor);
    }
    Ok(())
}
