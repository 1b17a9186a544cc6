// bench-app -- command-line tool for exercising benchlib against real bench
// instruments.
//
// Usage:
//   bench-app parse 5
//   bench-app query TCPIP::192.168.1.100:4000 "*IDN?"
//   bench-app write GPIB0::7::INSTR "LOAD OFF"
//   bench-app block TCPIP::192.168.1.100:4000 "CURVe?" --out curve.bin
//   bench-app trigger --address TCPIP::192.168.1.100:4000 --model DPO7254 \
//       --start 0 --target 10 --step 3
//   bench-app apply --config bench.json
//   bench-app --gpib-adapter /dev/ttyUSB0 query 7 "*IDN?"
//   bench-app models

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use benchlib::scpi::{DEFAULT_MAX_HEADER_BYTES, InstrumentLink};
use benchlib::transport::{ChannelFactory, ChannelProvider, parse_address};
use benchlib::{
    BenchConfig, Instrument, InstrumentOrchestrator, ModelRegistry, OrchestratorEvent, Timings,
    TracingSink, TransportConfig, TriggerEvent, TriggerLevelController, TriggerSession,
    supported_models,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// bench-app -- drives benchlib instruments from the command line.
#[derive(Parser)]
#[command(name = "bench-app", version, about)]
struct Cli {
    /// Per-operation transport timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Serial port of a Prologix-style GPIB controller, used for GPIB
    /// addresses (e.g. /dev/ttyUSB0, COM5).
    #[arg(long)]
    gpib_adapter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show how an address string is interpreted.
    Parse { address: String },

    /// Send a query and print the response line.
    Query { address: String, command: String },

    /// Send a command without reading a response.
    Write { address: String, command: String },

    /// Send a query that returns an IEEE-488.2 binary block and save it.
    Block {
        address: String,
        command: String,
        /// Output file for the block payload.
        #[arg(long)]
        out: PathBuf,
    },

    /// Step an oscilloscope's trigger level towards a target.
    Trigger {
        #[arg(long)]
        address: String,
        /// Oscilloscope model (e.g. DPO7254).
        #[arg(long, default_value = "DPO7000")]
        model: String,
        #[arg(long, allow_hyphen_values = true)]
        start: f64,
        #[arg(long, allow_hyphen_values = true)]
        target: f64,
        #[arg(long)]
        step: f64,
    },

    /// Load a bench configuration file and apply it once.
    Apply {
        #[arg(long)]
        config: PathBuf,
    },

    /// List every supported instrument model.
    Models,
}

impl Cli {
    fn timings(&self) -> Timings {
        Timings {
            transport_timeout_ms: self.timeout_ms,
            ..Timings::default()
        }
    }

    fn factory(&self) -> ChannelFactory {
        let transport = TransportConfig {
            gpib_adapter: self.gpib_adapter.clone(),
        };
        ChannelFactory::from_config(&transport, Duration::from_millis(self.timeout_ms))
    }

    /// Open a link to `address`.
    async fn link(&self, address: &str) -> Result<InstrumentLink> {
        let channel = self
            .factory()
            .create(address)
            .with_context(|| format!("unsupported address '{address}'"))?;
        let mut link = InstrumentLink::new(channel).with_timeout(self.timings().transport_timeout());
        link.connect()
            .await
            .with_context(|| format!("cannot open {address}"))?;
        Ok(link)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_parse(address: &str) -> Result<()> {
    match parse_address(address) {
        Some(spec) => println!("{address}: {spec:?}"),
        None => bail!("unsupported address '{address}'"),
    }
    Ok(())
}

async fn cmd_query(cli: &Cli, address: &str, command: &str) -> Result<()> {
    let mut link = cli.link(address).await?;
    let result = link.query_string(command).await;
    link.disconnect().await.ok();
    println!("{}", result.with_context(|| format!("query '{command}' failed"))?);
    Ok(())
}

async fn cmd_write(cli: &Cli, address: &str, command: &str) -> Result<()> {
    let mut link = cli.link(address).await?;
    let result = link.write(command).await;
    link.disconnect().await.ok();
    result.with_context(|| format!("write '{command}' failed"))?;
    println!("OK");
    Ok(())
}

async fn cmd_block(cli: &Cli, address: &str, command: &str, out: &Path) -> Result<()> {
    let mut link = cli.link(address).await?;
    let result = link
        .query_binary_block(command, DEFAULT_MAX_HEADER_BYTES)
        .await;
    link.disconnect().await.ok();
    let payload = result.with_context(|| format!("block query '{command}' failed"))?;
    std::fs::write(out, &payload).with_context(|| format!("cannot write {}", out.display()))?;
    println!("{} bytes written to {}", payload.len(), out.display());
    Ok(())
}

async fn cmd_trigger(cli: &Cli, address: &str, model: &str, session: TriggerSession) -> Result<()> {
    let timings = cli.timings();
    let channel = cli
        .factory()
        .create(address)
        .with_context(|| format!("unsupported address '{address}'"))?;
    let link = InstrumentLink::new(channel)
        .with_timeout(timings.transport_timeout())
        .shared();
    let scope = ModelRegistry::new(timings.clone())
        .oscilloscope(model, link)
        .with_context(|| format!("unknown oscilloscope model '{model}'"))?;
    scope.connect().await.context("cannot open oscilloscope")?;

    let controller = TriggerLevelController::new(scope.clone()).with_timings(&timings);
    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TriggerEvent::Progress {
                    current_level,
                    step_count,
                }) => println!("step {step_count:>3}: {current_level:.3} V"),
                Ok(TriggerEvent::TargetReached { level }) => println!("target reached at {level:.3} V"),
                Ok(TriggerEvent::Completed { message, .. }) => {
                    println!("{message}");
                    break;
                }
                Ok(TriggerEvent::Error { message }) => {
                    eprintln!("error: {message}");
                    break;
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "Trigger events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let started = controller.start(session).await;
    let outcome = match started {
        Ok(()) => {
            tokio::select! {
                outcome = controller.wait() => outcome,
                _ = tokio::signal::ctrl_c() => {
                    controller.stop();
                    controller.wait().await
                }
            }
        }
        Err(e) => Err(e),
    };
    printer.await.ok();
    scope.disconnect().await.ok();

    let level = outcome.context("trigger tracking did not reach the target")?;
    println!(
        "final level {level:.3} V after {} steps",
        controller.step_count()
    );
    Ok(())
}

async fn cmd_apply(cli: &Cli, path: &Path) -> Result<()> {
    let config = BenchConfig::load(path)?;
    let timings = Timings {
        transport_timeout_ms: cli.timeout_ms,
        ..config.timings.clone()
    };
    let mut transport = config.transport.clone();
    if cli.gpib_adapter.is_some() {
        transport.gpib_adapter = cli.gpib_adapter.clone();
    }
    let factory = ChannelFactory::from_config(&transport, timings.transport_timeout());

    let orchestrator =
        InstrumentOrchestrator::new(Arc::new(factory), Arc::new(TracingSink), timings);
    let mut events = orchestrator.subscribe();
    orchestrator.submit_config(config.snapshot);

    let finished = loop {
        match events.recv().await {
            Ok(OrchestratorEvent::ApplyFinished {
                success,
                instruments,
            }) => break (success, instruments),
            Ok(OrchestratorEvent::Error { message }) => {
                tracing::error!(error = %message, "Apply aborted");
                break (false, 0);
            }
            Ok(other) => tracing::debug!(event = ?other, "Orchestrator event"),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("orchestrator stopped before applying"),
        }
    };
    for name in orchestrator.instrument_names() {
        println!("opened {name}");
    }
    orchestrator.shutdown().await;

    match finished {
        (true, n) => {
            println!("configuration applied: {n} instrument(s)");
            Ok(())
        }
        (false, _) => bail!("configuration apply failed"),
    }
}

fn cmd_models() -> Result<()> {
    let models = supported_models();
    let vendor_width = models.iter().map(|m| m.vendor.len()).max().unwrap_or(6).max(6);
    let name_width = models.iter().map(|m| m.name.len()).max().unwrap_or(5).max(5);

    println!("{:<vendor_width$}  {:<name_width$}  Role", "Vendor", "Model");
    println!("{}", "-".repeat(vendor_width + name_width + 16));
    for m in &models {
        println!("{:<vendor_width$}  {:<name_width$}  {:?}", m.vendor, m.name, m.role);
    }
    println!("\n{} models", models.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Parse { address } => cmd_parse(address),
        Command::Query { address, command } => cmd_query(&cli, address, command).await,
        Command::Write { address, command } => cmd_write(&cli, address, command).await,
        Command::Block {
            address,
            command,
            out,
        } => cmd_block(&cli, address, command, out).await,
        Command::Trigger {
            address,
            model,
            start,
            target,
            step,
        } => {
            let session = TriggerSession {
                start_level: *start,
                target_level: *target,
                step_scale: *step,
            };
            cmd_trigger(&cli, address, model, session).await
        }
        Command::Apply { config } => cmd_apply(&cli, config).await,
        Command::Models => cmd_models(),
    }
}
