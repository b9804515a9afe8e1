use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use autocal::config::{CommandConfig, SystemConfig};
use autocal::executor::CommandExecutor;
use autocal::store::JsonPlatformStore;
use autocal::{CalibrationController, CalibrationError, CalibrationOutputs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Calibration graph definition (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Platform parameter file, created on first save
    #[arg(short, long, default_value = "platform.json")]
    platform: PathBuf,

    /// Maintain only these nodes and their dependencies (repeatable)
    #[arg(short, long)]
    target: Vec<String>,

    /// Program used for nodes that have no command of their own
    #[arg(long)]
    runner: Option<String>,

    /// Write aggregated parameters and fidelities here as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn write_outputs(path: &Path, outputs: &CalibrationOutputs) -> Result<()> {
    let json = serde_json::to_string_pretty(&outputs.to_report())?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Outputs written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.verbose {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp_secs()
    .init();

    let config = SystemConfig::load(&args.config)?;
    let (nodes, graph) = config.build()?;
    info!("Loaded {} calibration nodes from {}", nodes.len(), args.config.display());

    let fallback = args.runner.map(|program| CommandConfig {
        program,
        args: Vec::new(),
    });
    let executor = CommandExecutor::from_config(&config, fallback);
    let platform = JsonPlatformStore::open(&args.platform)?;

    let mut controller = CalibrationController::new(nodes, graph, executor, platform)?;

    let cancel = controller.cancel_flag();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Stopping after the current measurement...");
        cancel.cancel();
    })?;

    let result = if args.target.is_empty() {
        controller.run_automatic_calibration()
    } else {
        controller.run_targets(args.target.as_slice())
    };

    let outputs = match result {
        Ok(outputs) => outputs,
        Err(CalibrationError::Cancelled) => {
            warn!("Run cancelled, keeping partial results");
            controller.outputs()
        }
        Err(e) => {
            error!("Calibration run failed: {}", e);
            if let Some(path) = &args.output {
                write_outputs(path, &controller.outputs())?;
            }
            return Err(e.into());
        }
    };

    for ((parameter, alias, index), prov) in &outputs.set_parameters {
        info!("  {}.{}[{:?}] = {} ({})", alias, parameter, index, prov.value, prov.node_id);
    }
    for ((name, index), prov) in &outputs.fidelities {
        info!("  fidelity {}[{:?}] = {} ({})", name, index, prov.value, prov.node_id);
    }

    if let Some(path) = &args.output {
        write_outputs(path, &outputs)?;
    }

    info!("Exiting.");
    Ok(())
}
