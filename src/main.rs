//! `localforge` command line: manual operation of the runtime supervisor.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use localforge::discovery::{EndpointScanner, ScanConfig};
use localforge::models::ModelStore;
use localforge::runtime::{RuntimeLayout, RuntimeSettings};
use localforge::supervisor::{ProcessSupervisor, SupervisorConfig};
use localforge::training::{AdapterRegistry, DatasetFormat, TrainingJobRunner, TrainingRequest};

#[derive(Parser, Debug)]
#[command(
    name = "localforge",
    version,
    about = "Local LLM runtime supervisor: bootstrap, serve, train, discover"
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Write JSON-formatted log lines")]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or verify the runtime's tools
    Bootstrap {
        #[arg(long, help = "Re-run every step even if the runtime looks healthy")]
        repair: bool,
    },

    /// Show the effective settings
    Config {
        #[arg(long, help = "Write the effective settings to <root>/config.yaml")]
        save: bool,
    },

    /// Run the inference server until interrupted
    Serve {
        #[arg(long, value_name = "PATH")]
        model: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_name = "DIR")]
        adapter: Option<PathBuf>,
    },

    /// Run one training job to completion (Ctrl-C cancels)
    Train {
        #[arg(long, value_name = "ID", help = "Catalog identifier recorded in the adapter metadata")]
        model_id: String,
        #[arg(long, value_name = "PATH")]
        model: PathBuf,
        #[arg(long, value_name = "DIR")]
        data: PathBuf,
        #[arg(long)]
        iters: Option<u32>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        batch_size: Option<u32>,
    },

    /// Create or refresh a dataset scaffold
    Dataset {
        name: String,
        #[arg(long, default_value = "chat", help = "chat, completions, or text")]
        format: DatasetFormat,
    },

    /// Manage trained adapters
    Adapters {
        #[command(subcommand)]
        action: Option<AdapterAction>,
    },

    /// Probe localhost for running model servers
    Scan,

    /// Manage downloaded models
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand, Debug)]
enum AdapterAction {
    List,
    Delete { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ModelAction {
    List,
    Download {
        url: String,
        #[arg(long, value_name = "NAME")]
        name: String,
    },
    Verify { path: PathBuf, sha256: String },
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let layout = RuntimeLayout::resolve().context("failed to resolve runtime root")?;
    localforge::init_tracing(&layout, args.json_logs).context("failed to initialize logging")?;
    let settings = RuntimeSettings::load_or_default(&layout);

    match args.command {
        Commands::Bootstrap { repair } => {
            let report = localforge::bootstrap::bootstrap_default(repair).await;
            print_json(&report)?;
            Ok(exit_code(report.succeeded()))
        }

        Commands::Config { save } => {
            print!("{}", serde_yaml::to_string(&settings)?);
            if save {
                settings.save(&layout).map_err(anyhow::Error::msg)?;
                eprintln!("saved {}", layout.config_file().display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Serve {
            model,
            host,
            port,
            adapter,
        } => {
            let host = host.unwrap_or_else(|| settings.server.host.clone());
            let port = port.unwrap_or(settings.server.port);
            let supervisor = ProcessSupervisor::new(layout, SupervisorConfig::from(&settings.server))?;

            let info = supervisor.start(&model, &host, port, adapter.as_deref()).await?;
            print_json(&info)?;
            eprintln!("serving at {}; press Ctrl-C to stop", info.base_url);

            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            supervisor.stop().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Train {
            model_id,
            model,
            data,
            iters,
            learning_rate,
            batch_size,
        } => {
            let request = TrainingRequest {
                model_id,
                model_path: model,
                dataset_path: data,
                iterations: iters.unwrap_or(settings.training.iterations),
                learning_rate: learning_rate.unwrap_or(settings.training.learning_rate),
                batch_size: batch_size.unwrap_or(settings.training.batch_size),
            };
            let runner = TrainingJobRunner::new(layout);

            let job = runner.run(&request);
            tokio::pin!(job);
            let mut cancelled = false;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut job => break outcome?,
                    _ = tokio::signal::ctrl_c(), if !cancelled => {
                        cancelled = runner.cancel();
                        eprintln!("cancelling training job");
                    }
                }
            };

            print!("{}", outcome.log);
            eprintln!(
                "exit code {}; artifacts in {}",
                outcome.exit_code,
                outcome.artifact_dir.display()
            );
            Ok(exit_code(outcome.succeeded()))
        }

        Commands::Dataset { name, format } => {
            let runner = TrainingJobRunner::new(layout);
            let dir = runner.create_dataset_scaffold(&name, format)?;
            println!("{}", dir.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Adapters { action } => {
            let registry = AdapterRegistry::new(layout.adapters_dir());
            match action.unwrap_or(AdapterAction::List) {
                AdapterAction::List => print_json(&registry.list()?)?,
                AdapterAction::Delete { path } => registry.delete(&path)?,
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Scan => {
            let scanner = EndpointScanner::new(ScanConfig::from(&settings.scan))
                .context("failed to build HTTP client")?;
            print_json(&scanner.scan().await)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Models { action } => {
            let store = ModelStore::new(layout.models_dir())?;
            match action {
                ModelAction::List => print_json(&store.list()?)?,
                ModelAction::Download { url, name } => {
                    let mut last_percent = -1.0;
                    let result = store
                        .download(&url, &name, |p| {
                            if p.percent - last_percent >= 5.0 || p.bytes_total == 0 {
                                eprintln!("{:>5.1}%  {:.2} MB/s  eta {}s", p.percent, p.speed_mbps, p.eta_seconds);
                                last_percent = p.percent;
                            }
                        })
                        .await?;
                    print_json(&result)?;
                }
                ModelAction::Verify { path, sha256 } => {
                    let ok = store.verify(&path, &sha256).await?;
                    println!("{}", if ok { "match" } else { "mismatch" });
                    return Ok(exit_code(ok));
                }
                ModelAction::Delete { name } => store.delete(&name)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
