use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use scripthost::config::HostConfig;
use scripthost::events::LoggingListener;
use scripthost::logging::{default_filter, init_logging};
use scripthost::randoms::{default_catalog, RandomEventPool};
use scripthost::scripting::{ExecutionContext, ScriptHandler};
use scripthost::scripts::{create_catalog, DemoWorld};

#[derive(Parser)]
#[command(version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more built-in scripts until they finish or Ctrl-C
    Run {
        /// Script to start; may be repeated
        #[arg(short, long = "script", required = true)]
        scripts: Vec<String>,

        /// Stop everything after this many seconds
        #[arg(long = "for", value_name = "SECS")]
        duration: Option<u64>,
    },
    /// List the built-in scripts and random handlers
    List,
    /// Write an example config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Write the default configuration to the platform config path
fn create_example_config(force: bool) -> anyhow::Result<()> {
    let config_path = HostConfig::config_path()?;

    if config_path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let saved = HostConfig::default().save()?;
    eprintln!("Config file created at: {}", saved.display());

    Ok(())
}

fn list() {
    println!("Scripts:");
    for name in create_catalog().available_scripts() {
        println!("  {}", name);
    }
    println!("Randoms:");
    for entry in default_catalog() {
        println!("  {}", entry.name);
    }
}

async fn run(config: HostConfig, names: Vec<String>, duration: Option<u64>) -> anyhow::Result<()> {
    let catalog = create_catalog();
    let scripts = names
        .iter()
        .map(|name| {
            catalog.create(name).with_context(|| {
                format!(
                    "Unknown script '{}'. Available scripts: {}",
                    name,
                    catalog.available_scripts().join(", ")
                )
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let ctx = ExecutionContext::new(DemoWorld::default());
    let (pool, report) = RandomEventPool::build(&default_catalog(), &ctx, &config.randoms);
    if !report.is_complete() {
        warn!("Some randoms failed to load: {}", report);
    }

    let handler = ScriptHandler::with_randoms(ctx, config.scripting.clone(), pool);
    handler.subscribe(Arc::new(LoggingListener));

    for script in scripts {
        let name = script.manifest().name;
        let id = handler
            .run(script)
            .with_context(|| format!("Failed to start {}", name))?;
        info!("{} running in slot {}", name, id);
    }

    // A limit too far out to represent is no limit
    let deadline = duration
        .and_then(|secs| tokio::time::Instant::now().checked_add(Duration::from_secs(secs)));
    let mut ticker = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping scripts");
                break;
            }
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                info!("Time limit reached, stopping scripts");
                break;
            }
            _ = ticker.tick() => {
                if handler.script_count() == 0 {
                    info!("All scripts finished");
                    break;
                }
            }
        }
    }

    let timeout = config.scripting.join_timeout();
    let shutdown = Arc::clone(&handler);
    let detached = tokio::task::spawn_blocking(move || shutdown.shutdown(timeout)).await?;
    if detached > 0 {
        error!("{} worker(s) did not exit within {:?}", detached, timeout);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = HostConfig::load_or_default()?;
    let _guard = init_logging("cli", config.logging.file, default_filter(cli.debug))?;

    match cli.command {
        Command::Run { scripts, duration } => run(config, scripts, duration).await,
        Command::List => {
            list();
            Ok(())
        }
        Command::InitConfig { force } => create_example_config(force),
    }
}
