use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use doppel::admin::{AccessPolicy, ManagementServer, ServerOptions};
use doppel::imposter::ImposterRegistry;
use doppel::store::{DataStore, FileSystemDataStore, NoOpDataStore, ScriptedDataStore};
use doppel::{config, logging};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "doppel", version, about = "Service virtualization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server
    Start(StartArgs),
    /// Stop a running server via its pidfile
    Stop {
        #[arg(long, default_value = "doppel.pid")]
        pidfile: String,
    },
    /// Stop then start with the given options
    Restart(StartArgs),
    /// Save the running imposters as a replayable config file
    Save(SaveArgs),
    /// Load a config file into a running server, replacing its imposters
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    #[arg(long, default_value_t = 2525)]
    port: u16,
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value = "info")]
    loglevel: String,
    /// Allow user-supplied JavaScript in predicates, responses and behaviors
    #[arg(long)]
    allow_injection: bool,
    #[arg(long)]
    pidfile: Option<String>,
    /// Imposter file to load at startup
    #[arg(long)]
    configfile: Option<String>,
    /// Directory for per-port imposter persistence
    #[arg(long)]
    datadir: Option<String>,
    /// Pipe-separated list of IPs allowed on the management port
    #[arg(long, value_delimiter = '|')]
    ip_whitelist: Vec<String>,
    #[arg(long)]
    apikey: Option<String>,
    /// Value for Access-Control-Allow-Origin on the management API
    #[arg(long)]
    origin: Option<String>,
    /// Restrict the management API to localhost
    #[arg(long)]
    local_only: bool,
    /// JavaScript module providing a custom imposter store
    #[arg(long)]
    imposters_repository: Option<String>,
}

#[derive(Args, Debug)]
struct SaveArgs {
    #[arg(long, default_value = "imposters.json")]
    savefile: String,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 2525)]
    port: u16,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[arg(long)]
    configfile: String,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 2525)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Start(args) => start(args).await,
        Command::Stop { pidfile } => stop(&pidfile),
        Command::Restart(args) => {
            if let Some(pidfile) = &args.pidfile {
                if let Err(e) = stop(pidfile) {
                    error!("stop before restart failed: {e}");
                }
            }
            start(args).await
        }
        Command::Save(args) => save(args).await,
        Command::Replay(args) => replay(args).await,
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    init_logging(&args.loglevel);

    let store: Arc<dyn DataStore> = if let Some(module) = &args.imposters_repository {
        Arc::new(ScriptedDataStore::new(module).context("cannot load imposters repository")?)
    } else if let Some(datadir) = &args.datadir {
        Arc::new(FileSystemDataStore::new(datadir))
    } else {
        Arc::new(NoOpDataStore)
    };

    let registry = ImposterRegistry::new(store, args.allow_injection);
    registry.load_from_store().await;

    if let Some(configfile) = &args.configfile {
        let loaded = config::load(configfile)
            .with_context(|| format!("cannot load config file {configfile}"))?;
        for imposter in loaded.imposters {
            registry
                .create(imposter)
                .await
                .context("cannot create imposter from config file")?;
        }
    }

    if let Some(pidfile) = &args.pidfile {
        std::fs::write(pidfile, std::process::id().to_string())
            .with_context(|| format!("cannot write pidfile {pidfile}"))?;
    }

    let options = ServerOptions {
        port: args.port,
        host: args.host.clone(),
        allow_injection: args.allow_injection,
        origin: args.origin.clone(),
        policy: AccessPolicy {
            local_only: args.local_only,
            ip_whitelist: args.ip_whitelist.clone(),
            api_key: args.apikey.clone(),
        },
    };

    let server = ManagementServer::bind(options, Arc::clone(&registry)).await?;
    let stop_handle = server.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = stop_handle.send(());
        }
    });

    server.run().await?;

    registry.delete_all();
    if let Some(pidfile) = &args.pidfile {
        let _ = std::fs::remove_file(pidfile);
    }
    Ok(())
}

fn stop(pidfile: &str) -> anyhow::Result<()> {
    let pid = std::fs::read_to_string(pidfile)
        .with_context(|| format!("cannot read pidfile {pidfile}"))?;
    let pid = pid.trim();
    let status = std::process::Command::new("kill")
        .arg(pid)
        .status()
        .context("cannot run kill")?;
    anyhow::ensure!(status.success(), "kill {pid} failed");
    let _ = std::fs::remove_file(pidfile);
    Ok(())
}

async fn save(args: SaveArgs) -> anyhow::Result<()> {
    let url = format!(
        "http://{}:{}/imposters?replayable=true",
        args.host, args.port
    );
    let body: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("cannot reach {url}"))?
        .json()
        .await
        .context("server did not return JSON")?;
    let mut text = serde_json::to_string_pretty(&body)?;
    text.push('\n');
    std::fs::write(&args.savefile, text)
        .with_context(|| format!("cannot write {}", args.savefile))?;
    println!("saved imposters to {}", args.savefile);
    Ok(())
}

async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let loaded = config::load(&args.configfile)
        .with_context(|| format!("cannot load {}", args.configfile))?;
    let url = format!("http://{}:{}/imposters", args.host, args.port);
    let response = reqwest::Client::new()
        .put(&url)
        .json(&serde_json::json!({ "imposters": loaded.imposters }))
        .send()
        .await
        .with_context(|| format!("cannot reach {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "replay failed: {}",
        response.status()
    );
    println!("replayed {} into {url}", args.configfile);
    Ok(())
}

fn init_logging(loglevel: &str) {
    let level = match loglevel {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level)),
        )
        .with(logging::RingLayer)
        .try_init();
}
