//! ghostnet - authoritative ghost replication with client-side prediction
//!
//! Runs a server, a client, or one server with N clients in one process.

mod config;
mod scripted_input;

use anyhow::{Context, Result};
use config::{NetConfig, DEFAULT_CONFIG_PATH};
use ghostnet_client::MultiplayerClient;
use ghostnet_net::{InputSource, NeutralInput};
use ghostnet_server::MultiplayerServer;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, process};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Extra server ticks in local mode so clients finish before the server stops.
const LOCAL_SERVER_GRACE_TICKS: u64 = 120;

type BoxedInput = Box<dyn InputSource + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Server,
    Client,
    Local,
}

#[derive(Debug)]
struct CliOptions {
    mode: Mode,
    config_path: PathBuf,
    listen: Option<SocketAddr>,
    connect: Option<SocketAddr>,
    clients: usize,
    ticks: Option<u64>,
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting ghostnet v{}", env!("CARGO_PKG_VERSION"));

    let cli = match CliOptions::parse(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            error!("{err:#}");
            eprintln!("{}", CliOptions::usage());
            process::exit(2);
        }
    };
    let mut cfg = NetConfig::load_from_path(&cli.config_path);
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(connect) = cli.connect {
        cfg.connect_addr = connect;
    }

    match cli.mode {
        Mode::Server => run_server(&cfg, cli.ticks).await,
        Mode::Client => {
            let input = make_input(cli.script.as_deref())?;
            run_client(&cfg, cfg.connect_addr, input, cli.ticks).await
        }
        Mode::Local => run_local(&cfg, cli.clients, cli.ticks, cli.script.as_deref()).await,
    }
}

async fn run_server(cfg: &NetConfig, ticks: Option<u64>) -> Result<()> {
    let mut server = MultiplayerServer::bind(cfg.listen_addr, cfg.server(), &cfg.transport())?;
    info!("Server listening on {}", server.local_addr());
    server.run(ticks).await?;
    server.shutdown();
    Ok(())
}

async fn run_client(
    cfg: &NetConfig,
    addr: SocketAddr,
    input: BoxedInput,
    ticks: Option<u64>,
) -> Result<()> {
    let mut client = MultiplayerClient::connect(addr, input, cfg.client(), &cfg.transport())
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    client.run(ticks).await?;
    if client.is_connected() {
        client.disconnect("Client finished").await?;
    }
    Ok(())
}

async fn run_local(
    cfg: &NetConfig,
    clients: usize,
    ticks: Option<u64>,
    script: Option<&Path>,
) -> Result<()> {
    let mut server = MultiplayerServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        cfg.server(),
        &cfg.transport(),
    )?;
    let addr = server.local_addr();
    info!(clients, "Local mode: server on {}", addr);

    let server_ticks = ticks.map(|t| t + LOCAL_SERVER_GRACE_TICKS);
    let server_task: JoinHandle<Result<MultiplayerServer>> = tokio::spawn(async move {
        server.run(server_ticks).await?;
        Ok(server)
    });

    let mut client_tasks: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(clients);
    for index in 0..clients {
        let input = make_input(script)?;
        let cfg = cfg.clone();
        client_tasks.push(tokio::spawn(async move {
            run_client(&cfg, addr, input, ticks)
                .await
                .with_context(|| format!("Client {} failed", index))
        }));
    }

    let mut failures = 0;
    for task in client_tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("{err:#}");
                failures += 1;
            }
            Err(err) => {
                error!("Client task panicked: {err}");
                failures += 1;
            }
        }
    }

    let mut server = server_task.await.context("Server task panicked")??;
    info!(
        ghosts = server.sim().ghosts().count(),
        tick = %server.sim().current_tick(),
        "Local session finished"
    );
    server.shutdown();

    if failures > 0 {
        anyhow::bail!("{} of {} clients failed", failures, clients);
    }
    Ok(())
}

fn make_input(script: Option<&Path>) -> Result<BoxedInput> {
    match script {
        Some(path) => {
            let script = scripted_input::load_script(path)
                .with_context(|| format!("Failed to load script {}", path.display()))?;
            Ok(Box::new(script))
        }
        None => Ok(Box::new(NeutralInput)),
    }
}

impl CliOptions {
    fn usage() -> &'static str {
        "usage: ghostnet <server|client|local> [--config PATH] [--listen ADDR] \
         [--connect ADDR] [--clients N] [--ticks N] [--script PATH]"
    }

    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self> {
        let mode = match args.next().as_deref() {
            Some("server") => Mode::Server,
            Some("client") => Mode::Client,
            Some("local") => Mode::Local,
            Some(other) => anyhow::bail!("unknown mode {:?}", other),
            None => anyhow::bail!("missing mode"),
        };
        let mut opts = CliOptions {
            mode,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            listen: None,
            connect: None,
            clients: 2,
            ticks: None,
            script: None,
        };

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .with_context(|| format!("{} requires a value", flag))
            };
            match arg.as_str() {
                "--config" => opts.config_path = PathBuf::from(value("--config")?),
                "--listen" => {
                    let raw = value("--listen")?;
                    opts.listen = Some(raw.parse().with_context(|| format!("bad address {raw}"))?);
                }
                "--connect" => {
                    let raw = value("--connect")?;
                    opts.connect = Some(raw.parse().with_context(|| format!("bad address {raw}"))?);
                }
                "--clients" => {
                    let raw = value("--clients")?;
                    opts.clients = raw
                        .parse()
                        .with_context(|| format!("--clients must be an integer, got {raw}"))?;
                }
                "--ticks" => {
                    let raw = value("--ticks")?;
                    opts.ticks = Some(
                        raw.parse()
                            .with_context(|| format!("--ticks must be an integer, got {raw}"))?,
                    );
                }
                "--script" => opts.script = Some(PathBuf::from(value("--script")?)),
                other => anyhow::bail!("unknown argument {:?}", other),
            }
        }
        Ok(opts)
    }
}
