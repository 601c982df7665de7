//! `tether` is an administrative command line client for JSONL lab
//! instruments: it discovers instruments on the local network, issues raw
//! queries, reads and patches the permanent settings, and can proxy a
//! USB-connected instrument onto the network for the web UI. Run without
//! a subcommand it finds an instrument and opens its web UI in a browser.

mod settings;
mod start;
mod web;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tether_core::{Controller, Discovery, Endpoint, RecvEnvelope};

/// How long discovery listens for advertisements.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Administrative client for JSONL lab instruments"
)]
struct Cli {
    /// Instrument endpoint, e.g. net://192.168.1.2 or serial://ttyACM0
    #[arg(short, long, global = true, env = "TETHER_ENDPOINT")]
    endpoint: Option<String>,

    /// Log what is going on under the hood
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runs `start` when no subcommand is given.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the instrument's web UI in a browser, hosting a local proxy
    /// if the firmware does not serve one (the default)
    Start,
    /// Search the local network for instruments and print what answers
    Detect {
        /// Print every instrument found within the window, not just the first
        #[arg(long)]
        all: bool,
    },
    /// Send a raw query without payload and print the reply
    Query {
        #[arg(default_value = "help")]
        r#type: String,
    },
    /// Read out the permanent settings, flattened to dotted keys
    NetGet,
    /// Patch the permanent settings ("key=value" or "section.key=value")
    #[command(alias = "set")]
    NetSet {
        #[arg(required = true)]
        settings: Vec<String>,
    },
    /// Serve the WebSocket proxy and optionally the web UI
    Webserver {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8000")]
        listen: SocketAddr,
        /// Directory with static UI assets to host
        #[arg(long)]
        assets: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        None | Some(Command::Start) => {
            let controller = connect(&cli.endpoint).await?;
            start::run(controller).await
        }
        Some(Command::Detect { all }) => detect(all).await,
        Some(Command::Query { r#type }) => {
            let reply = connect(&cli.endpoint).await?.query(&r#type).await?;
            print_reply(reply)
        }
        Some(Command::NetGet) => net_get(&mut connect(&cli.endpoint).await?).await,
        Some(Command::NetSet { settings }) => {
            net_set(&mut connect(&cli.endpoint).await?, &settings).await
        }
        Some(Command::Webserver { listen, assets }) => {
            let controller = connect(&cli.endpoint).await?;
            web::serve(controller, listen, assets).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Use the endpoint the operator gave us, or go looking for one.
async fn connect(endpoint: &Option<String>) -> anyhow::Result<Controller> {
    let endpoint = match endpoint {
        Some(text) => text.parse::<Endpoint>()?,
        None => discover_endpoint().await?,
    };
    Ok(Controller::connect(endpoint).await?)
}

async fn discover_endpoint() -> anyhow::Result<Endpoint> {
    Discovery::start()?
        .find_one(DISCOVERY_WINDOW)
        .await
        .context(
            "no instrument answered on the local network; \
             pass one with --endpoint or TETHER_ENDPOINT",
        )
}

async fn detect(all: bool) -> anyhow::Result<()> {
    let discovery = Discovery::start()?;
    if all {
        let found = discovery.find_all(DISCOVERY_WINDOW).await;
        if found.is_empty() {
            bail!("no instrument answered within {DISCOVERY_WINDOW:?}");
        }
        for endpoint in found {
            println!("{endpoint}");
        }
    } else {
        let endpoint = discovery
            .find_one(DISCOVERY_WINDOW)
            .await
            .with_context(|| format!("no instrument answered within {DISCOVERY_WINDOW:?}"))?;
        println!("{endpoint}");
    }
    Ok(())
}

fn print_reply(reply: RecvEnvelope) -> anyhow::Result<()> {
    ensure_success(&reply)?;
    println!("{}", serde_json::to_string_pretty(&reply.msg)?);
    Ok(())
}

async fn net_get(controller: &mut Controller) -> anyhow::Result<()> {
    let reply = controller.query("net_get").await?;
    ensure_success(&reply)?;
    for (key, value) in settings::flatten(&reply.msg) {
        println!("{key} = {}", settings::display(&value));
    }
    Ok(())
}

/// Fetch the current settings tree, apply the patch locally and submit the
/// merged tree back to the instrument.
async fn net_set(controller: &mut Controller, args: &[String]) -> anyhow::Result<()> {
    let pairs = settings::parse_pairs(args)?;

    let current = controller.query("net_get").await?;
    ensure_success(&current)?;

    let mut tree = current.msg;
    settings::apply_patch(&mut tree, &pairs)?;
    println!("{}", serde_json::to_string_pretty(&tree)?);

    let proof = controller.query_with_payload("net_set", tree).await?;
    ensure_success(&proof)
}

fn ensure_success(reply: &RecvEnvelope) -> anyhow::Result<()> {
    if !reply.is_success() {
        bail!(
            "instrument returned code {} for '{}': {}",
            reply.code,
            reply.ty,
            reply.error
        );
    }
    Ok(())
}
