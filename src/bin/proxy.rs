//! Aurora-Swarm reverse proxy — CLI entry point.
//!
//! Multiplexes every agent endpoint in a hostfile behind one TCP port so
//! a single SSH tunnel (or load balancer) is enough to reach the whole
//! fleet.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use aurora_swarm::proxy::{start_server, AppState};
use aurora_swarm::{parse_hostfile, Endpoint};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_HOSTFILE: &str = "AURORA_SWARM_HOSTFILE";

#[derive(Parser, Debug)]
#[command(name = "aurora-swarm-proxy")]
#[command(version = aurora_swarm::VERSION)]
#[command(about = "Reverse HTTP proxy multiplexing a fleet of agent endpoints behind one port")]
struct Args {
    /// Path to the hostfile listing agent endpoints. Falls back to
    /// AURORA_SWARM_HOSTFILE when omitted.
    #[arg(short = 'f', long = "hostfile")]
    hostfile: Option<PathBuf>,

    /// Address to bind the proxy server to.
    #[arg(long = "host", default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = 9090)]
    port: u16,

    /// Maximum simultaneous outbound connections per downstream host.
    #[arg(long = "connector-limit", default_value_t = 1024)]
    connector_limit: usize,

    /// Default upstream request timeout in seconds; overridable per
    /// request via the `X-Timeout` header.
    #[arg(short = 't', long = "timeout", default_value_t = 300.0)]
    timeout: f64,

    /// Log level filter, e.g. "info", "debug", "aurora_swarm=debug".
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("aurora-swarm-worker")
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("aurora_swarm={}", args.log_level).parse()?),
        )
        .init();

    info!("aurora-swarm-proxy v{}", aurora_swarm::VERSION);

    let hostfile_path = args
        .hostfile
        .or_else(|| std::env::var(ENV_HOSTFILE).ok().map(PathBuf::from));
    let Some(hostfile_path) = hostfile_path else {
        error!("no hostfile provided; pass --hostfile or set {ENV_HOSTFILE}");
        std::process::exit(1);
    };

    let endpoints: Vec<Endpoint> = match parse_hostfile(&hostfile_path) {
        Ok(eps) if eps.is_empty() => {
            error!("hostfile {} contains no endpoints", hostfile_path.display());
            std::process::exit(1);
        }
        Ok(eps) => eps,
        Err(e) => {
            error!("failed to parse hostfile {}: {e}", hostfile_path.display());
            std::process::exit(1);
        }
    };
    info!(agents = endpoints.len(), "loaded hostfile");

    let state = AppState::new(endpoints, args.connector_limit, Duration::from_secs_f64(args.timeout))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {}:{}: {e}", args.host, args.port))?;

    if let Err(e) = start_server(state, addr).await {
        error!("proxy server error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
