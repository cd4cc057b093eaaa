use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execbridge_client::{ApiOutcome, ClientFactory, SimulatedClientConfig, SimulatedRestClient};
use execbridge_core::RestClient;
use execbridge_executor::{BridgeConfig, Outcome};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "execbridge")]
#[command(about = "Drive the non-blocking exchange client against a simulated exchange")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Pool configuration file (TOML)
    #[arg(short, long, env = "EXECBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a handful of calls and print each callback outcome
    Demo,

    /// Submit many delayed calls and report delivery and timing
    Stress {
        /// Number of calls to submit
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,

        /// Simulated latency of each call, in milliseconds
        #[arg(short, long, default_value = "5")]
        delay_ms: u64,

        /// Override the request pool size
        #[arg(long)]
        request_workers: Option<usize>,

        /// Override the response pool size
        #[arg(long)]
        response_workers: Option<usize>,
    },

    /// Print the effective pool configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo => run_demo(&config)?,
        Commands::Stress {
            count,
            delay_ms,
            request_workers,
            response_workers,
        } => {
            let mut config = config;
            if let Some(workers) = request_workers {
                config.request.workers = workers;
            }
            if let Some(workers) = response_workers {
                config.response.workers = workers;
            }
            run_stress(&config, count, Duration::from_millis(delay_ms))?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

fn describe<T: Debug>(label: &'static str, outcome: ApiOutcome<T>) -> String {
    match outcome {
        Outcome::Success(value) => format!("{label:<14} ok     {value:?}"),
        Outcome::Failure(fault) => format!("{label:<14} failed {fault}"),
    }
}

fn run_demo(config: &BridgeConfig) -> Result<()> {
    let factory = ClientFactory::start(config)?;
    let exchange: Arc<dyn RestClient> = Arc::new(SimulatedRestClient::new(SimulatedClientConfig {
        latency: Duration::from_millis(50),
        ..Default::default()
    }));
    let client = factory.callback_client(exchange);
    let (tx, rx) = mpsc::channel::<String>();

    let sender = tx.clone();
    client.ping(move |o| sender.send(describe("ping", o)).unwrap_or(()))?;
    let sender = tx.clone();
    client.server_time(move |o| sender.send(describe("server_time", o)).unwrap_or(()))?;
    let sender = tx.clone();
    client.price("BTCUSDT", move |o| sender.send(describe("price", o)).unwrap_or(()))?;
    let sender = tx.clone();
    client.account(move |o| {
        let usdt = o.into_result().map(|account| account.asset_balance("USDT").free);
        let line = match usdt {
            Ok(free) => format!("{:<14} ok     USDT free {free}", "account"),
            Err(fault) => format!("{:<14} failed {fault}", "account"),
        };
        sender.send(line).unwrap_or(())
    })?;
    client.price("NOPEUSDT", move |o| tx.send(describe("bad_symbol", o)).unwrap_or(()))?;

    // The channel closes once every callback has run.
    for line in rx.iter() {
        println!("{line}");
    }

    println!("{}", serde_json::to_string_pretty(&factory.stats())?);
    factory.shutdown();
    Ok(())
}

fn run_stress(config: &BridgeConfig, count: usize, delay: Duration) -> Result<()> {
    let factory = ClientFactory::start(config)?;
    let exchange = Arc::new(SimulatedRestClient::new(SimulatedClientConfig {
        latency: delay,
        ..Default::default()
    }));
    let client = factory.callback_client(exchange);
    let (tx, rx) = mpsc::channel::<bool>();

    tracing::info!(
        count,
        delay_ms = delay.as_millis() as u64,
        request_workers = config.request.workers,
        response_workers = config.response.workers,
        "Starting stress run"
    );

    let started = Instant::now();
    for _ in 0..count {
        let tx = tx.clone();
        client.server_time(move |o| tx.send(o.is_success()).unwrap_or(()))?;
    }
    let submitted_in = started.elapsed();
    drop(tx);

    let (mut succeeded, mut failed) = (0u64, 0u64);
    for ok in rx.iter() {
        if ok {
            succeeded += 1;
        } else {
            failed += 1;
        }
    }
    let elapsed = started.elapsed();

    // Ideal wall time if the request pool were the only bottleneck.
    let batches = count.div_ceil(config.request.workers.max(1)) as u64;
    let ideal_ms = batches * delay.as_millis() as u64;

    let report = serde_json::json!({
        "count": count,
        "delivered": succeeded + failed,
        "succeeded": succeeded,
        "failed": failed,
        "submit_ms": submitted_in.as_millis() as u64,
        "elapsed_ms": elapsed.as_millis() as u64,
        "ideal_ms": ideal_ms,
        "stats": factory.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    factory.shutdown();
    Ok(())
}
