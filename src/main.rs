use anyhow::{anyhow, Result};
use clap::Parser;
use proxy_sentinel::{
    error::LoadError,
    logging::{init_logging, LoggerConfig},
    monitor::{report, IpTracker, RetryPolicy, Scheduler, SchedulerConfig},
    proxy::{HttpIdentityResolver, ProxyParser, ProxyType, ResolverConfig},
    tui::MonitorApp,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Live monitor for proxy liveness, latency and egress IP rotation
#[derive(Parser)]
#[command(name = "proxy-sentinel")]
#[command(about = "Live monitor for proxy liveness, latency and egress IP rotation")]
struct Cli {
    /// File with one proxy per line (HOST:PORT or HOST:PORT:USER:PASS)
    #[arg(short, long, default_value = "proxies.txt")]
    proxies: PathBuf,

    /// Seconds between checks of each proxy
    #[arg(short, long, default_value = "20")]
    interval: u64,

    /// Milliseconds between starting successive proxies
    #[arg(short, long, default_value = "50")]
    stagger: u64,

    /// Probe timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Probe attempts per check before a proxy is marked dead
    #[arg(long, default_value = "3")]
    retries: u32,

    /// IP echo endpoint returning {"ip", "city", "region"}
    #[arg(long, default_value = proxy_sentinel::proxy::resolver::DEFAULT_PROBE_URL)]
    probe_url: String,

    /// Proxy type (http, https, socks5)
    #[arg(short = 't', long, default_value = "http")]
    proxy_type: String,

    /// Log session updates instead of drawing the table
    #[arg(long)]
    headless: bool,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_logging(
        LoggerConfig::default()
            .with_directory(&cli.log_dir)
            .with_stdout(cli.headless),
    );

    let ptype = ProxyType::from_str(&cli.proxy_type).ok_or_else(|| {
        anyhow!(
            "Invalid proxy type: {}. Use: http, https, socks5",
            cli.proxy_type
        )
    })?;

    let proxies = ProxyParser::parse_file(&cli.proxies, ptype)?;
    if proxies.is_empty() {
        return Err(LoadError::Empty.into());
    }
    info!("Loaded {} proxies from {:?}", proxies.len(), cli.proxies);

    let interval = Duration::from_secs(cli.interval.max(1));
    let config = SchedulerConfig::new()
        .with_interval(interval)
        .with_stagger(Duration::from_millis(cli.stagger))
        .with_retry(RetryPolicy::new(cli.retries, Duration::from_secs(1)));

    let resolver = HttpIdentityResolver::new(
        ResolverConfig::new()
            .with_timeout(Duration::from_secs(cli.timeout))
            .with_probe_url(cli.probe_url),
    );

    let tracker = Arc::new(IpTracker::new());
    let scheduler = Scheduler::new(proxies, Arc::clone(&tracker), Arc::new(resolver), config);
    let initial = scheduler.snapshots();
    let (tx, rx) = mpsc::unbounded_channel();

    let monitor = tokio::spawn(async move { scheduler.run(tx).await });

    if cli.headless {
        tokio::select! {
            _ = report::log_updates(rx, tracker) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        }
    } else {
        let mut app = MonitorApp::new(initial, tracker, rx, interval);
        app.run().await?;
    }

    monitor.abort();
    Ok(())
}
