use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orbital_resolvers::{install, modules, tick_resolver, TickConfig};
use orbital_sys::{Entity, ReportSink, Sys, SysConfig};

#[derive(Parser)]
#[command(name = "orbital", about = "Load manifests into an orbital engine")]
struct Cli {
    /// Load references, e.g. `./` or `./app.json` or `orbital/sys/wire`
    #[arg(required = true)]
    load: Vec<String>,

    /// Directory relative references may not escape (overrides ORBITAL_ROOT)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Manifest name for references ending in `/` (overrides ORBITAL_INDEX)
    #[arg(long)]
    index: Option<String>,

    /// Register the tick resolver before loading
    #[arg(long)]
    tick: bool,

    /// Keep the engine alive this long after loading
    #[arg(long, env = "ORBITAL_LINGER_SECS", default_value_t = 0)]
    linger_secs: u64,

    /// Exit with an error if anything was reported
    #[arg(long)]
    strict: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("orbital=info".parse()?);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    info!("Orbital starting...");

    let mut config = SysConfig::from_env()?;
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    if let Some(index) = cli.index {
        config = config.with_index(index);
    }
    config.log_summary();
    let tick = TickConfig::from_env()?;

    let reports = Arc::new(ReportSink::new());
    let sys = Sys::builder(config)
        .with_modules(modules(tick))
        .capture_reports(reports.clone())
        .build();

    install(&sys).await;
    if cli.tick {
        sys.submit(tick_resolver(tick)).await;
    }

    let settled = sys
        .submit(json!({"uuid": "orbital/cli", "load": cli.load}))
        .await
        .entity();

    let chain: Vec<String> = sys.resolvers().iter().map(Entity::label).collect();
    info!(resolvers = ?chain, "Load finished");
    if let Some(entity) = settled {
        println!("{}", serde_json::to_string_pretty(&entity)?);
    }

    if cli.linger_secs > 0 {
        info!(secs = cli.linger_secs, "Lingering");
        tokio::time::sleep(Duration::from_secs(cli.linger_secs)).await;
    }

    let problems = reports.reports().iter().filter(|r| !r.is_warning()).count();
    info!(reports = reports.len(), problems, "Done");
    if cli.strict && problems > 0 {
        bail!("{problems} problem(s) reported while loading");
    }
    Ok(())
}
