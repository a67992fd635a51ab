//! memocache demo
//!
//! Runs the engine against two small scenarios and prints the resulting
//! cache reports:
//!
//! - `parse`: plain expire-after-write memoization
//! - `say_hi`: refresh-after-write, showing the stale value served while the
//!   background reload runs, then the refreshed one

use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use memocache::{Arg, ByteSize, CacheDescriptor, Engine, EngineConfig, Error, Result, TimeUnit};

// =============================================================================
// CLI Arguments
// =============================================================================

/// memocache - in-process memoizing cache engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML engine configuration
    #[arg(long, env = "MEMOCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Bypass caching; every call runs its loader
    #[arg(long, env = "MEMOCACHE_DISABLED")]
    disabled: bool,

    /// Aggregate memory budget, e.g. "64MB"
    #[arg(long, env = "MEMOCACHE_GLOBAL_BUDGET")]
    global_budget: Option<String>,

    /// Print Prometheus text exposition after the run
    #[arg(long)]
    print_metrics: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if args.disabled {
        config.disabled = true;
    }
    if let Some(budget) = &args.global_budget {
        config.global_memory_budget = Some(budget.parse::<ByteSize>()?);
    }

    info!("Starting memocache demo");
    info!("  Disabled: {}", config.disabled);
    info!("  Global budget: {:?}", config.global_memory_budget);

    let mut builder = Engine::builder(config);
    if args.print_metrics {
        builder = builder.with_prometheus();
    }
    let engine = builder.build()?;
    let tasks = engine.start_background()?;

    let demo = engine.clone();
    tokio::task::spawn_blocking(move || run_demo(&demo))
        .await
        .map_err(|e| Error::Internal(format!("demo task failed: {}", e)))??;

    let reports = engine.reports();
    println!("{}", serde_json::to_string_pretty(&reports)?);

    if args.print_metrics {
        print!("{}", engine.render_metrics()?);
    }

    tasks.shutdown().await;
    engine.shutdown();
    info!("memocache demo complete");
    Ok(())
}

// =============================================================================
// Scenarios
// =============================================================================

fn run_demo(engine: &Engine) -> Result<()> {
    parse_scenario(engine)?;
    greeting_scenario(engine)
}

fn parse(engine: &Engine, input: &'static str) -> Result<i64> {
    let descriptor = CacheDescriptor::new(10, TimeUnit::Seconds);
    let value = engine.get_or_compute("Demo::parse", &descriptor, vec![Arg::new(input)], move || {
        info!(input, "Parsing");
        input.parse::<i64>()
    });
    value
        .map(|v| *v)
        .map_err(|e| Error::Internal(format!("parse failed: {}", e)))
}

fn parse_scenario(engine: &Engine) -> Result<()> {
    for input in ["1", "2", "1"] {
        let value = parse(engine, input)?;
        println!("parse({:?}) = {}", input, value);
    }
    Ok(())
}

fn say_hi(engine: &Engine, name: &'static str) -> Result<String> {
    let descriptor = CacheDescriptor::new(2_000, TimeUnit::Millis).with_refresh(200);
    let value = engine.get_or_compute("Demo::say_hi", &descriptor, vec![Arg::new(name)], move || {
        Ok::<_, Error>(format!(
            "Hi {} @{}",
            name,
            chrono::Local::now().format("%H:%M:%S%.3f")
        ))
    })?;
    Ok(value.as_ref().clone())
}

fn greeting_scenario(engine: &Engine) -> Result<()> {
    println!("say_hi = {}", say_hi(engine, "Alice")?);

    // Past the refresh point: served immediately, reload scheduled
    thread::sleep(Duration::from_millis(300));
    println!("say_hi = {}", say_hi(engine, "Alice")?);

    // Reload has landed
    thread::sleep(Duration::from_millis(350));
    println!("say_hi = {}", say_hi(engine, "Alice")?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
