//! nodeforge service
//!
//! Discovers node types from an automation engine, keeps the generated tool
//! set fresh, and answers one-shot queries from the command line:
//! - `nodeforge` runs discovery on a schedule until interrupted
//! - `nodeforge select "<query>"` ranks tools for a task
//! - `nodeforge search <text>` does a plain substring lookup

use anyhow::{Context, Result};
use clap::Parser;
use nf_core::{config, EngineConfig, ToolContext};
use nf_dynamic_loader::DynamicToolRegistry;
use nf_tools::HttpCapabilitySource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nodeforge")]
#[command(about = "Dynamic tool discovery and selection for automation engines")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Automation engine base URL (overrides N8N_API_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Seconds between scheduled discovery runs
    #[arg(long, default_value = "3600")]
    refresh_interval_secs: u64,

    /// Run discovery once, print statistics and exit
    #[arg(long)]
    once: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Rank tools for a task description
    Select {
        query: String,

        /// Restrict scoring to a category
        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value = "10")]
        max_tools: usize,

        #[arg(long, default_value = "0.3")]
        threshold: f64,
    },
    /// Substring search over tool names and descriptions
    Search {
        query: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("nodeforge=info".parse()?)
        .add_directive("nf_dynamic_loader=info".parse()?)
        .add_directive("nf_tools=info".parse()?)
        .add_directive("nf_cache=warn".parse()?);

    if std::env::var("NF_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/nodeforge/environment (if exists)
    let env_file = config::load_environment();
    init_tracing()?;

    let args = Args::parse();

    let mut config = EngineConfig::from_env().context("invalid engine configuration")?;
    if let Some(base_url) = args.base_url {
        config.source.base_url = base_url;
    }
    config.validate()?;
    if let Some(path) = env_file {
        info!("Environment loaded from {}", path);
    }

    let source = Arc::new(HttpCapabilitySource::new(&config.source)?);
    let engine = DynamicToolRegistry::new(config, source)?;

    let stats = engine.initialize().await?;
    if stats.fallback_active {
        warn!("Running with the fallback tool set");
    }

    match args.command {
        Some(Commands::Select {
            query,
            category,
            max_tools,
            threshold,
        }) => {
            let mut context = ToolContext::new(query)
                .with_max_tools(max_tools)
                .with_priority_threshold(threshold);
            if let Some(category) = category {
                context = context.with_category(category);
            }
            let selection = engine.select_tools_for_context(&context).await?;
            for line in &selection.reasoning {
                println!("{}", line);
            }
        }
        Some(Commands::Search { query, limit }) => {
            for tool in engine.search_tools(&query, limit).await {
                println!("{:<40} {}", tool.name, tool.description);
            }
        }
        None if args.once => {
            let statistics = engine.get_statistics().await;
            println!("{}", serde_json::to_string_pretty(&statistics)?);
        }
        None => run(&engine, Duration::from_secs(args.refresh_interval_secs.max(1))).await,
    }

    engine.destroy().await;
    Ok(())
}

/// Scheduled discovery until ctrl-c
async fn run(engine: &DynamicToolRegistry, every: Duration) {
    info!("Scheduled discovery every {:?}", every);
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; initialize already ran discovery
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.refresh_discovery_cache().await {
                    Ok(stats) => info!(
                        "Scheduled discovery: {} tools in {}ms",
                        stats.tools_generated, stats.duration_ms
                    ),
                    Err(e) => error!("Scheduled discovery failed: {}", e),
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Signal handler failed: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }
}
