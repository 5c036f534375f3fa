use clap::Parser;

use shift_engine::{Engine, PipelineKind, ShiftConfig};
use storage_memory::MemoryStoreFactory;

#[derive(Parser)]
#[command(name = "shift-server", about = "Online schema migration server")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "config.toml", env = "SHIFT_CONFIG")]
    config: String,

    /// Print every job's sink store as JSON before exiting.
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let config = match ShiftConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    tracing::info!(
        schemas = config.schemas.len(),
        stores = config.stores.len(),
        migrations = config.migrations.len(),
        jobs = config.jobs.len(),
        "bootstrapping engine"
    );
    let engine = match Engine::bootstrap(config, &MemoryStoreFactory).await {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap engine");
            std::process::exit(1);
        }
    };

    let mut failed = engine.wait_bulk().await.is_err();

    if !failed && engine.jobs().iter().any(|j| j.kind() == PipelineKind::Tail) {
        tracing::info!("bulk phase done, tailing changes; press Ctrl+C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
        tracing::info!("shutting down...");
    }

    engine.shutdown().await;

    if cli.dump {
        let mut sinks: Vec<&str> = engine.config().jobs.iter().map(|j| j.sink.as_str()).collect();
        sinks.sort_unstable();
        sinks.dedup();
        for sink in sinks {
            match engine.dump(sink).await {
                Ok(records) => {
                    let doc = serde_json::json!({ "store": sink, "records": records });
                    println!("{doc:#}");
                }
                Err(e) => {
                    tracing::error!(store = %sink, error = %e, "dump failed");
                    failed = true;
                }
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
