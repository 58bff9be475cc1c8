use anyhow::Result;
use clap::{Parser, Subcommand};
use conductor::config::{self, Config};
use conductor::events::EventRouter;
use conductor::lifecycle::LifecycleManager;
use conductor::plugins::{builtin, PluginRegistry};
use conductor::sessions::{FileSessionStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Supervise coding-agent sessions and route their events")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every session until interrupted
    Watch {
        /// Poll interval in seconds (overrides config)
        #[arg(long, short)]
        interval: Option<u64>,
    },
    /// Check one session now and print the report as JSON
    Check { session_id: String },
    /// List tracked sessions
    Sessions,
    /// List registered plugins
    Plugins,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conductor=info".parse()?),
        )
        .init();

    let config = config::load(args.config.as_deref())?;

    let registry = Arc::new(PluginRegistry::new());
    builtin::register_builtins(&registry);

    match args.command {
        Command::Plugins => {
            for (slot, name) in registry.registered() {
                println!("{:<10} {}", slot, name);
            }
            Ok(())
        }
        Command::Sessions => {
            let store = open_store(&config)?;
            let sessions = store.list().await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
        Command::Check { session_id } => {
            let manager = build_manager(registry, &config)?;
            let report = manager.check(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Watch { interval } => {
            let manager = build_manager(registry, &config)?;
            let interval = interval
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or_else(|| config.polling.interval());

            let mut events = manager.subscribe(256);
            manager.start(interval);

            loop {
                tokio::select! {
                    Some(event) = events.recv() => {
                        println!(
                            "[{}] {:<7} {} {}: {}",
                            event.timestamp().format("%H:%M:%S"),
                            event.priority(),
                            event.session_id(),
                            event.event_type(),
                            event.message()
                        );
                    }
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        break;
                    }
                }
            }

            manager.stop();
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<FileSessionStore> {
    let path = config.sessions_path()?;
    tracing::debug!("Using session file {}", path.display());
    Ok(FileSessionStore::new(path))
}

fn build_manager(registry: Arc<PluginRegistry>, config: &Config) -> Result<LifecycleManager> {
    let store: Arc<dyn SessionStore> = Arc::new(open_store(config)?);
    let router = Arc::new(EventRouter::new(Arc::clone(&registry), config));
    for (name, e) in router.unresolvable() {
        tracing::warn!("Notifier '{}' will fail every delivery: {}", name, e);
    }
    Ok(LifecycleManager::new(registry, store, router, config))
}
