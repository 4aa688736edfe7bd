//! Standalone scheduler process: loads configuration, builds the data
//! store and process pool, and drives the main loop until a stop is
//! requested or a signal arrives.

use std::sync::Arc;

use flow_scheduler::config::SchedulerConfig;
use flow_scheduler::mainloop::Scheduler;
use flow_scheduler::pool::NullProcessPool;
use flow_scheduler::restart::ShutdownMode;
use graph_window::{GraphDefs, NodeKey};

/// No static graph in this binary; task/family definitions are loaded via
/// `load_definitions` and the graph window walks whatever the store has
/// materialized so far. A real deployment would supply a `GraphDefs` that
/// reads the parsed workflow configuration.
struct EmptyGraph;

impl GraphDefs for EmptyGraph {
    fn children(&self, _node: &NodeKey) -> Vec<NodeKey> {
        Vec::new()
    }
    fn parents(&self, _node: &NodeKey) -> Vec<NodeKey> {
        Vec::new()
    }
    fn def_exists(&self, _name: &str) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!("loading scheduler configuration");
    let config = match SchedulerConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            return Err(format!(
                "configuration required: {e}. Set CONFIG_PATH or place config/flow-scheduler.toml"
            )
            .into());
        }
    };
    tracing::info!(owner = %config.owner, name = %config.name, "configuration loaded");

    let mut scheduler = Scheduler::new(config, Arc::new(NullProcessPool), Arc::new(EmptyGraph));
    scheduler.load_definitions(Vec::new(), Vec::new(), false);
    scheduler.initialize(now_secs());

    tracing::info!("entering main loop");
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                scheduler.request_shutdown(ShutdownMode::RequestCleanly);
            }
            result = scheduler.tick(now_secs()) => {
                match result {
                    Ok(sleep_for) => {
                        if scheduler.state() == flow_scheduler::mainloop::RunState::Stopped {
                            break;
                        }
                        tokio::time::sleep(sleep_for).await;
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "main loop exiting");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("scheduler shut down");
    Ok(())
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
