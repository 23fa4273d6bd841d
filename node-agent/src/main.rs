use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use node_agent::{
    api, config::Config, registry::WorkerRegistry, transport::JsonClientFactory, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "node_agent=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        kill_worker_timeout_ms = config.kill_worker_timeout.as_millis() as u64,
        "node agent starting"
    );

    // Worker registry; grace timers and RPC completions run on this runtime.
    let registry = WorkerRegistry::new(Handle::current());

    // Sweep exited workers
    {
        let reg = Arc::clone(&registry);
        tokio::spawn(reg.run_reaper(config.reap_interval));
    }

    let state = Arc::new(AppState {
        client_factory: Arc::new(JsonClientFactory::new(
            Handle::current(),
            config.rpc_call_timeout,
        )),
        registry: Arc::clone(&registry),
        config: config.clone(),
    });

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    let killed = registry.kill_all(false);
    info!(killed, "node agent shutting down");
    if killed > 0 {
        // Give pending grace timers the chance to escalate before the runtime stops.
        tokio::time::sleep(config.kill_worker_timeout + Duration::from_millis(50)).await;
    }
    Ok(())
}
