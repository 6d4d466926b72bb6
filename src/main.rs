use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use causal_lm_gateway::{AppConfig, GenerationEngine, GenerationInvoker, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(model = %config.model_id, device = %config.device, "loading model");

    let engine = load_engine(&config)?;
    let invoker = Arc::new(GenerationInvoker::from_config(engine, &config));
    let router = build_router(invoker);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(feature = "tch-backend")]
fn load_engine(config: &AppConfig) -> anyhow::Result<Arc<dyn GenerationEngine>> {
    let engine = causal_lm_gateway::model::TorchEngine::load(config)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "tch-backend"))]
fn load_engine(_config: &AppConfig) -> anyhow::Result<Arc<dyn GenerationEngine>> {
    anyhow::bail!("built without a model backend; enable the `tch-backend` feature")
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
