use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bounded_generation_service::{
    AppConfig, EngineHandle, Generator, GeneratorSettings, build_router,
    engine::{LoadOptions, default_loader},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        ?config.listen_addr,
        strategy = %config.strategy,
        min_len = config.min_len,
        max_len = config.max_len,
        "starting bounded generation service"
    );

    // The model itself is loaded by the first request that needs it.
    let engine = Arc::new(EngineHandle::new(
        LoadOptions::from_config(&config),
        default_loader(),
    ));
    let generator = Arc::new(Generator::new(
        engine,
        GeneratorSettings::from_config(&config),
    ));
    let router = build_router(config.clone(), generator);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
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
