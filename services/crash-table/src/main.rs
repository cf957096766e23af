use std::future::IntoFuture;

use anyhow::Context;
use aviator_crash_table::{build_config, build_state, router, run_ticks, Args};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let state = build_state(&config)?;
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    info!(addr = %config.listen, "crash table service listening");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("http server failed")?;
        }
        result = run_ticks(state) => {
            if let Err(err) = &result {
                error!("round loop stopped: {err:#}");
            }
            result?;
        }
    }
    Ok(())
}
