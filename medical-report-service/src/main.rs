use anyhow::Context;
use medical_report_service::{AppConfig, create_app};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("medical_report_service=info,report_flow=info,tower_http=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let app = create_app(&config).context("failed to build the report client")?;

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Medical Report Service starting on {}", addr);
    info!("API overview available at http://{}/", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Sessions endpoint: POST http://{}/reports/sessions", addr);
    info!(
        "Auto-analysis on file selection: {}",
        config.session.auto_analyze_on_select
    );

    axum::serve(listener, app).await?;

    Ok(())
}
