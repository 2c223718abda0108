use std::sync::Arc;

use anyhow::{Context, Result};
use visa_tracker::app::AppState;
use visa_tracker::config::{self, DEFAULT_CONFIG_PATH};
use visa_tracker::module::notify::{Mailer, SmtpMailer};
use visa_tracker::module::scheduled::{ScheduledTaskConfig, ScheduledTaskManager};
use visa_tracker::module::slots::HttpFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = config::read_config(&config_path)?;

    let _logging_guard = visa_tracker::logging::init_logging(&config.logging)?;

    tracing::info!("Visa tracker starting...");
    tracing::info!("Server will listen on {}", config.server_address());
    tracing::info!("Availability source: {}", config.scraper.source_url);

    let fetcher = HttpFetcher::new(config.scraper.request_timeout()).context("Failed to build HTTP client")?;

    let mailer: Option<Arc<dyn Mailer>> = match SmtpMailer::new(&config.email) {
        Ok(mailer) => {
            tracing::info!(
                "Email alerts via {}:{} as {}",
                config.email.smtp_server,
                config.email.smtp_port,
                config.email.username
            );
            Some(Arc::new(mailer) as Arc<dyn Mailer>)
        }
        Err(e) => {
            tracing::warn!("Email alerts disabled: {}", e);
            None
        }
    };

    let state = AppState::build(config, Arc::new(fetcher), mailer)
        .await
        .with_context(|| format!("Failed to open data directory {:?}", config.storage.data_dir))?;

    let started_at = state.started_at;
    state.stats.update(|s| s.last_startup = Some(started_at)).await;
    let stats = state.stats.get().await;
    tracing::info!(
        "Loaded {} subscriptions; {} emails sent, {} failed, {} checks performed so far",
        state.subscriptions.count().await,
        stats.emails_sent,
        stats.emails_failed,
        stats.checks_performed
    );

    let mut task_manager = ScheduledTaskManager::new(
        ScheduledTaskConfig::from(&config.scraper),
        state.pipeline.clone(),
    );
    task_manager.start_all();

    let app = visa_tracker::server::router(state);
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server_address()))?;
    tracing::info!("Web interface on http://{}", config.server_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    task_manager.shutdown();
    tracing::info!("Visa tracker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
