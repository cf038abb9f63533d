// TaskFlow headless client
// Wires the client core, optionally signs in, synchronizes and reports.

use anyhow::Context;
use chrono::Utc;
use std::path::PathBuf;
use taskflow::config::BackendConfig;
use taskflow::services::analytics::summarize;
use taskflow::services::export::{write_export, ExportKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskflow=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TaskFlow client");

    let config = BackendConfig::from_env().context("reading backend configuration")?;
    let state = taskflow::app::setup(&config)
        .await
        .context("initializing application")?;

    if let (Ok(email), Ok(password)) = (
        std::env::var("TASKFLOW_EMAIL"),
        std::env::var("TASKFLOW_PASSWORD"),
    ) {
        state.identity.login(&email, &password).await;
    }

    let identity = state.identity.state().await;
    if let Some(error) = &identity.error {
        tracing::error!("Sign-in failed: {}", error);
    }
    match &identity.user {
        Some(user) => tracing::info!("Signed in as {}", user.email),
        None => tracing::info!("Not signed in, loads will fall back to demo data"),
    }

    state.work_items.fetch_projects().await;
    state.work_items.fetch_tasks().await;

    let items = state.work_items.state().await;
    if let Some(error) = &items.error {
        tracing::error!("Synchronization failed: {}", error);
    }

    let summary = summarize(&items.tasks, &items.projects, Utc::now());
    tracing::info!(
        "{} tasks ({} done, {} in progress, {} blocked, {} overdue) across {} projects{}",
        summary.total,
        summary.completed,
        summary.in_progress,
        summary.blocked,
        summary.overdue,
        summary.projects.len(),
        if items.demo_mode { " [demo data]" } else { "" }
    );
    for project in &summary.projects {
        tracing::info!(
            "  {}: {} tasks, {}% complete",
            project.title,
            project.tasks,
            project.progress
        );
    }

    if let Ok(dir) = std::env::var("TASKFLOW_EXPORT_DIR") {
        let kind: ExportKind = std::env::var("TASKFLOW_EXPORT_KIND")
            .unwrap_or_else(|_| "all".to_string())
            .parse()?;
        let path = write_export(
            &PathBuf::from(dir),
            kind,
            &items.tasks,
            &items.projects,
            identity.profile.as_ref(),
        )
        .await
        .context("writing export")?;
        tracing::info!("Export written to {:?}", path);
    }

    state.shutdown().await;
    Ok(())
}
