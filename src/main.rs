use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use spam_pipeline::config::PipelineConfig;
use spam_pipeline::service::{Fixture, MailService, StaticMailService};
use spam_pipeline::stages::report_pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let fixture_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SPAM_FIXTURE").ok());

    let fixture = match &fixture_path {
        Some(path) => Fixture::from_path(path)
            .with_context(|| format!("failed to load fixture from {path}"))?,
        None => Fixture::default(),
    };

    let config = PipelineConfig::from_env();

    let emails = if fixture.emails.is_empty() {
        read_stdin_emails().await?
    } else {
        fixture.emails.clone()
    };

    let fixture_label = fixture_path.as_deref().unwrap_or("(none)");
    eprintln!("spam-report v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Fixture: {fixture_label}");
    eprintln!("   Emails: {}", emails.len());
    eprintln!("   Max users per batch: {}", config.max_users_batch);
    eprintln!("   Max concurrent spam checks: {}", config.max_spam_checks);
    if let Some(timeout) = config.call_timeout {
        eprintln!("   Call timeout: {}ms", timeout.as_millis());
    }

    let service: Arc<dyn MailService> = Arc::new(StaticMailService::from_fixture(&fixture));
    let (failures_tx, mut failures_rx) = tokio::sync::mpsc::unbounded_channel();

    let run = report_pipeline(service, &config, emails, Some(failures_tx))?
        .run()
        .await;

    let lines = run.lines();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in &lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;

    let mut dropped = 0usize;
    while let Ok(failure) = failures_rx.try_recv() {
        tracing::debug!(stage = %failure.stage, reason = %failure.reason, "Dropped unit of work");
        dropped += 1;
    }

    tracing::info!(
        lines = lines.len(),
        dropped,
        failed_stages = run.failed_stages.len(),
        "Report complete"
    );
    for failed in &run.failed_stages {
        tracing::warn!(error = %failed, "Stage did not finish cleanly");
    }

    Ok(())
}

/// One address per non-empty stdin line.
async fn read_stdin_emails() -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut emails = Vec::new();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if !line.is_empty() {
            emails.push(line.to_string());
        }
    }
    Ok(emails)
}
