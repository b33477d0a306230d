use anyhow::Context;
use coachlink_client::{SessionOrchestrator, Settings};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Connectivity and quota check against the configured backend: resolves an
/// endpoint, lists the configured user's conversations and logs each one's
/// allowances.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        environment = %config.environment,
        candidates = ?config.candidate_urls(),
        "Configuration loaded"
    );

    let orchestrator = SessionOrchestrator::from_settings(&config)?;

    let base_url = orchestrator
        .gateway()
        .resolver()
        .resolve()
        .await
        .context("No backend endpoint reachable")?;
    info!(base_url = %base_url, "Backend reachable");

    let conversations = orchestrator
        .list_conversations()
        .await
        .context("Failed to list conversations")?;
    info!(count = conversations.len(), user = %config.identity.user_id, "Conversations loaded");

    for conversation in &conversations {
        let quota = orchestrator.quota();
        let clips = quota.get_clip_quota(&conversation.id).await;
        let daily = quota.get_daily_message_quota(&conversation.id).await;

        if clips.chat_expiry.is_expired {
            warn!(conversation = %conversation.id, "Chat expired");
        }
        info!(
            conversation = %conversation.id,
            coach = %conversation.coach_id,
            clips_remaining = clips.remaining,
            clips_total = clips.total,
            days_remaining = ?clips.chat_expiry.days_remaining,
            messages_remaining = daily.remaining,
            messages_total = daily.total,
            "Quota"
        );
    }

    orchestrator.shutdown().await;
    Ok(())
}
