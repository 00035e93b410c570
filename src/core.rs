use std::sync::Arc;

use tracing::info;

use crate::channels::TelegramChannel;
use crate::config::AppConfig;
use crate::context::ContextAssembler;
use crate::flows::StepEngine;
use crate::gamify::GamificationLedger;
use crate::metrics::MetricsEngine;
use crate::orchestrator::Orchestrator;
use crate::providers::OpenAiProvider;
use crate::state::SqliteStore;
use crate::traits::{Channel, DataStore};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store: Arc<dyn DataStore> = Arc::new(SqliteStore::new(&config.state.db_path).await?);
    info!("State store initialized ({})", config.state.db_path);

    let provider = Arc::new(
        OpenAiProvider::new(
            &config.provider.base_url,
            &config.provider.api_key,
            &config.provider.model,
        )
        .map_err(|e| anyhow::anyhow!(e))?,
    );
    info!(model = %config.provider.model, "Model provider configured");

    let ledger = Arc::new(GamificationLedger::new(store.clone()));
    let metrics = Arc::new(MetricsEngine::new(store.clone(), config.metrics.clone()));
    let engine = Arc::new(StepEngine::new(
        store.clone(),
        ledger,
        &config.flows,
        config.gamification.clone(),
    ));
    let assembler = Arc::new(ContextAssembler::new(
        store.clone(),
        metrics.clone(),
        config.context.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        engine,
        assembler,
        metrics,
        provider,
        &config.chat,
    ));

    let channel = Arc::new(TelegramChannel::new(
        &config.telegram.bot_token,
        config.telegram.allowed_user_ids.clone(),
        orchestrator,
    ));

    info!(channel = channel.name(), "channel starting");
    let dispatcher = tokio::spawn(channel.clone().start_with_retry());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = dispatcher => {
            // start_with_retry loops forever; reaching here means the task
            // itself died.
            result?;
        }
    }

    Ok(())
}
