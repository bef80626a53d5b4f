//! Component wiring and lifetime management
//!
//! Builds the stores, the context window actor, the executor, and the
//! reasoners; starts the timers in `run` mode; snapshots state on
//! shutdown. One-shot CLI commands reuse `build` without starting any
//! timers.

use std::sync::Arc;

use eyre::{Context, Result};
use knowstore::{KnowStore, SystemInfo};
use metricstore::MetricStore;
use sysinfo::System;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{AssembleOptions, CompressOptions, ContextHandle, ContextManagerConfig};
use crate::exec::{ApprovalQueue, Executor};
use crate::issues::IssueTracker;
use crate::llm::{ChatBackend, LlmClient, Tier};
use crate::logs::JsonlLog;
use crate::notify::Notifier;
use crate::reason::{ActionRouter, MetaReasoner, ReviewReasoner};
use crate::trigger::{LineClassifier, TriggerLoop};

/// Resolved issues may not reopen for this long
const REOPEN_COOLDOWN_S: i64 = 86_400;

/// Escalation channel depth; review drops escalations when full
const ESCALATION_CHANNEL_DEPTH: usize = 16;

/// Bounded retries per tier for transient backend failures
const TRIGGER_RETRIES: u32 = 1;
const REVIEW_RETRIES: u32 = 2;
const META_RETRIES: u32 = 2;

/// Everything wired and ready, timers not yet started
pub struct Components {
    pub config: Config,
    pub host: String,
    pub metrics: Arc<MetricStore>,
    pub know: Arc<KnowStore>,
    pub issues: Arc<IssueTracker>,
    pub context: ContextHandle,
    pub executor: Arc<Executor>,
    pub router: Arc<ActionRouter>,
    pub notifier: Arc<Notifier>,
    pub meta: Arc<MetaReasoner>,
    pub trigger_client: Arc<dyn LlmClient>,
    pub review_client: Arc<dyn LlmClient>,
}

/// Build and wire every component from configuration
pub fn build(config: Config) -> Result<Components> {
    debug!(autonomy = %config.autonomy_level, "build: called");
    config.validate()?;
    let host = config.host();
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    let metrics = Arc::new(MetricStore::open(config.metrics_db_path()).context("Failed to open metric store")?);
    let know = Arc::new(KnowStore::open(config.know_db_path()).context("Failed to open knowledge store")?);
    let issues = Arc::new(IssueTracker::new(know.clone(), &host, REOPEN_COOLDOWN_S));

    let trigger_client: Arc<dyn LlmClient> = Arc::new(
        ChatBackend::from_config(Tier::Trigger, &config.llm.trigger, TRIGGER_RETRIES)
            .context("Failed to build trigger backend")?,
    );
    let review_client: Arc<dyn LlmClient> = Arc::new(
        ChatBackend::from_config(Tier::Review, &config.llm.review, REVIEW_RETRIES)
            .context("Failed to build review backend")?,
    );
    let meta_client: Arc<dyn LlmClient> = Arc::new(
        ChatBackend::from_config(Tier::Meta, &config.llm.meta, META_RETRIES).context("Failed to build meta backend")?,
    );

    let context = ContextHandle::spawn(ContextManagerConfig {
        budget_tokens: config.context.budget_tokens,
        compress: CompressOptions {
            soft_age_s: config.context.soft_age_s as i64,
            summary_target_tokens: config.context.summary_target_tokens,
        },
        assemble: AssembleOptions {
            metrics_window_min: config.context.metrics_window_min,
            activity_fresh_s: config.context.activity_fresh_s,
        },
        snapshot_path: Some(config.context_snapshot_path()),
        summarizer: Some(trigger_client.clone()),
        metrics: Some(metrics.clone()),
        host: host.clone(),
    });

    let queue = ApprovalQueue::load(config.queue_journal_path(), config.queue_snapshot_path())
        .context("Failed to load approval queue")?;
    let executor = Arc::new(Executor::new(config.executor.clone(), config.autonomy_level, queue));

    let notifier = Arc::new(Notifier::new(config.notify_url.clone()));
    let router = Arc::new(ActionRouter {
        executor: executor.clone(),
        context: context.clone(),
        issues: issues.clone(),
        notifier: notifier.clone(),
        actions_log: JsonlLog::new(config.actions_log_path()),
    });

    let meta = Arc::new(MetaReasoner::new(
        meta_client,
        context.clone(),
        router.clone(),
        know.clone(),
        JsonlLog::new(config.decisions_log_path()),
        config.llm.meta.max_context_tokens,
        config.llm.meta.max_tokens,
    ));

    Ok(Components {
        config,
        host,
        metrics,
        know,
        issues,
        context,
        executor,
        router,
        notifier,
        meta,
        trigger_client,
        review_client,
    })
}

/// Install the system header and register this host
pub async fn announce_host(components: &Components) -> Result<()> {
    debug!(host = %components.host, "announce_host: called");
    let mut sys = System::new_all();
    sys.refresh_memory();

    let os = System::long_os_version().unwrap_or_else(|| "unknown".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "unknown".to_string());
    let cores = sys.cpus().len().max(1) as u32;
    let total_mem_mb = sys.total_memory() / (1024 * 1024);

    let header = format!(
        "Host {} ({}, kernel {}, {} cores, {} MB RAM). \
         Autonomous monitoring by warden; autonomy level: {}. \
         Protected services: {}.",
        components.host,
        os,
        kernel,
        cores,
        total_mem_mb,
        components.config.autonomy_level,
        components.config.executor.protected_services.join(", "),
    );
    components
        .context
        .set_header(header)
        .await
        .map_err(|e| eyre::eyre!("Header installation failed: {}", e))?;

    components
        .know
        .upsert_system(&SystemInfo {
            host: components.host.clone(),
            os,
            kernel,
            cores,
            total_mem_mb,
            notes: "managed by warden".to_string(),
            updated_at: chrono::Utc::now(),
        })
        .context("System registry update failed")?;

    Ok(())
}

/// Run the daemon until SIGINT or SIGTERM
pub async fn run(config: Config) -> Result<()> {
    let components = build(config)?;
    announce_host(&components).await?;
    info!(host = %components.host, autonomy = %components.config.autonomy_level, "warden starting");

    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let (escalation_tx, escalation_rx) = mpsc::channel(ESCALATION_CHANNEL_DEPTH);
    let mut handles = Vec::new();

    // Trigger loop
    let classifier = if components.config.trigger.use_trigger_model {
        Some(LineClassifier::new(
            components.trigger_client.clone(),
            components.config.trigger.classifier_max_lines,
        ))
    } else {
        None
    };
    let trigger_loop = TriggerLoop::new(
        components.config.trigger.clone(),
        &components.host,
        components.metrics.clone(),
        components.context.clone(),
        components.issues.clone(),
        classifier,
    )?;
    handles.push(tokio::spawn(trigger_loop.run(shutdown_tx.subscribe())));

    // Review reasoner
    let review = ReviewReasoner::new(
        components.review_client.clone(),
        components.context.clone(),
        components.router.clone(),
        escalation_tx,
        JsonlLog::new(components.config.decisions_log_path()),
        components.config.llm.review.max_context_tokens,
        components.config.llm.review.max_tokens,
        components.config.review.escalation_cooldown_s,
    );
    handles.push(tokio::spawn(
        review.run(components.config.review.interval_s, shutdown_tx.subscribe()),
    ));

    // Meta worker
    handles.push(tokio::spawn(
        components.meta.clone().run(escalation_rx, shutdown_tx.subscribe()),
    ));

    // Housekeeping: periodic snapshots and metric eviction
    handles.push(tokio::spawn(housekeeping(
        components.context.clone(),
        components.metrics.clone(),
        components.config.context.snapshot_interval_min,
        components.config.metrics.retention_days,
        shutdown_tx.subscribe(),
    )));

    wait_for_shutdown().await;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());

    // Grace period for in-flight work, then snapshot and leave
    let drain = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(10), drain).await.is_err() {
        warn!("Workers did not drain within grace period");
    }

    if let Err(e) = components.context.save().await {
        warn!(error = %e, "Final context snapshot failed");
    }
    info!("warden stopped");
    Ok(())
}

/// One-shot health check: a trigger tick plus one reasoner pass
pub async fn check(config: Config, deep: bool) -> Result<String> {
    let components = build(config)?;
    announce_host(&components).await?;

    let mut trigger_loop = TriggerLoop::new(
        components.config.trigger.clone(),
        &components.host,
        components.metrics.clone(),
        components.context.clone(),
        components.issues.clone(),
        None,
    )?;
    let report = trigger_loop.tick().await;
    info!(?report, "Probe tick complete");

    if deep {
        return components.meta.analyze("operator-requested deep check").await;
    }

    let (escalation_tx, _escalation_rx) = mpsc::channel(1);
    let mut review = ReviewReasoner::new(
        components.review_client.clone(),
        components.context.clone(),
        components.router.clone(),
        escalation_tx,
        JsonlLog::new(components.config.decisions_log_path()),
        components.config.llm.review.max_context_tokens,
        components.config.llm.review.max_tokens,
        components.config.review.escalation_cooldown_s,
    );
    let outcome = review.cycle().await;

    if outcome.dropped {
        return Ok("Check inconclusive: the review backend did not produce a verdict.".to_string());
    }
    Ok(format!(
        "Status: {}\n{}\nActions submitted: {}{}",
        outcome.status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string()),
        outcome.assessment,
        outcome.submitted,
        if outcome.escalated { "\nEscalated for deep analysis." } else { "" },
    ))
}

async fn housekeeping(
    context: ContextHandle,
    metrics: Arc<MetricStore>,
    snapshot_interval_min: u64,
    retention_days: i64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut snapshot_timer =
        tokio::time::interval(std::time::Duration::from_secs(snapshot_interval_min.max(1) * 60));
    snapshot_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut eviction_timer = tokio::time::interval(std::time::Duration::from_secs(3600));
    eviction_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = snapshot_timer.tick() => {
                if let Err(e) = context.save().await {
                    warn!(error = %e, "Periodic context snapshot failed");
                }
            }
            _ = eviction_timer.tick() => {
                match metrics.evict_older_than(chrono::Duration::days(retention_days)) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Evicted expired metric samples"),
                    Err(e) => warn!(error = %e, "Metric eviction failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting on ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.host_name = Some("testhost".to_string());
        config.data_dir = Some(dir.path().to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_build_creates_data_dir_and_stores() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let components = build(config).unwrap();
        assert!(dir.path().join("metrics.db").exists());
        assert!(dir.path().join("know.db").exists());
        assert_eq!(components.host, "testhost");
    }

    #[tokio::test]
    async fn test_announce_host_installs_header_and_registers() {
        let dir = TempDir::new().unwrap();
        let components = build(test_config(&dir)).unwrap();

        announce_host(&components).await.unwrap();

        let snapshot = components.context.snapshot().await.unwrap();
        let header = snapshot.entries.iter().find(|e| e.is_header()).expect("header installed");
        assert!(header.render().contains("testhost"));
        assert!(header.render().contains("autonomy level: suggest"));

        let systems = components.know.list_systems().unwrap();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].host, "testhost");
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.trigger.interval_s = 0;
        assert!(build(config).is_err());
    }
}
