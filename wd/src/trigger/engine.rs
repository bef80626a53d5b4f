//! The trigger loop
//!
//! A cheap probe that runs every tick: sample metrics, scan the journal
//! delta, probe critical services, optionally classify leftover lines,
//! then debounce and admit the surviving events. Individual probe
//! failures are logged and skipped; the loop never aborts.

use std::sync::Arc;

use chrono::Utc;
use eyre::Result;
use knowstore::Severity;
use metricstore::{MetricSample, MetricStore};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::activity::ActivityReport;
use crate::config::{ThresholdConfig, TriggerConfig};
use crate::context::{ContextEntry, ContextHandle, EntryPayload};
use crate::issues::IssueTracker;
use crate::trigger::classifier::LineClassifier;
use crate::trigger::debounce::Debouncer;
use crate::trigger::event::{TriggerEvent, TriggerKind};
use crate::trigger::journal::JournalReader;
use crate::trigger::probe::{ProbeSample, ServiceState, SystemProbe, probe_service};
use crate::trigger::rules::RuleSet;

/// An activity report is admitted every this many ticks
const ACTIVITY_EVERY_TICKS: u64 = 10;

/// What one tick did, for logs and tests
#[derive(Debug, Default)]
pub struct TickReport {
    pub samples: usize,
    pub candidates: usize,
    pub admitted: usize,
}

/// The probe loop itself
pub struct TriggerLoop {
    config: TriggerConfig,
    host: String,
    metrics: Arc<MetricStore>,
    context: ContextHandle,
    issues: Arc<IssueTracker>,
    classifier: Option<LineClassifier>,
    rules: RuleSet,
    journal: JournalReader,
    probe: SystemProbe,
    debouncer: Debouncer,
    tick_count: u64,
}

impl TriggerLoop {
    pub fn new(
        config: TriggerConfig,
        host: impl Into<String>,
        metrics: Arc<MetricStore>,
        context: ContextHandle,
        issues: Arc<IssueTracker>,
        classifier: Option<LineClassifier>,
    ) -> Result<Self> {
        debug!(
            interval_s = config.interval_s,
            debounce_window_s = config.debounce_window_s,
            "TriggerLoop::new: called"
        );
        let rules = RuleSet::with_config(&config.log_rules)?;
        debug!(rule_count = rules.len(), "TriggerLoop::new: rules compiled");
        let debouncer = Debouncer::new(config.debounce_window_s);
        Ok(Self {
            config,
            host: host.into(),
            metrics,
            context,
            issues,
            classifier,
            rules,
            journal: JournalReader::new(),
            probe: SystemProbe::new(),
            debouncer,
            tick_count: 0,
        })
    }

    /// Run until shutdown; missed ticks are skipped, never queued
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_s = self.config.interval_s, "Trigger loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    debug!(?report, "Trigger tick complete");
                }
                _ = shutdown.recv() => {
                    info!("Trigger loop stopping");
                    break;
                }
            }
        }
    }

    /// One full probe pass
    pub async fn tick(&mut self) -> TickReport {
        self.tick_count += 1;
        debug!(tick = self.tick_count, "TriggerLoop::tick: called");
        let mut report = TickReport::default();
        let mut candidates: Vec<TriggerEvent> = Vec::new();

        // 1. Metric sampling
        let samples = self.probe.sample_metrics();
        report.samples = samples.len();
        debug!(count = samples.len(), "TriggerLoop::tick: metrics sampled");
        for sample in &samples {
            let record = MetricSample::now(&self.host, &sample.name, sample.value, &sample.unit);
            if let Err(e) = self.metrics.insert_sample(&record) {
                warn!(name = %sample.name, error = %e, "Sample insert failed, skipping");
            }
        }

        // 2. Threshold evaluation
        candidates.extend(threshold_events(&samples, &self.config.thresholds, self.probe.cores()));
        debug!(count = candidates.len(), "TriggerLoop::tick: threshold breaches");

        // 3. Journal delta scan
        let lines = self.journal.read_delta().await;
        debug!(line_count = lines.len(), "TriggerLoop::tick: journal delta read");
        let mut unmatched: Vec<String> = Vec::new();
        for line in &lines {
            match self.rules.match_line(line) {
                Some(matched) => {
                    candidates.push(
                        TriggerEvent::new(TriggerKind::LogPattern, matched.severity, matched.subject, matched.line)
                            .with_metadata("rule", matched.rule_id),
                    );
                }
                None if looks_concerning(line) => unmatched.push(line.clone()),
                None => {}
            }
        }

        // 4. Service probe
        candidates.extend(self.probe_services().await);

        // 5. Optional classifier over leftover concerning lines
        if let Some(classifier) = &self.classifier
            && self.config.use_trigger_model
            && !unmatched.is_empty()
        {
            debug!(line_count = unmatched.len(), "TriggerLoop::tick: classifying unmatched lines");
            for (line, verdict) in classifier.classify(&unmatched).await {
                if let Some(severity) = verdict.severity() {
                    candidates.push(
                        TriggerEvent::new(TriggerKind::Classifier, severity, line_subject(&line), line)
                            .with_metadata("classified", "true"),
                    );
                }
            }
        }

        // 6. Debounce and admit
        report.candidates = candidates.len();
        report.admitted = self.admit_candidates(candidates).await;

        if self.tick_count % ACTIVITY_EVERY_TICKS == 1 {
            debug!(tick = self.tick_count, "TriggerLoop::tick: capturing activity report");
            let activity = ActivityReport::capture(self.probe.system_mut());
            if let Err(e) = self.context.admit(ContextEntry::new(EntryPayload::Activity(activity))).await {
                warn!(error = %e, "Activity report admission failed");
            }
        }
        self.debouncer.prune(Utc::now());

        debug!(?report, "TriggerLoop::tick: returning");
        report
    }

    /// Probe critical services; down states become candidates, recovered
    /// services resolve their issues
    async fn probe_services(&mut self) -> Vec<TriggerEvent> {
        debug!(
            service_count = self.config.critical_services.len(),
            "TriggerLoop::probe_services: called"
        );
        let mut events = Vec::new();

        for service in &self.config.critical_services {
            let state = probe_service(service).await;
            debug!(%service, ?state, "TriggerLoop::probe_services: probed");
            let value = if state == ServiceState::Active { 1.0 } else { 0.0 };

            let mut sample = MetricSample::now(&self.host, "svc_active", value, "bool");
            sample.tags.insert("service".to_string(), service.clone());
            if let Err(e) = self.metrics.insert_sample(&sample) {
                warn!(%service, error = %e, "Service sample insert failed, skipping");
            }

            match state {
                ServiceState::Failed | ServiceState::Inactive => {
                    let state_name = if state == ServiceState::Failed { "failed" } else { "inactive" };
                    events.push(
                        TriggerEvent::new(
                            TriggerKind::ServiceState,
                            Severity::Warning,
                            service.clone(),
                            format!("{} is {}", service, state_name),
                        )
                        .with_metadata("state", state_name),
                    );
                }
                ServiceState::Active => {
                    if let Err(e) = self.issues.resolve_recovered(service, "service active again") {
                        warn!(%service, error = %e, "Issue auto-resolve failed");
                    }
                }
                ServiceState::Unknown => {
                    debug!(%service, "Service probe inconclusive, skipping");
                }
            }
        }

        debug!(event_count = events.len(), "TriggerLoop::probe_services: returning");
        events
    }

    /// Debounce candidates and admit survivors to the window and tracker
    pub(crate) async fn admit_candidates(&mut self, candidates: Vec<TriggerEvent>) -> usize {
        debug!(candidate_count = candidates.len(), "TriggerLoop::admit_candidates: called");
        let mut admitted = 0;
        for event in candidates {
            if !self.debouncer.admit(&event.fingerprint, event.timestamp) {
                debug!(fingerprint = %event.fingerprint, "TriggerLoop::admit_candidates: debounced");
                continue;
            }

            if let Err(e) = self.issues.record_event(&event) {
                warn!(subject = %event.subject, error = %e, "Issue correlation failed");
            }
            match self.context.admit(ContextEntry::new(EntryPayload::Trigger(event))).await {
                Ok(_) => admitted += 1,
                Err(e) => warn!(error = %e, "Context admission failed"),
            }
        }
        debug!(admitted, "TriggerLoop::admit_candidates: returning");
        admitted
    }
}

/// Compare samples against thresholds; only strict breaches fire
fn threshold_events(samples: &[ProbeSample], thresholds: &ThresholdConfig, cores: usize) -> Vec<TriggerEvent> {
    debug!(sample_count = samples.len(), cores, "threshold_events: called");
    let mut events = Vec::new();

    for sample in samples {
        let limit = match sample.name.as_str() {
            "cpu_pct" => thresholds.cpu_pct,
            "mem_pct" => thresholds.mem_pct,
            "disk_pct" => thresholds.disk_pct,
            "load1" => thresholds.load_per_core * cores as f64,
            _ => continue,
        };

        if sample.value > limit {
            debug!(name = %sample.name, value = sample.value, limit, "threshold_events: breach");
            let severity = if sample.value > limit * 1.1 { Severity::Critical } else { Severity::Warning };
            events.push(
                TriggerEvent::new(
                    TriggerKind::MetricThreshold,
                    severity,
                    sample.name.clone(),
                    format!("{} at {:.1}{} (threshold {:.1})", sample.name, sample.value, sample.unit, limit),
                )
                .with_metadata("value", format!("{:.2}", sample.value)),
            );
        }
    }

    events
}

/// Lines worth showing to the classifier when no rule matched
fn looks_concerning(line: &str) -> bool {
    let lower = line.to_lowercase();
    ["error", "fail", "warn", "crit", "panic", "denied"].iter().any(|kw| lower.contains(kw))
}

/// Syslog identifier of a short-iso journal line, for event subjects
fn line_subject(line: &str) -> String {
    line.split_whitespace()
        .nth(2)
        .map(|ident| ident.trim_end_matches(':').split('[').next().unwrap_or("journal").to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "journal".to_string())
}
