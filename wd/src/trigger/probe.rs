//! Host metric and service-state sampling

use std::time::Duration;

use sysinfo::{Disks, System};
use tracing::debug;

use crate::exec::run_shell;

/// One sampled metric, before it becomes a store record
#[derive(Debug, Clone)]
pub struct ProbeSample {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// Active state of a probed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
    /// The probe itself could not run
    Unknown,
}

impl ServiceState {
    /// Whether the state should raise a trigger event
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Inactive | Self::Failed)
    }
}

/// Samples CPU, memory, load, and root filesystem usage
pub struct SystemProbe {
    sys: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Prime the CPU counters so the first tick has a baseline
        sys.refresh_cpu_usage();
        Self { sys }
    }

    pub fn cores(&self) -> usize {
        self.sys.cpus().len().max(1)
    }

    /// Take the per-tick metric samples
    pub fn sample_metrics(&mut self) -> Vec<ProbeSample> {
        debug!("SystemProbe::sample_metrics: called");
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let mut samples = vec![ProbeSample {
            name: "cpu_pct".to_string(),
            value: self.sys.global_cpu_usage() as f64,
            unit: "%".to_string(),
        }];

        if self.sys.total_memory() > 0 {
            samples.push(ProbeSample {
                name: "mem_pct".to_string(),
                value: self.sys.used_memory() as f64 / self.sys.total_memory() as f64 * 100.0,
                unit: "%".to_string(),
            });
        }

        samples.push(ProbeSample {
            name: "load1".to_string(),
            value: System::load_average().one,
            unit: "load".to_string(),
        });

        if let Some(pct) = root_disk_pct() {
            samples.push(ProbeSample {
                name: "disk_pct".to_string(),
                value: pct,
                unit: "%".to_string(),
            });
        }

        samples
    }

    /// Mutable access to the inner system, for activity reports
    pub fn system_mut(&mut self) -> &mut System {
        &mut self.sys
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn root_disk_pct() -> Option<f64> {
    debug!("root_disk_pct: called");
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point().to_str() == Some("/"))
        .or_else(|| disks.iter().max_by_key(|d| d.total_space()))?;
    if root.total_space() == 0 {
        return None;
    }
    let used = root.total_space() - root.available_space();
    Some(used as f64 / root.total_space() as f64 * 100.0)
}

/// Probe one service's active state via the service manager
pub async fn probe_service(service: &str) -> ServiceState {
    debug!(%service, "probe_service: called");
    let output = match run_shell(&format!("systemctl is-active {}", service), Duration::from_secs(10)).await {
        Ok(output) if !output.timed_out => output,
        _ => return ServiceState::Unknown,
    };

    let state = match output.stdout.trim() {
        "active" | "activating" | "reloading" => ServiceState::Active,
        "failed" => ServiceState::Failed,
        "inactive" | "deactivating" => ServiceState::Inactive,
        _ => ServiceState::Unknown,
    };
    debug!(%service, ?state, "probe_service: returning");
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_metrics_includes_core_set() {
        let mut probe = SystemProbe::new();
        let samples = probe.sample_metrics();

        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"cpu_pct"));
        assert!(names.contains(&"load1"));

        for sample in &samples {
            assert!(sample.value.is_finite(), "{} not finite", sample.name);
            assert!(sample.value >= 0.0, "{} negative", sample.name);
        }
    }

    #[test]
    fn test_cores_is_nonzero() {
        let probe = SystemProbe::new();
        assert!(probe.cores() >= 1);
    }

    #[test]
    fn test_service_state_down_mapping() {
        assert!(ServiceState::Failed.is_down());
        assert!(ServiceState::Inactive.is_down());
        assert!(!ServiceState::Active.is_down());
        assert!(!ServiceState::Unknown.is_down());
    }
}
