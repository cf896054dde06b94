//! Spare-capacity sensing for dynamic policies.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::trace;

/// Source of the spare-capacity measurement a dynamic policy scales on.
pub trait LoadProbe: Send {
    /// Sample how much additional concurrent work the host could absorb,
    /// in units of idle CPUs.
    fn spare_capacity(&mut self) -> f64;
}

/// Measures idle CPUs over a short sampling window.
pub struct SystemLoadProbe {
    system: System,
    cpus: usize,
    window: Duration,
}

impl SystemLoadProbe {
    /// Create a probe that samples CPU usage over `window`.
    ///
    /// The window is raised to the platform minimum if shorter.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::new().with_cpu_usage()),
        );
        Self {
            system,
            cpus: num_cpus::get(),
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl LoadProbe for SystemLoadProbe {
    #[allow(clippy::cast_precision_loss)]
    fn spare_capacity(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        thread::sleep(self.window);
        self.system.refresh_cpu_usage();

        let busy_percent = f64::from(self.system.global_cpu_usage()).clamp(0.0, 100.0);
        let spare = self.cpus as f64 * (1.0 - busy_percent / 100.0);
        trace!(cpus = self.cpus, busy_percent, spare, "sampled spare capacity");
        spare
    }
}

/// Probe returning an externally controlled value. Clones share the value.
#[derive(Debug, Clone, Default)]
pub struct FixedLoadProbe {
    spare: Arc<Mutex<f64>>,
}

impl FixedLoadProbe {
    /// Create a probe that reports `spare` until changed.
    #[must_use]
    pub fn new(spare: f64) -> Self {
        Self {
            spare: Arc::new(Mutex::new(spare)),
        }
    }

    /// Change the reported spare capacity.
    pub fn set(&self, spare: f64) {
        *self.spare.lock() = spare;
    }
}

impl LoadProbe for FixedLoadProbe {
    fn spare_capacity(&mut self) -> f64 {
        *self.spare.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_system_probe_is_bounded_by_cpu_count() {
        let mut probe = SystemLoadProbe::new(Duration::from_millis(10));
        let spare = probe.spare_capacity();
        assert!(spare >= 0.0);
        assert!(spare <= num_cpus::get() as f64);
    }

    #[test]
    fn test_fixed_probe_clones_share_value() {
        let probe = FixedLoadProbe::new(2.0);
        let mut reader = probe.clone();
        assert!((reader.spare_capacity() - 2.0).abs() < f64::EPSILON);
        probe.set(0.25);
        assert!((reader.spare_capacity() - 0.25).abs() < f64::EPSILON);
    }
}
