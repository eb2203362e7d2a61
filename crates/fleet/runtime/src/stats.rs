//! Raw runtime statistics and the derived percentages

use fleet_types::ResourceStats;

/// Counters as reported by the runtime for one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    /// Per-interface `(rx_bytes, tx_bytes)`
    pub networks: Vec<(u64, u64)>,
}

impl RawStats {
    /// `cpu_delta / system_delta * 100`; zero when the system delta is not positive
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_total_usage as f64 - self.precpu_total_usage as f64;
        let system_delta = self.system_cpu_usage as f64 - self.presystem_cpu_usage as f64;
        if system_delta <= 0.0 || cpu_delta < 0.0 {
            return 0.0;
        }
        cpu_delta / system_delta * 100.0
    }

    /// `usage / limit * 100`; zero when no limit is reported
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        self.memory_usage as f64 / self.memory_limit as f64 * 100.0
    }

    pub fn to_resource_stats(&self) -> ResourceStats {
        let (rx_bytes, tx_bytes) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (r, t)| {
                (rx.saturating_add(*r), tx.saturating_add(*t))
            });
        ResourceStats {
            cpu_percent: self.cpu_percent(),
            memory_percent: self.memory_percent(),
            rx_bytes,
            tx_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages() {
        let raw = RawStats {
            cpu_total_usage: 300,
            precpu_total_usage: 100,
            system_cpu_usage: 2_000,
            presystem_cpu_usage: 1_000,
            memory_usage: 256,
            memory_limit: 1024,
            networks: vec![(10, 1), (5, 2)],
        };
        let stats = raw.to_resource_stats();
        assert!((stats.cpu_percent - 20.0).abs() < 1e-9);
        assert!((stats.memory_percent - 25.0).abs() < 1e-9);
        assert_eq!(stats.rx_bytes, 15);
        assert_eq!(stats.tx_bytes, 3);
    }

    #[test]
    fn test_degenerate_samples_are_zero() {
        let no_system_delta = RawStats {
            cpu_total_usage: 500,
            precpu_total_usage: 100,
            system_cpu_usage: 1_000,
            presystem_cpu_usage: 1_000,
            ..Default::default()
        };
        assert_eq!(no_system_delta.cpu_percent(), 0.0);
        assert_eq!(no_system_delta.memory_percent(), 0.0);
        assert_eq!(RawStats::default().to_resource_stats(), ResourceStats::default());
    }
}
