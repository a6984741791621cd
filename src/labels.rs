// swarm-autoscaler: Service label vocabulary and per-service scaling profile

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AutoscalerError, Result};
use crate::settings::Settings;

// Service labels
pub const LABEL_AUTOSCALE: &str = "swarm.autoscale";
pub const LABEL_MIN_REPLICAS: &str = "swarm.autoscale.min";
pub const LABEL_MAX_REPLICAS: &str = "swarm.autoscale.max";
pub const LABEL_PERCENTAGE_MIN: &str = "swarm.autoscale.percentage-min";
pub const LABEL_PERCENTAGE_MAX: &str = "swarm.autoscale.percentage-max";
pub const LABEL_DECREASE_MODE: &str = "swarm.autoscale.decrease-mode";
pub const LABEL_METRIC: &str = "swarm.autoscale.metric";
pub const LABEL_DISABLE_MANUAL_REPLICAS: &str = "swarm.autoscale.disable-manual-replicas";

// Defaults for replicas when labels are missing
pub const DEFAULT_MIN_REPLICAS: u64 = 2;
pub const DEFAULT_MAX_REPLICAS: u64 = 15;

/// Metric the scaling decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
        }
    }

    /// Lenient parse used for labels: anything that is not `memory` is CPU.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "memory" => Metric::Memory,
            _ => Metric::Cpu,
        }
    }

    /// Strict parse used by the HTTP surface, where an unknown metric is a
    /// client error rather than a silent default.
    pub fn parse_strict(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "cpu" => Some(Metric::Cpu),
            "memory" => Some(Metric::Memory),
            _ => None,
        }
    }
}

/// Aggregate used for the scale-down comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecreaseMode {
    Median,
    Max,
}

impl DecreaseMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "max" => DecreaseMode::Max,
            _ => DecreaseMode::Median,
        }
    }
}

/// Scaling parameters for one service, derived from its labels each tick.
#[derive(Debug, Clone)]
pub struct ScalingProfile {
    /// Master enable; disabled services are still evaluated so the
    /// would-have-scaled case can be surfaced in the logs.
    pub enabled: bool,
    pub min_replicas: u64,
    pub max_replicas: u64,
    pub low_percentage: f64,
    pub high_percentage: f64,
    pub decrease_mode: DecreaseMode,
    pub metric: Metric,
    pub disable_manual_replicas: bool,
}

impl ScalingProfile {
    pub fn from_labels(labels: &HashMap<String, String>, settings: &Settings) -> Self {
        Self {
            enabled: labels
                .get(LABEL_AUTOSCALE)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            min_replicas: label_parse(labels, LABEL_MIN_REPLICAS, DEFAULT_MIN_REPLICAS),
            max_replicas: label_parse(labels, LABEL_MAX_REPLICAS, DEFAULT_MAX_REPLICAS),
            low_percentage: label_parse(labels, LABEL_PERCENTAGE_MIN, settings.min_percentage),
            high_percentage: label_parse(labels, LABEL_PERCENTAGE_MAX, settings.max_percentage),
            decrease_mode: DecreaseMode::parse(labels.get(LABEL_DECREASE_MODE).map(|s| s.as_str())),
            metric: Metric::parse(labels.get(LABEL_METRIC).map(|s| s.as_str())),
            disable_manual_replicas: labels
                .get(LABEL_DISABLE_MANUAL_REPLICAS)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Bounds sanity: a service violating these is skipped for the tick.
    pub fn validate(&self, service_name: &str) -> Result<()> {
        if self.min_replicas > self.max_replicas || self.low_percentage >= self.high_percentage {
            return Err(AutoscalerError::InvalidBounds {
                service: service_name.to_string(),
                min: self.min_replicas,
                max: self.max_replicas,
                low: self.low_percentage,
                high: self.high_percentage,
            });
        }
        Ok(())
    }
}

fn label_parse<T: std::str::FromStr>(labels: &HashMap<String, String>, key: &str, default: T) -> T {
    labels
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn profile_defaults_when_labels_absent() {
        let profile = ScalingProfile::from_labels(&HashMap::new(), &Settings::default());
        assert!(!profile.enabled);
        assert_eq!(profile.min_replicas, 2);
        assert_eq!(profile.max_replicas, 15);
        assert_eq!(profile.low_percentage, 25.0);
        assert_eq!(profile.high_percentage, 85.0);
        assert_eq!(profile.decrease_mode, DecreaseMode::Median);
        assert_eq!(profile.metric, Metric::Cpu);
        assert!(!profile.disable_manual_replicas);
    }

    #[test]
    fn profile_reads_all_labels() {
        let labels = make_labels(&[
            (LABEL_AUTOSCALE, "TRUE"),
            (LABEL_MIN_REPLICAS, "1"),
            (LABEL_MAX_REPLICAS, "6"),
            (LABEL_PERCENTAGE_MIN, "30"),
            (LABEL_PERCENTAGE_MAX, "70"),
            (LABEL_DECREASE_MODE, "max"),
            (LABEL_METRIC, "memory"),
            (LABEL_DISABLE_MANUAL_REPLICAS, "true"),
        ]);
        let profile = ScalingProfile::from_labels(&labels, &Settings::default());
        assert!(profile.enabled);
        assert_eq!(profile.min_replicas, 1);
        assert_eq!(profile.max_replicas, 6);
        assert_eq!(profile.low_percentage, 30.0);
        assert_eq!(profile.high_percentage, 70.0);
        assert_eq!(profile.decrease_mode, DecreaseMode::Max);
        assert_eq!(profile.metric, Metric::Memory);
        assert!(profile.disable_manual_replicas);
    }

    #[test]
    fn unparseable_labels_fall_back_to_defaults() {
        let labels = make_labels(&[(LABEL_MIN_REPLICAS, "lots"), (LABEL_METRIC, "disk")]);
        let profile = ScalingProfile::from_labels(&labels, &Settings::default());
        assert_eq!(profile.min_replicas, 2);
        assert_eq!(profile.metric, Metric::Cpu);
    }

    #[test]
    fn crossed_bounds_fail_validation() {
        let labels = make_labels(&[(LABEL_MIN_REPLICAS, "10"), (LABEL_MAX_REPLICAS, "2")]);
        let profile = ScalingProfile::from_labels(&labels, &Settings::default());
        assert!(profile.validate("web").is_err());

        let labels = make_labels(&[(LABEL_PERCENTAGE_MIN, "85"), (LABEL_PERCENTAGE_MAX, "85")]);
        let profile = ScalingProfile::from_labels(&labels, &Settings::default());
        assert!(profile.validate("web").is_err());
    }

    #[test]
    fn strict_metric_parse_rejects_unknown() {
        assert_eq!(Metric::parse_strict("cpu"), Some(Metric::Cpu));
        assert_eq!(Metric::parse_strict("MEMORY"), Some(Metric::Memory));
        assert_eq!(Metric::parse_strict("disk"), None);
    }
}
