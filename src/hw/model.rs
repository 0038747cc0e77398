use serde::Serialize;

/// Placeholder used when a peripheral reports no name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// One heart-rate measurement in beats per minute.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[display("{_0} bpm")]
#[serde(transparent)]
pub struct HeartRateSample(u16);

impl HeartRateSample {
    /// Returns the measurement in beats per minute.
    #[must_use]
    pub fn bpm(self) -> u16 {
        self.0
    }
}

/// A battery charge reading as a percentage.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Serialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[display("{_0}%")]
#[serde(transparent)]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Returns the charge percentage.
    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }
}

/// Identity of a peripheral picked during discovery.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PeripheralInfo {
    device_id: String,
    name: Option<String>,
}

impl PeripheralInfo {
    pub(crate) fn new(device_id: String, name: Option<String>) -> Self {
        Self { device_id, name }
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised name, if the peripheral reported one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the advertised name or the fixed placeholder.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

/// Why a monitor run ended.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStopReason {
    #[display("reached sample limit ({_0})")]
    ReachedLimit(usize),
    #[display("interrupted by Ctrl+C")]
    Interrupted,
    #[display("peripheral disconnected")]
    LinkLost,
    #[display("heart-rate service not available")]
    NoHeartRate,
}

/// Aggregate of the heart-rate samples received during one monitor run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct MonitorSummary {
    received_samples: usize,
    min_bpm: Option<u16>,
    max_bpm: Option<u16>,
    mean_bpm: Option<u16>,
    stop_reason: MonitorStopReason,
}

impl MonitorSummary {
    /// Summarises the samples in arrival order.
    #[must_use]
    pub fn from_samples(samples: &[HeartRateSample], stop_reason: MonitorStopReason) -> Self {
        let bpm = samples.iter().map(|sample| sample.bpm());
        let total: u64 = bpm.clone().map(u64::from).sum();
        let mean_bpm = u64::try_from(samples.len())
            .ok()
            .filter(|count| *count > 0)
            .and_then(|count| u16::try_from(total / count).ok());

        Self {
            received_samples: samples.len(),
            min_bpm: bpm.clone().min(),
            max_bpm: bpm.max(),
            mean_bpm,
            stop_reason,
        }
    }

    #[must_use]
    pub fn received_samples(&self) -> usize {
        self.received_samples
    }

    #[must_use]
    pub fn min_bpm(&self) -> Option<u16> {
        self.min_bpm
    }

    #[must_use]
    pub fn max_bpm(&self) -> Option<u16> {
        self.max_bpm
    }

    #[must_use]
    pub fn mean_bpm(&self) -> Option<u16> {
        self.mean_bpm
    }

    #[must_use]
    pub fn stop_reason(&self) -> &MonitorStopReason {
        &self.stop_reason
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn summary_aggregates_samples() {
        let samples = [72, 75, 74].map(HeartRateSample::from);
        let summary = MonitorSummary::from_samples(&samples, MonitorStopReason::ReachedLimit(3));

        assert_eq!(3, summary.received_samples());
        assert_eq!(Some(72), summary.min_bpm());
        assert_eq!(Some(75), summary.max_bpm());
        assert_eq!(Some(73), summary.mean_bpm());
    }

    #[test]
    fn summary_of_no_samples_has_no_statistics() {
        let summary = MonitorSummary::from_samples(&[], MonitorStopReason::LinkLost);

        assert_eq!(0, summary.received_samples());
        assert_eq!(None, summary.mean_bpm());
        assert_eq!(None, summary.min_bpm());
    }

    #[test]
    fn display_name_falls_back_to_placeholder() {
        let info = PeripheralInfo::new("AA:BB".to_string(), None);
        assert_eq!("Unknown Device", info.display_name());
    }
}
