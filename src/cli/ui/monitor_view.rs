use std::fmt::{self, Display, Formatter};

use crate::hw::{HeartRateSample, MonitorStopReason, MonitorSummary};

use super::painter::Painter;

/// Renders one heart-rate sample line.
pub(crate) struct SampleView<'a> {
    index: usize,
    sample: HeartRateSample,
    painter: &'a Painter,
}

impl<'a> SampleView<'a> {
    pub(crate) fn new(index: usize, sample: HeartRateSample, painter: &'a Painter) -> Self {
        Self {
            index,
            sample,
            painter,
        }
    }
}

impl Display for SampleView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.painter.pulse(self.sample.to_string())
        )
    }
}

/// Renders the end-of-run summary.
pub(crate) struct MonitorSummaryView<'a> {
    summary: &'a MonitorSummary,
    painter: &'a Painter,
}

impl<'a> MonitorSummaryView<'a> {
    pub(crate) fn new(summary: &'a MonitorSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for MonitorSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let stop_reason = match self.summary.stop_reason() {
            MonitorStopReason::ReachedLimit(_) | MonitorStopReason::Interrupted => {
                self.painter.success(reason)
            }
            MonitorStopReason::LinkLost | MonitorStopReason::NoHeartRate => {
                self.painter.warning(reason)
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter.value(format!(
                "- received {} sample(s)",
                self.summary.received_samples()
            ))
        )?;

        if let (Some(min), Some(max), Some(mean)) = (
            self.summary.min_bpm(),
            self.summary.max_bpm(),
            self.summary.mean_bpm(),
        ) {
            write!(
                f,
                " {}",
                self.painter
                    .muted(format!("(min {min}, max {max}, mean {mean} bpm)"))
            )?;
        }
        Ok(())
    }
}
