//! Result destinations: artifact storage, live plotting and the PMT histogram.
//!
//! The engine never talks to a sink directly. It queues [`SinkCommand`]s on a
//! [`ResultDispatcher`], whose worker task delivers them in order and swallows
//! delivery failures, so a slow or unreachable sink never stalls a scan.

pub mod dispatcher;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub use dispatcher::{DeliveryStats, ResultDispatcher, SinkCommand};
pub use file::FileResultSink;
pub use memory::{MemoryPlot, MemoryResultSink};

/// Elapsed seconds since the artifact was created, one entry per scan index
pub const TIME_DATASET: &str = "time";

/// Mean ion-state detector confidence, one entry per scan index
pub const CONFIDENCE_DATASET: &str = "confidence";

/// Metadata written once when an artifact is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Unique id of this artifact
    pub run_uid: String,
    /// Experiment (pulse sequence) name
    pub experiment: String,
    /// Sub-sequence name
    pub seq_name: String,
    /// Whether the run has more than one sub-sequence
    pub is_multi: bool,
    /// Live-plot tab
    pub plot_tab: String,
    /// Time of the first flush
    pub created_at: DateTime<Local>,
    /// Swept parameter names
    pub axes: Vec<String>,
    /// Reduced series names
    pub series: Vec<String>,
    /// Parameter snapshot grouped by collection
    pub parameters: serde_json::Value,
}

impl ArtifactHeader {
    /// Artifact timestamp, `HHMM_SS`
    pub fn timestamp(&self) -> String {
        self.created_at.format("%H%M_%S").to_string()
    }

    /// Artifact date, `YYYY-MM-DD`
    pub fn date(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }

    /// Name used in the scan list: the experiment, suffixed with the
    /// sub-sequence for multi-sequence runs
    pub fn label(&self) -> String {
        if self.is_multi {
            format!("{}_{}", self.experiment, self.seq_name)
        } else {
            self.experiment.clone()
        }
    }

    /// Live-plot title for `series`
    pub fn plot_title(&self, series: &str) -> String {
        format!("{} - {}", self.timestamp(), series)
    }
}

/// Generate a fresh artifact id
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Append-only store for scan results.
#[async_trait]
pub trait ResultSink: Send {
    /// Create the artifact for `header.seq_name`
    async fn create_artifact(&mut self, header: &ArtifactHeader) -> anyhow::Result<()>;

    /// Append `values` to dataset `dataset` of `seq_name`'s artifact
    async fn append(&mut self, seq_name: &str, dataset: &str, values: &[f64])
        -> anyhow::Result<()>;

    /// Index the artifact in the run-wide scan list
    async fn append_scan_list_entry(&mut self, header: &ArtifactHeader) -> anyhow::Result<()>;

    /// Keep the raw readings of one scan index until the scan ends
    async fn record_raw(
        &mut self,
        _seq_name: &str,
        _index: usize,
        _counts: &[u32],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Drop every raw reading kept for `seq_name`
    async fn discard_raw(&mut self, _seq_name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One live-plot update.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotRequest {
    /// X values of the batch
    pub x: Vec<f64>,
    /// Y values of the batch
    pub y: Vec<f64>,
    /// Target tab
    pub tab_name: String,
    /// Curve title, `<timestamp> - <series>`
    pub plot_title: String,
    /// Append to an existing curve of the same title
    pub append: bool,
}

/// Best-effort live plotting.
#[async_trait]
pub trait LivePlot: Send {
    /// Draw or extend one curve
    async fn plot(&mut self, request: &PlotRequest) -> anyhow::Result<()>;
}

/// Best-effort PMT count histogram.
#[async_trait]
pub trait HistogramSink: Send {
    /// Add the raw counts of one flush batch
    async fn histogram(&mut self, counts: &[u32]) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header(is_multi: bool) -> ArtifactHeader {
        ArtifactHeader {
            run_uid: new_uid(),
            experiment: "RabiFlopping".into(),
            seq_name: "Rabi729".into(),
            is_multi,
            plot_tab: "Rabi".into(),
            created_at: Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap(),
            axes: vec!["RabiFlopping.duration".into()],
            series: vec!["dark_ions:0".into()],
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn test_header_naming() {
        let h = header(false);
        assert_eq!(h.timestamp(), "0905_02");
        assert_eq!(h.date(), "2024-03-07");
        assert_eq!(h.label(), "RabiFlopping");
        assert_eq!(header(true).label(), "RabiFlopping_Rabi729");
        assert_eq!(h.plot_title("parity"), "0905_02 - parity");
    }
}
