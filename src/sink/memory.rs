//! In-memory sink and plot, used by tests and dry runs.
//!
//! Both types are cheap handles over shared state: keep a clone, hand the
//! other to the dispatcher, and inspect the clone once the dispatcher is closed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::{ArtifactHeader, HistogramSink, LivePlot, PlotRequest, ResultSink};

/// One `append` call as received.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRecord {
    /// Sub-sequence
    pub seq_name: String,
    /// Dataset
    pub dataset: String,
    /// Number of values appended
    pub len: usize,
}

/// Everything a [`MemoryResultSink`] has received.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Created artifacts, in order
    pub artifacts: Vec<ArtifactHeader>,
    /// Dataset contents keyed by `(seq_name, dataset)`
    pub datasets: IndexMap<(String, String), Vec<f64>>,
    /// Every append call, in order
    pub appends: Vec<AppendRecord>,
    /// Scan-list entries, in order
    pub scan_list: Vec<ArtifactHeader>,
    /// Raw readings kept per sub-sequence and scan index
    pub raw: BTreeMap<String, BTreeMap<usize, Vec<u32>>>,
    /// Sub-sequences whose raw readings were discarded
    pub discarded: Vec<String>,
}

impl MemoryStore {
    /// Contents of one dataset (empty if never appended)
    pub fn dataset(&self, seq_name: &str, dataset: &str) -> Vec<f64> {
        self.datasets
            .get(&(seq_name.to_string(), dataset.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Sizes of every append to one dataset, in order
    pub fn append_sizes(&self, seq_name: &str, dataset: &str) -> Vec<usize> {
        self.appends
            .iter()
            .filter(|a| a.seq_name == seq_name && a.dataset == dataset)
            .map(|a| a.len)
            .collect()
    }
}

/// Sink keeping results in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSink {
    store: Arc<RwLock<MemoryStore>>,
    unreachable: bool,
}

impl MemoryResultSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every call, as if its backend were down
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Copy of everything received so far
    pub async fn snapshot(&self) -> MemoryStore {
        self.store.read().await.clone()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.unreachable {
            anyhow::bail!("result sink unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn create_artifact(&mut self, header: &ArtifactHeader) -> anyhow::Result<()> {
        self.check()?;
        self.store.write().await.artifacts.push(header.clone());
        Ok(())
    }

    async fn append(
        &mut self,
        seq_name: &str,
        dataset: &str,
        values: &[f64],
    ) -> anyhow::Result<()> {
        self.check()?;
        let mut store = self.store.write().await;
        store
            .datasets
            .entry((seq_name.to_string(), dataset.to_string()))
            .or_default()
            .extend_from_slice(values);
        store.appends.push(AppendRecord {
            seq_name: seq_name.to_string(),
            dataset: dataset.to_string(),
            len: values.len(),
        });
        Ok(())
    }

    async fn append_scan_list_entry(&mut self, header: &ArtifactHeader) -> anyhow::Result<()> {
        self.check()?;
        self.store.write().await.scan_list.push(header.clone());
        Ok(())
    }

    async fn record_raw(
        &mut self,
        seq_name: &str,
        index: usize,
        counts: &[u32],
    ) -> anyhow::Result<()> {
        self.check()?;
        self.store
            .write()
            .await
            .raw
            .entry(seq_name.to_string())
            .or_default()
            .insert(index, counts.to_vec());
        Ok(())
    }

    async fn discard_raw(&mut self, seq_name: &str) -> anyhow::Result<()> {
        self.check()?;
        let mut store = self.store.write().await;
        store.raw.remove(seq_name);
        store.discarded.push(seq_name.to_string());
        Ok(())
    }
}

/// Live plot and histogram recording every request.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlot {
    plots: Arc<RwLock<Vec<PlotRequest>>>,
    histograms: Arc<RwLock<Vec<Vec<u32>>>>,
    unreachable: bool,
}

impl MemoryPlot {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that rejects every request
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Plot requests received so far
    pub async fn plots(&self) -> Vec<PlotRequest> {
        self.plots.read().await.clone()
    }

    /// Histogram batches received so far
    pub async fn histograms(&self) -> Vec<Vec<u32>> {
        self.histograms.read().await.clone()
    }
}

#[async_trait]
impl LivePlot for MemoryPlot {
    async fn plot(&mut self, request: &PlotRequest) -> anyhow::Result<()> {
        if self.unreachable {
            anyhow::bail!("plot server unreachable");
        }
        self.plots.write().await.push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl HistogramSink for MemoryPlot {
    async fn histogram(&mut self, counts: &[u32]) -> anyhow::Result<()> {
        if self.unreachable {
            anyhow::bail!("histogram server unreachable");
        }
        self.histograms.write().await.push(counts.to_vec());
        Ok(())
    }
}
