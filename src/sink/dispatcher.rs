//! Fire-and-forget delivery of results to the sinks.
//!
//! The engine pushes commands onto an unbounded channel and moves on. A single
//! worker task delivers them in arrival order, so flushes reach the sink in
//! non-decreasing index order. Delivery failures are logged and counted, never
//! returned to the engine.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ArtifactHeader, HistogramSink, LivePlot, PlotRequest, ResultSink};

/// Work item for the delivery task.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    /// Create an artifact and index it in the scan list
    CreateArtifact(ArtifactHeader),
    /// Append values to a dataset
    Append {
        /// Sub-sequence
        seq_name: String,
        /// Dataset
        dataset: String,
        /// Values, in index order
        values: Vec<f64>,
    },
    /// Keep the raw readings of one scan index
    RecordRaw {
        /// Sub-sequence
        seq_name: String,
        /// Scan index
        index: usize,
        /// Raw counts
        counts: Vec<u32>,
    },
    /// Drop the raw readings of a sub-sequence
    DiscardRaw {
        /// Sub-sequence
        seq_name: String,
    },
    /// Live-plot update
    Plot(PlotRequest),
    /// PMT histogram batch
    Histogram(Vec<u32>),
}

impl SinkCommand {
    fn kind(&self) -> &'static str {
        match self {
            SinkCommand::CreateArtifact(_) => "create_artifact",
            SinkCommand::Append { .. } => "append",
            SinkCommand::RecordRaw { .. } => "record_raw",
            SinkCommand::DiscardRaw { .. } => "discard_raw",
            SinkCommand::Plot(_) => "plot",
            SinkCommand::Histogram(_) => "histogram",
        }
    }
}

/// Delivery counters returned when the dispatcher is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Commands delivered successfully
    pub delivered: usize,
    /// Commands whose delivery failed
    pub failed: usize,
    /// Commands skipped because no collaborator was attached
    pub skipped: usize,
}

struct Worker {
    sink: Box<dyn ResultSink>,
    plot: Option<Box<dyn LivePlot>>,
    histogram: Option<Box<dyn HistogramSink>>,
    stats: DeliveryStats,
}

impl Worker {
    async fn deliver(&mut self, command: &SinkCommand) -> Option<anyhow::Result<()>> {
        let result = match command {
            SinkCommand::CreateArtifact(header) => {
                match self.sink.create_artifact(header).await {
                    Ok(()) => self.sink.append_scan_list_entry(header).await,
                    Err(e) => Err(e),
                }
            }
            SinkCommand::Append {
                seq_name,
                dataset,
                values,
            } => self.sink.append(seq_name, dataset, values).await,
            SinkCommand::RecordRaw {
                seq_name,
                index,
                counts,
            } => self.sink.record_raw(seq_name, *index, counts).await,
            SinkCommand::DiscardRaw { seq_name } => self.sink.discard_raw(seq_name).await,
            SinkCommand::Plot(request) => self.plot.as_mut()?.plot(request).await,
            SinkCommand::Histogram(counts) => self.histogram.as_mut()?.histogram(counts).await,
        };
        Some(result)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SinkCommand>) -> DeliveryStats {
        while let Some(command) = rx.recv().await {
            match self.deliver(&command).await {
                Some(Ok(())) => self.stats.delivered += 1,
                Some(Err(e)) => {
                    self.stats.failed += 1;
                    match command {
                        SinkCommand::Plot(_) | SinkCommand::Histogram(_) => {
                            tracing::debug!(
                                kind = command.kind(),
                                error = %e,
                                "Live update dropped"
                            )
                        }
                        _ => tracing::warn!(
                            kind = command.kind(),
                            error = %e,
                            "Result delivery failed"
                        ),
                    }
                }
                None => self.stats.skipped += 1,
            }
        }
        self.stats
    }
}

/// Handle to the delivery task.
pub struct ResultDispatcher {
    tx: mpsc::UnboundedSender<SinkCommand>,
    worker: JoinHandle<DeliveryStats>,
}

impl ResultDispatcher {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(
        sink: Box<dyn ResultSink>,
        plot: Option<Box<dyn LivePlot>>,
        histogram: Option<Box<dyn HistogramSink>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            sink,
            plot,
            histogram,
            stats: DeliveryStats::default(),
        };
        Self {
            tx,
            worker: tokio::spawn(worker.run(rx)),
        }
    }

    /// Queue a command without waiting for delivery
    pub fn send(&self, command: SinkCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::debug!(kind = e.0.kind(), "Delivery task gone, command dropped");
        }
    }

    /// Deliver everything queued, stop the task and return its counters
    pub async fn close(self) -> DeliveryStats {
        drop(self.tx);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Delivery task ended abnormally");
                DeliveryStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemoryPlot, MemoryResultSink};

    #[tokio::test]
    async fn test_delivers_in_order() {
        let sink = MemoryResultSink::new();
        let dispatcher = ResultDispatcher::spawn(Box::new(sink.clone()), None, None);
        for i in 0..3 {
            dispatcher.send(SinkCommand::Append {
                seq_name: "A".into(),
                dataset: "time".into(),
                values: vec![i as f64],
            });
        }
        dispatcher.send(SinkCommand::Histogram(vec![1, 2]));
        let stats = dispatcher.close().await;

        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(sink.snapshot().await.dataset("A", "time"), vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let plot = MemoryPlot::unreachable();
        let dispatcher = ResultDispatcher::spawn(
            Box::new(MemoryResultSink::unreachable()),
            Some(Box::new(plot.clone())),
            Some(Box::new(plot)),
        );
        dispatcher.send(SinkCommand::DiscardRaw {
            seq_name: "A".into(),
        });
        dispatcher.send(SinkCommand::Histogram(vec![3]));
        let stats = dispatcher.close().await;
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 0);
    }
}
