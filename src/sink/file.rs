//! CSV artifact writer with clean feature flag handling.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/<YYYY-MM-DD>/scan_list
//! <root>/<YYYY-MM-DD>/<experiment>/[<seq_name>/]<HHMM_SS>/header.json
//! <root>/<YYYY-MM-DD>/<experiment>/[<seq_name>/]<HHMM_SS>/<dataset>.csv
//! ```

use std::path::{Path, PathBuf};

use super::ArtifactHeader;

/// Name of the per-day artifact index
pub const SCAN_LIST: &str = "scan_list";

/// Directory holding the artifact described by `header`
pub fn artifact_dir(root: &Path, header: &ArtifactHeader) -> PathBuf {
    let mut dir = root.join(header.date()).join(&header.experiment);
    if header.is_multi {
        dir.push(&header.seq_name);
    }
    dir.join(header.timestamp())
}

/// File name for a dataset; anything outside `[A-Za-z0-9._-]` becomes `_`
pub fn dataset_file_name(dataset: &str) -> String {
    let stem: String = dataset
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.csv", stem)
}

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use crate::sink::ResultSink;
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs::{File, OpenOptions};

    struct DatasetWriter {
        writer: csv::Writer<File>,
        rows: usize,
    }

    struct OpenArtifact {
        dir: PathBuf,
        datasets: HashMap<String, DatasetWriter>,
    }

    /// Writes each artifact as a directory of CSV files.
    pub struct FileResultSink {
        root: PathBuf,
        artifacts: HashMap<String, OpenArtifact>,
    }

    impl FileResultSink {
        /// Sink writing below `root`
        pub fn new<P: AsRef<Path>>(root: P) -> Self {
            Self {
                root: root.as_ref().to_path_buf(),
                artifacts: HashMap::new(),
            }
        }

        /// Directory of the open artifact for `seq_name`
        pub fn artifact_path(&self, seq_name: &str) -> Option<&Path> {
            self.artifacts.get(seq_name).map(|a| a.dir.as_path())
        }
    }

    #[async_trait]
    impl ResultSink for FileResultSink {
        async fn create_artifact(&mut self, header: &ArtifactHeader) -> Result<()> {
            let dir = artifact_dir(&self.root, header);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create artifact directory at {:?}", dir))?;

            let file = File::create(dir.join("header.json"))
                .with_context(|| format!("Failed to create artifact header in {:?}", dir))?;
            serde_json::to_writer_pretty(file, header)
                .context("Failed to serialize artifact header")?;

            tracing::info!(seq_name = %header.seq_name, path = %dir.display(), "Artifact created");
            self.artifacts.insert(
                header.seq_name.clone(),
                OpenArtifact {
                    dir,
                    datasets: HashMap::new(),
                },
            );
            Ok(())
        }

        async fn append(&mut self, seq_name: &str, dataset: &str, values: &[f64]) -> Result<()> {
            let artifact = self
                .artifacts
                .get_mut(seq_name)
                .with_context(|| format!("No artifact open for sub-sequence '{}'", seq_name))?;

            if !artifact.datasets.contains_key(dataset) {
                let path = artifact.dir.join(dataset_file_name(dataset));
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create dataset file at {:?}", path))?;
                let mut writer = csv::Writer::from_writer(file);
                writer
                    .write_record(["index", dataset])
                    .context("Failed to write CSV header")?;
                artifact
                    .datasets
                    .insert(dataset.to_string(), DatasetWriter { writer, rows: 0 });
            }

            let Some(ds) = artifact.datasets.get_mut(dataset) else {
                anyhow::bail!("Dataset '{}' vanished", dataset);
            };
            for value in values {
                ds.writer
                    .write_record(&[ds.rows.to_string(), value.to_string()])
                    .context("Failed to write dataset row")?;
                ds.rows += 1;
            }
            ds.writer.flush().context("Failed to flush dataset file")?;
            Ok(())
        }

        async fn append_scan_list_entry(&mut self, header: &ArtifactHeader) -> Result<()> {
            let date_dir = self.root.join(header.date());
            std::fs::create_dir_all(&date_dir)
                .with_context(|| format!("Failed to create {:?}", date_dir))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(date_dir.join(SCAN_LIST))
                .context("Failed to open scan list")?;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            let location = artifact_dir(&self.root, header);
            writer
                .write_record([
                    header.timestamp(),
                    header.label(),
                    location.display().to_string(),
                ])
                .context("Failed to write scan list entry")?;
            writer.flush().context("Failed to flush scan list")?;
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::ScanError;
    use crate::sink::ResultSink;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Placeholder when built without `storage_csv`
    pub struct FileResultSink;

    impl FileResultSink {
        pub fn new<P: AsRef<Path>>(_root: P) -> Self {
            Self
        }

        pub fn artifact_path(&self, _seq_name: &str) -> Option<&Path> {
            None
        }
    }

    #[async_trait]
    impl ResultSink for FileResultSink {
        async fn create_artifact(&mut self, _header: &ArtifactHeader) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn append(&mut self, _seq_name: &str, _dataset: &str, _values: &[f64]) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn append_scan_list_entry(&mut self, _header: &ArtifactHeader) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::FileResultSink;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::FileResultSink;
