
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{PerfError, Result};

/// Codec applied to every column of a pipeline output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParquetCompression {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    Uncompressed,
}

impl ParquetCompression {
    #[inline]
    pub fn to_parquet(self) -> Compression {
        match self {
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

impl std::fmt::Display for ParquetCompression {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            ParquetCompression::Snappy => "snappy",
            ParquetCompression::Zstd => "zstd",
            ParquetCompression::Gzip => "gzip",
            ParquetCompression::Uncompressed => "uncompressed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkSummary {
    pub rows_written: u64,
    pub row_groups: u64,
}

/// Appends record batches to a Parquet file, one row group per batch.
///
/// Output goes to `<path>.partial` and is renamed into place by
/// [`ParquetSink::finish`]. A sink dropped before `finish` removes its
/// partial file, so an aborted run never leaves a truncated output behind.
pub struct ParquetSink {
    writer: Option<ArrowWriter<File>>,
    partial_path: PathBuf,
    final_path: PathBuf,
    summary: SinkSummary,
}

impl ParquetSink {
    #[inline]
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema: SchemaRef,
        compression: ParquetCompression,
        max_rows_per_group: usize,
    ) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut partial_name = final_path.as_os_str().to_owned();
        partial_name.push(".partial");
        let partial_path = PathBuf::from(partial_name);

        let file = File::create(&partial_path).map_err(|e| {
            PerfError::Pipeline(format!(
                "Failed to create {}: {}",
                partial_path.display(),
                e
            ))
        })?;

        let properties = WriterProperties::builder()
            .set_compression(compression.to_parquet())
            .set_max_row_group_size(max_rows_per_group.max(1))
            .build();
        let writer = ArrowWriter::try_new(file, schema, Some(properties))?;

        debug!(
            "Opened parquet sink {} ({})",
            final_path.display(),
            compression
        );

        Ok(Self {
            writer: Some(writer),
            partial_path,
            final_path,
            summary: SinkSummary::default(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    #[inline]
    pub fn summary(&self) -> SinkSummary {
        self.summary
    }

    /// Writes `batch` and closes the current row group.
    #[inline]
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PerfError::Pipeline("Parquet sink already finished".to_string()))?;
        writer.write(batch)?;
        writer.flush()?;

        self.summary.rows_written += batch.num_rows() as u64;
        self.summary.row_groups += 1;
        Ok(())
    }

    /// Writes the footer and moves the file to its final path.
    ///
    /// On failure the partial file is removed like on drop.
    #[inline]
    pub fn finish(mut self) -> Result<SinkSummary> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| PerfError::Pipeline("Parquet sink already finished".to_string()))?;
        if let Err(e) = writer.close() {
            self.remove_partial();
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&self.partial_path, &self.final_path) {
            self.remove_partial();
            return Err(PerfError::Pipeline(format!(
                "Failed to move {} to {}: {}",
                self.partial_path.display(),
                self.final_path.display(),
                e
            )));
        }

        info!(
            "Wrote {} rows in {} row groups to {}",
            self.summary.rows_written,
            self.summary.row_groups,
            self.final_path.display()
        );
        Ok(self.summary)
    }

    fn remove_partial(&self) {
        if let Err(e) = fs::remove_file(&self.partial_path) {
            warn!(
                "Failed to remove unfinished output {}: {}",
                self.partial_path.display(),
                e
            );
        }
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            self.remove_partial();
        }
    }
}

impl std::fmt::Debug for ParquetSink {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("finished", &self.writer.is_none())
            .field("summary", &self.summary)
            .finish()
    }
}
