//! Offline dataset preparation.
//!
//! The intermediate stage streams translation pairs, drops texts already
//! seen in this run and writes the survivors to Parquet with sequential ids.
//! The feature stage reads that file back batch by batch, embeds each batch
//! through the cache and writes an enriched copy.

pub mod dedup;
pub mod records;
pub mod source;
pub mod writer;


use indicatif::{ProgressBar, ProgressStyle};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::embeddings::{EmbeddingCache, Embedder, embed_texts, encode_embedding};
use crate::{PerfError, Result};

pub use dedup::SeenSet;
pub use records::{FeatureRecord, IntermediateRecord};
pub use source::{JsonlTranslationSource, TranslationRow, TranslationSource, target_language};
pub use writer::{ParquetCompression, ParquetSink, SinkSummary};

/// Counters reported by either stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub rows_read: u64,
    pub rows_written: u64,
    pub duplicates_skipped: u64,
    pub empty_skipped: u64,
    pub chunks_flushed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl std::fmt::Display for PipelineStats {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {} rows, wrote {} rows in {} chunks ({} duplicates, {} empty skipped; {} cache hits, {} computed)",
            self.rows_read,
            self.rows_written,
            self.chunks_flushed,
            self.duplicates_skipped,
            self.empty_skipped,
            self.cache_hits,
            self.cache_misses
        )
    }
}

#[derive(Debug, Clone)]
pub struct DatasetPipeline {
    config: PipelineConfig,
}

impl DatasetPipeline {
    #[inline]
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the extraction stage into `intermediate_path`.
    ///
    /// `seen` is cleared first. Each emitted text gets the next id starting
    /// at 1; a row missing the pivot or target language aborts the run and
    /// leaves no output file.
    #[inline]
    pub async fn build_intermediate(
        &self,
        source: &dyn TranslationSource,
        seen: &SeenSet,
    ) -> Result<PipelineStats> {
        let config = &self.config;
        seen.clear().await?;

        let mut sink = ParquetSink::create(
            &config.intermediate_path,
            records::intermediate_schema(),
            config.compression,
            config.chunk_size,
        )?;
        let mut stats = PipelineStats::default();
        let mut next_id: i64 = 1;
        let mut chunk: Vec<IntermediateRecord> = Vec::with_capacity(config.chunk_size);

        for subset in &config.subsets {
            let target = target_language(subset, &config.pivot_language)?;

            for split in &config.splits {
                let Some(rows) = source.rows(subset, split)? else {
                    warn!("No '{}' split for subset '{}', skipping", split, subset);
                    continue;
                };
                let bar = self.progress_bar(format!("{subset}:{split}"));

                for row in rows {
                    let row = row?;
                    stats.rows_read += 1;
                    bar.inc(1);

                    let pair = [
                        (config.pivot_language.as_str(), row.text(&config.pivot_language)?),
                        (target.as_str(), row.text(&target)?),
                    ];
                    for (language, text) in pair {
                        if text.is_empty() {
                            stats.empty_skipped += 1;
                            continue;
                        }
                        if !seen.insert(text).await? {
                            stats.duplicates_skipped += 1;
                            continue;
                        }

                        chunk.push(IntermediateRecord {
                            id: next_id,
                            text: text.to_string(),
                            language: language.to_string(),
                            split: split.clone(),
                            subset: subset.clone(),
                            source: source.name().to_string(),
                        });
                        next_id += 1;

                        if chunk.len() >= config.chunk_size {
                            flush_chunk(&mut sink, &mut chunk, &mut stats)?;
                        }
                    }
                }

                flush_chunk(&mut sink, &mut chunk, &mut stats)?;
                bar.finish_and_clear();
            }
        }

        let summary = sink.finish()?;
        stats.rows_written = summary.rows_written;

        info!(
            "Intermediate dataset written to {}: {}",
            config.intermediate_path.display(),
            stats
        );
        Ok(stats)
    }

    /// Runs the enrichment stage from `intermediate_path` into `feature_path`.
    ///
    /// Every input batch becomes exactly one output row group. A batch whose
    /// schema does not match the intermediate layout aborts the run.
    #[inline]
    pub async fn build_features(
        &self,
        cache: &EmbeddingCache,
        embedder: &dyn Embedder,
        dim: usize,
    ) -> Result<PipelineStats> {
        let config = &self.config;

        let file = File::open(&config.intermediate_path).map_err(|e| {
            PerfError::Pipeline(format!(
                "Failed to open intermediate file {}: {}",
                config.intermediate_path.display(),
                e
            ))
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        records::validate_intermediate_schema(builder.schema())?;

        let total_rows =
            u64::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or_default();
        let reader = builder.with_batch_size(config.batch_size).build()?;

        let mut sink = ParquetSink::create(
            &config.feature_path,
            records::feature_schema(),
            config.compression,
            config.batch_size,
        )?;
        let mut stats = PipelineStats::default();
        let bar = self.progress_bar(format!("embedding with {}", embedder.model_name()));
        bar.set_length(total_rows);

        for batch in reader {
            let batch = batch?;
            records::validate_intermediate_schema(&batch.schema())?;

            let texts = records::string_column(&batch, records::TEXT_COLUMN)?;
            let embedded = embed_texts(cache, embedder, &texts, dim).await?;
            let encoded: Vec<String> = embedded
                .vectors
                .iter()
                .map(|vector| encode_embedding(vector))
                .collect();

            let enriched = records::feature_batch(&batch, embedder.model_name(), &encoded)?;
            sink.write_batch(&enriched)?;

            stats.rows_read += batch.num_rows() as u64;
            stats.chunks_flushed += 1;
            stats.cache_hits += embedded.cache_hits as u64;
            stats.cache_misses += embedded.computed as u64;
            bar.inc(batch.num_rows() as u64);
        }
        bar.finish_and_clear();

        let summary = sink.finish()?;
        stats.rows_written = summary.rows_written;

        info!(
            "Feature dataset written to {}: {}",
            config.feature_path.display(),
            stats
        );
        Ok(stats)
    }

    fn progress_bar(&self, message: String) -> ProgressBar {
        if !self.config.show_progress || !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner().with_style(style);
        bar.set_message(message);
        bar
    }
}

fn flush_chunk(
    sink: &mut ParquetSink,
    chunk: &mut Vec<IntermediateRecord>,
    stats: &mut PipelineStats,
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }

    sink.write_batch(&records::intermediate_batch(chunk)?)?;
    stats.chunks_flushed += 1;
    chunk.clear();
    Ok(())
}
