use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::database::postgres::{ListOptions, NewPoint, PgvectorClient, Point};
use crate::embeddings::{EmbeddingCache, OllamaClient};
use crate::pipeline::{DatasetPipeline, JsonlTranslationSource, PipelineStats, SeenSet};

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("PostgreSQL Settings:").bold().yellow());
    match &config.postgres.url {
        Some(url) => eprintln!(
            "  URL: {}",
            style(crate::database::postgres::redact_url(url)).cyan()
        ),
        None => eprintln!("  URL: {}", style("from environment").dim()),
    }
    eprintln!("  Table: {}", style(&config.postgres.vector_table).cyan());
    eprintln!("  Index: {}", style(&config.postgres.vector_index).cyan());
    eprintln!(
        "  Dimensions: {}",
        style(config.postgres.vector_dimensions).cyan()
    );
    eprintln!(
        "  Index Parameters: {} (m = {}, ef_construction = {})",
        style(config.postgres.index.distance).cyan(),
        config.postgres.index.m,
        config.postgres.index.ef_construction
    );

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Pipeline Settings:").bold().yellow());
    let pipeline = &config.pipeline;
    eprintln!("  Dataset: {}", style(&pipeline.dataset_name).cyan());
    eprintln!("  Dataset Dir: {}", style(pipeline.dataset_dir.display()).cyan());
    eprintln!("  Subsets: {}", style(pipeline.subsets.join(", ")).cyan());
    eprintln!("  Splits: {}", style(pipeline.splits.join(", ")).cyan());
    eprintln!(
        "  Chunk/Batch Size: {}/{}",
        style(pipeline.chunk_size).cyan(),
        style(pipeline.batch_size).cyan()
    );
    eprintln!("  Compression: {}", style(pipeline.compression).cyan());
    eprintln!(
        "  Intermediate: {}",
        style(pipeline.intermediate_path.display()).cyan()
    );
    eprintln!("  Features: {}", style(pipeline.feature_path.display()).cyan());
    eprintln!("  Cache Dir: {}", style(pipeline.cache_dir.display()).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Persist the current configuration, creating the file with defaults if needed
#[inline]
pub fn write_config(config: &Config) -> Result<()> {
    let existed = config.config_file_path().exists();
    config.save().context("Failed to save configuration")?;

    if existed {
        println!(
            "Configuration rewritten at {}",
            config.config_file_path().display()
        );
    } else {
        println!(
            "Default configuration written to {}",
            config.config_file_path().display()
        );
    }
    Ok(())
}

fn connect(config: &Config, url: Option<&str>) -> Result<PgvectorClient> {
    PgvectorClient::from_config(config, url).context("Failed to configure pgvector client")
}

/// Create database, extension, table and index
#[inline]
pub async fn initialize_storage(config: &Config, url: Option<&str>, strict: bool) -> Result<()> {
    let client = connect(config, url)?;
    client
        .initialize(strict)
        .await
        .context("Failed to initialize storage")?;

    let count = client.points().count(None).await?;
    println!(
        "Storage ready: table {} holds {} points",
        client.settings().vector_table,
        count
    );
    client.close().await;
    Ok(())
}

fn print_point(point: &Point) {
    println!("{} (ID: {})", style(&point.text).bold(), point.id);
    println!("   Model: {}", point.model);
    println!("   Dimensions: {}", point.embedding.len());
    println!(
        "   Created: {}",
        point.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

#[inline]
pub async fn list_points(config: &Config, url: Option<&str>, options: &ListOptions) -> Result<()> {
    let client = connect(config, url)?;
    let points = client
        .points()
        .list(options)
        .await
        .context("Failed to list points")?;
    let total = client.points().count(options.model.as_deref()).await?;

    if points.is_empty() {
        println!("No points found.");
    } else {
        println!("Points ({} shown, {} total):", points.len(), total);
        println!();
        for point in &points {
            print_point(point);
            println!();
        }
    }

    client.close().await;
    Ok(())
}

#[inline]
pub async fn get_point(config: &Config, url: Option<&str>, id: i64) -> Result<()> {
    let client = connect(config, url)?;
    let point = client.points().retrieve(id, false).await?;
    if let Some(point) = point {
        print_point(&point);
    }
    client.close().await;
    Ok(())
}

#[inline]
pub async fn delete_point(
    config: &Config,
    url: Option<&str>,
    id: i64,
    missing_ok: bool,
) -> Result<()> {
    let client = connect(config, url)?;
    if client.points().delete(id, missing_ok).await? {
        println!("Deleted point {}", id);
    } else {
        println!("Point {} does not exist", id);
    }
    client.close().await;
    Ok(())
}

/// Read an embedding stored as a JSON array of numbers
#[inline]
pub fn read_embedding_file(path: &Path) -> Result<Vec<f32>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read embedding file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Embedding file is not a JSON array: {}", path.display()))
}

#[inline]
pub async fn add_point(
    config: &Config,
    url: Option<&str>,
    text: String,
    model: Option<String>,
    embedding_file: &Path,
) -> Result<()> {
    let embedding = read_embedding_file(embedding_file)?;
    let mut new_point = NewPoint::new(text, embedding);
    if let Some(model) = model {
        new_point = new_point.with_model(model);
    }

    let client = connect(config, url)?;
    let point = client
        .points()
        .create(&new_point)
        .await
        .context("Failed to create point")?;
    println!("Created point:");
    print_point(&point);
    client.close().await;
    Ok(())
}

fn print_stats(stage: &str, stats: &PipelineStats) {
    println!("{} completed!", stage);
    println!("  Rows read: {}", stats.rows_read);
    println!("  Rows written: {}", stats.rows_written);
    println!("  Chunks flushed: {}", stats.chunks_flushed);
    if stats.duplicates_skipped > 0 || stats.empty_skipped > 0 {
        println!("  Duplicates skipped: {}", stats.duplicates_skipped);
        println!("  Empty texts skipped: {}", stats.empty_skipped);
    }
    if stats.cache_hits > 0 || stats.cache_misses > 0 {
        println!("  Cache hits: {}", stats.cache_hits);
        println!("  Embeddings computed: {}", stats.cache_misses);
    }
}

/// Build the deduplicated intermediate file from the local dataset copy
#[inline]
pub async fn prepare_intermediate(config: &Config) -> Result<()> {
    let pipeline = DatasetPipeline::new(config.pipeline.clone())?;
    let source = JsonlTranslationSource::new(
        &config.pipeline.dataset_dir,
        config.pipeline.dataset_name.clone(),
    );
    let seen = SeenSet::open(&config.pipeline.cache_dir)
        .await
        .context("Failed to open seen-text set")?;

    let stats = pipeline.build_intermediate(&source, &seen).await;
    seen.close().await;
    let stats = stats.context("Intermediate stage failed")?;

    print_stats("Intermediate stage", &stats);
    println!(
        "Dataset successfully saved as '{}'",
        config.pipeline.intermediate_path.display()
    );
    Ok(())
}

/// Embed the intermediate file into the feature file
#[inline]
pub async fn prepare_features(config: &Config) -> Result<()> {
    let pipeline = DatasetPipeline::new(config.pipeline.clone())?;
    let client = OllamaClient::new(&config.ollama)?;

    let check = client.clone();
    tokio::task::spawn_blocking(move || check.ensure_model_available())
        .await
        .context("Health check task failed")?
        .context("Ollama is not ready")?;

    let cache = EmbeddingCache::open(&config.pipeline.cache_dir, client.model())
        .await
        .context("Failed to open embedding cache")?;
    info!("Using embedding cache {}", cache.path().display());

    let stats = pipeline
        .build_features(&cache, &client, config.ollama.embedding_dimension as usize)
        .await;
    cache.close().await;
    let stats = stats.context("Feature stage failed")?;

    print_stats("Feature stage", &stats);
    println!(
        "Dataset successfully saved as '{}'",
        config.pipeline.feature_path.display()
    );
    Ok(())
}

#[inline]
pub async fn cache_stats(config: &Config) -> Result<()> {
    let model = &config.ollama.model;
    let path = EmbeddingCache::path_for(&config.pipeline.cache_dir, model);
    if !path.exists() {
        println!("No embedding cache for {} at {}", model, path.display());
        return Ok(());
    }

    let cache = EmbeddingCache::open(&config.pipeline.cache_dir, model).await?;
    let entries = cache.len().await?;
    cache.close().await;

    println!("Embedding cache for {}", style(model).bold());
    println!("  Path: {}", path.display());
    println!("  Entries: {}", entries);
    Ok(())
}

#[inline]
pub async fn clear_cache(config: &Config) -> Result<()> {
    let model = &config.ollama.model;
    let cache = EmbeddingCache::open(&config.pipeline.cache_dir, model).await?;
    let removed = cache.clear().await?;
    cache.close().await;

    println!("Removed {} cached embeddings for {}", removed, model);
    Ok(())
}
