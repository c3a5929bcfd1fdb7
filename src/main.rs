use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgvector_perf::commands::{
    add_point, cache_stats, clear_cache, delete_point, get_point, initialize_storage,
    list_points, prepare_features, prepare_intermediate, show_config, write_config,
};
use pgvector_perf::config::{Config, get_config_dir};
use pgvector_perf::database::postgres::ListOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgvector-perf")]
#[command(about = "pgvector point store and embedding dataset preparation")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// PostgreSQL connection URL, overriding config and environment
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or show it
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Create the database, vector extension, table and index
    Init {
        /// Fail if the database already exists
        #[arg(long)]
        strict: bool,
    },
    /// Manage stored points
    Points {
        #[command(subcommand)]
        command: PointsCommand,
    },
    /// Run a dataset preparation stage
    Prepare {
        #[command(subcommand)]
        stage: PrepareStage,
    },
    /// Inspect or clear the embedding cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum PointsCommand {
    /// List points, newest first
    List {
        #[arg(long)]
        model: Option<String>,
        /// Case-insensitive substring of the text
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Oldest first
        #[arg(long)]
        asc: bool,
    },
    /// Show one point
    Get { id: i64 },
    /// Delete one point
    Delete {
        id: i64,
        /// Succeed when the point does not exist
        #[arg(long)]
        missing_ok: bool,
    },
    /// Store a point whose embedding is read from a JSON array file
    Add {
        #[arg(long)]
        text: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        embedding_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum PrepareStage {
    /// Deduplicate the translation dataset into the intermediate file
    Intermediate,
    /// Embed the intermediate file into the feature file
    Features,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show entry count for the configured model
    Stats,
    /// Remove every cached embedding for the configured model
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load(&config_dir).context("Failed to load configuration")?;
    let url = cli.database_url.as_deref();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_config(&config)?;
            }
        }
        Commands::Init { strict } => {
            initialize_storage(&config, url, strict).await?;
        }
        Commands::Points { command } => match command {
            PointsCommand::List {
                model,
                text,
                limit,
                offset,
                asc,
            } => {
                let options = ListOptions {
                    model,
                    text,
                    limit: Some(limit),
                    offset: Some(offset),
                    sort_desc: !asc,
                };
                list_points(&config, url, &options).await?;
            }
            PointsCommand::Get { id } => {
                get_point(&config, url, id).await?;
            }
            PointsCommand::Delete { id, missing_ok } => {
                delete_point(&config, url, id, missing_ok).await?;
            }
            PointsCommand::Add {
                text,
                model,
                embedding_file,
            } => {
                add_point(&config, url, text, model, &embedding_file).await?;
            }
        },
        Commands::Prepare { stage } => match stage {
            PrepareStage::Intermediate => prepare_intermediate(&config).await?,
            PrepareStage::Features => prepare_features(&config).await?,
        },
        Commands::Cache { command } => match command {
            CacheCommand::Stats => cache_stats(&config).await?,
            CacheCommand::Clear => clear_cache(&config).await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn init_command() {
        let cli = Cli::try_parse_from(["pgvector-perf", "init", "--strict"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Init { strict: true }));
        }
    }

    #[test]
    fn points_list_defaults() {
        let parsed = Cli::try_parse_from(["pgvector-perf", "points", "list"]).expect("parse");

        if let Commands::Points {
            command:
                PointsCommand::List {
                    model,
                    limit,
                    offset,
                    asc,
                    ..
                },
        } = parsed.command
        {
            assert_eq!(model, None);
            assert_eq!(limit, 20);
            assert_eq!(offset, 0);
            assert!(!asc);
        } else {
            panic!("expected points list");
        }
    }

    #[test]
    fn points_add_requires_embedding_file() {
        let cli = Cli::try_parse_from(["pgvector-perf", "points", "add", "--text", "hi"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn global_options_after_subcommand() {
        let parsed = Cli::try_parse_from([
            "pgvector-perf",
            "points",
            "delete",
            "7",
            "--missing-ok",
            "--database-url",
            "postgres://localhost/db",
            "--config-dir",
            "/tmp/conf",
        ])
        .expect("parse");

        assert_eq!(
            parsed.database_url.as_deref(),
            Some("postgres://localhost/db")
        );
        assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/conf")));
        assert!(matches!(
            parsed.command,
            Commands::Points {
                command: PointsCommand::Delete {
                    id: 7,
                    missing_ok: true
                }
            }
        ));
    }

    #[test]
    fn prepare_stages() {
        let parsed = Cli::try_parse_from(["pgvector-perf", "prepare", "features"]).expect("parse");
        assert!(matches!(
            parsed.command,
            Commands::Prepare {
                stage: PrepareStage::Features
            }
        ));
    }

    #[test]
    fn config_show_flag() {
        let parsed = Cli::try_parse_from(["pgvector-perf", "config", "--show"]).expect("parse");
        assert!(matches!(parsed.command, Commands::Config { show: true }));
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["pgvector-perf", "serve"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["pgvector-perf", "--help"]);

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        } else {
            panic!("--help should short-circuit parsing");
        }
    }
}
