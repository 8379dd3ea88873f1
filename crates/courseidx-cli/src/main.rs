use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use courseidx_config::CourseIdxConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "courseidx", version, about = "Course content indexing pipeline")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Content root, overriding the configuration file
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the content root and index changes until interrupted
    Run {
        /// Number of queue workers
        #[arg(long)]
        concurrency: Option<usize>,
        /// Only work the queue, do not watch for changes
        #[arg(long)]
        no_watch: bool,
        /// Do not enqueue an index job per collection at startup
        #[arg(long)]
        no_seed: bool,
    },
    /// Queue a full reindex of a collection
    Reindex {
        /// Collection directory name
        collection: String,
    },
    /// Show queue counts
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the state and latest progress of a job
    Progress {
        /// Job id
        job_id: String,
    },
    /// List dead-lettered jobs, newest first
    DeadLetters {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Re-enqueue a dead-lettered job
    Replay {
        /// Dead-letter index
        index: u64,
    },
    /// Stop workers from claiming new jobs
    Pause,
    /// Let workers claim jobs again
    Resume,
    /// Remove finished jobs
    Clean {
        /// Only remove jobs that finished at least this many hours ago
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
    /// Show effective configuration
    Config,
    /// Validate configuration file
    Validate,
}

fn find_config() -> Option<PathBuf> {
    // 1. COURSEIDX_CONFIG environment variable
    if let Ok(path) = std::env::var("COURSEIDX_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. courseidx.yaml in current directory
    let cwd_config = PathBuf::from("courseidx.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/courseidx/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/courseidx/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Load the configuration, apply flag overrides and defaults.
fn load_config(path: Option<PathBuf>, root: Option<String>) -> anyhow::Result<CourseIdxConfig> {
    let mut config = match path.or_else(find_config) {
        Some(path) => CourseIdxConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CourseIdxConfig::default(),
    };
    if let Some(root) = root {
        config.content.root = root;
    }
    Ok(config.effective())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config, cli.root)?;

    match cli.command {
        Commands::Validate => commands::config::validate(&config),
        Commands::Config => commands::config::show(&config),
        Commands::Run {
            concurrency,
            no_watch,
            no_seed,
        } => {
            let mut config = config;
            if let Some(concurrency) = concurrency {
                config.queue.concurrency = concurrency;
            }
            config.validate_or_err()?;
            commands::run::run(config, !no_watch, !no_seed).await
        }
        Commands::Reindex { collection } => commands::reindex::run(&config, &collection),
        Commands::Stats { json } => commands::queue::stats(&config, json),
        Commands::Progress { job_id } => commands::queue::progress(&config, &job_id),
        Commands::DeadLetters { limit } => commands::queue::dead_letters(&config, limit),
        Commands::Replay { index } => commands::queue::replay(&config, index),
        Commands::Pause => commands::queue::set_paused(&config, true),
        Commands::Resume => commands::queue::set_paused(&config, false),
        Commands::Clean { older_than_hours } => commands::queue::clean(
            &config,
            older_than_hours.unwrap_or(config.queue.retention_hours),
        ),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["courseidx", "run", "--concurrency", "4", "--no-watch"]).unwrap();
        match cli.command {
            Commands::Run {
                concurrency,
                no_watch,
                no_seed,
            } => {
                assert_eq!(concurrency, Some(4));
                assert!(no_watch);
                assert!(!no_seed);
            }
            _ => panic!("expected run"),
        }

        let cli = Cli::try_parse_from(["courseidx", "dead-letters", "--limit", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::DeadLetters { limit: 5 }));

        let cli = Cli::try_parse_from(["courseidx", "--root", "/srv/courses", "stats"]).unwrap();
        assert_eq!(cli.root.as_deref(), Some("/srv/courses"));

        assert!(Cli::try_parse_from(["courseidx", "replay", "soon"]).is_err());
    }

    #[test]
    fn test_root_override_moves_state_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courseidx.yaml");
        std::fs::write(&path, "content:\n  root: /srv/courses\n").unwrap();

        let config = load_config(Some(path), Some("/tmp/other".to_string())).unwrap();
        assert_eq!(config.content.root, "/tmp/other");
        assert_eq!(config.queue.path.as_deref(), Some("/tmp/other/.courseidx/queue.db"));
    }
}
