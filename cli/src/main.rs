use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vecsync_engine::{
    DeletionTracker, EngineConfig, InMemoryVectorStore, RepositoryContext, SqliteVersioningClient,
    SyncManager, SyncStateStore, VectorStoreWorker,
};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "vecsync")]
#[command(about = "Bidirectional sync between a vector document store and a versioned SQL backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the versioning engine from the vector store's current content
    /// and make the first commit.
    Init {
        collection: String,
        #[arg(long, default_value = "initial sync")]
        message: String,
    },
    /// Report the current branch, HEAD, and any undetected local changes.
    Status,
    /// Stage detected local changes and commit them.
    Commit {
        #[arg(long, default_value = "sync")]
        message: String,
        #[arg(long, default_value_t = true)]
        auto_stage: bool,
        #[arg(long)]
        replay: bool,
    },
    /// Pull from a remote; refuses if local changes are undetected first.
    Pull {
        #[arg(default_value = "origin")]
        remote: String,
        #[arg(long)]
        force: bool,
    },
    /// Push to a remote; refuses if local changes are undetected first.
    Push {
        #[arg(default_value = "origin")]
        remote: String,
        #[arg(long)]
        force: bool,
    },
    /// Switch branches and reconcile every configured collection against
    /// the new HEAD.
    Checkout {
        reference: String,
        #[arg(long)]
        create: bool,
        #[arg(long)]
        preserve_local_changes: bool,
        #[arg(long)]
        force_reset: bool,
    },
    /// Three-way merge a branch into the current one.
    Merge {
        reference: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        auto_commit: bool,
    },
    /// Reset the current branch to a reference and rebuild the vector
    /// store from it.
    Reset {
        reference: String,
        #[arg(long)]
        hard: bool,
    },
    /// Rebuild every configured collection from the current HEAD.
    Import,
    /// Inspect or edit the CLI's own configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration.
    Show,
    /// Point the CLI at a different repository root.
    SetRepoPath { path: String },
    /// Track an additional vector-store collection.
    AddCollection { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "vecsync=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    if let Commands::Config { action } = &cli.command {
        return run_config(action, config);
    }

    let ctx = Arc::new(build_context(&config)?);
    let carry_mode_default = ctx.config.carry_mode_default;
    let manager = SyncManager::new(ctx);

    match cli.command {
        Commands::Init { collection, message } => {
            let result = manager.initialize(&collection, &message).await?;
            print_result("init", &result);
        }
        Commands::Status => {
            let result = manager.status().await?;
            print_result("status", &result);
        }
        Commands::Commit { message, auto_stage, replay } => {
            let result = manager.commit(&message, auto_stage, replay).await?;
            print_result("commit", &result);
        }
        Commands::Pull { remote, force } => {
            let result = manager.pull(&remote, force).await?;
            print_result("pull", &result);
        }
        Commands::Push { remote, force } => {
            let result = manager.push(&remote, force).await?;
            print_result("push", &result);
        }
        Commands::Checkout { reference, create, preserve_local_changes, force_reset } => {
            let result = manager
                .checkout(&reference, create, preserve_local_changes || carry_mode_default, force_reset)
                .await?;
            print_result("checkout", &result);
        }
        Commands::Merge { reference, force, auto_commit } => {
            let result = manager.merge(&reference, force, auto_commit).await?;
            print_result("merge", &result);
        }
        Commands::Reset { reference, hard } => {
            let result = manager.reset(&reference, hard).await?;
            print_result("reset", &result);
        }
        Commands::Import => {
            let result = manager.import().await?;
            print_result("import", &result);
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn run_config(action: &ConfigAction, mut config: Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("repo_path: {}", config.repo_path().display());
            println!("default_branch: {}", config.default_branch());
            println!("collections: {:?}", config.collections);
            println!("versioning_db: {}", config.versioning_db_path().display());
            println!("state_db: {}", config.state_db_path().display());
        }
        ConfigAction::SetRepoPath { path } => {
            config.repo_path = Some(path.clone());
            config.save()?;
            println!("repo_path set to {path}");
        }
        ConfigAction::AddCollection { name } => {
            if !config.collections.contains(name) {
                config.collections.push(name.clone());
                config.save()?;
            }
            println!("tracking collection {name}");
        }
    }
    Ok(())
}

fn build_context(config: &Config) -> anyhow::Result<RepositoryContext> {
    let repo_path = config.repo_path();
    std::fs::create_dir_all(&repo_path)?;

    let versioning_db = config.versioning_db_path();
    if let Some(parent) = versioning_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let versioning = Arc::new(SqliteVersioningClient::open(&versioning_db)?);

    let state_db = config.state_db_path();
    if let Some(parent) = state_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let sync_state = SyncStateStore::open(&state_db)?;
    let deletions = DeletionTracker::open(&state_db)?;

    let engine_config = EngineConfig::from_env();
    let vector_store = VectorStoreWorker::spawn(
        Arc::new(InMemoryVectorStore::new()),
        engine_config.worker_queue_capacity,
        engine_config.worker_queue_warn_threshold,
    );

    Ok(RepositoryContext::new(
        repo_path,
        versioning,
        vector_store,
        sync_state,
        deletions,
        engine_config,
    ))
}

fn print_result(pipeline: &str, result: &vecsync_engine::SyncResult) {
    println!("{pipeline}: {:?}", result.status);
    if let Some(branch) = &result.branch {
        println!("  branch: {branch}");
    }
    if let Some(hash) = &result.commit_hash {
        println!("  commit: {hash}");
    }
    if result.added + result.modified + result.deleted > 0 {
        println!("  added={} modified={} deleted={} chunks={}", result.added, result.modified, result.deleted, result.chunks_processed);
    }
    if !result.conflicts.is_empty() {
        println!("  {} conflict(s):", result.conflicts.len());
        for c in &result.conflicts {
            println!("    {} in {}", c.doc_id, c.collection_name);
        }
    }
    if let Some(err) = &result.error {
        println!("  error: {err}");
    }
}
