mod config;
mod plan_cmds;
mod serve_cmd;
mod user_cmds;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::task::TaskTracker;

use stride_core::compile::{IdStart, Level2Shape, OutlineCompiler};
use stride_core::generation::OpenAiSource;
use stride_core::pipeline::PlanPipeline;
use stride_core::service::GoalService;
use stride_core::store::PgPlanStore;
use stride_db::config::DbConfig;
use stride_db::pool;

use config::StrideConfig;

#[derive(Parser)]
#[command(name = "stride", about = "Goal tracker that turns generated plans into timelines")]
struct Cli {
    /// Database URL (overrides STRIDE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a stride config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the stride database and run migrations
    DbInit,
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// User management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Parse a markdown plan file and print its outline as JSON
    Outline {
        /// Path to the plan file
        file: PathBuf,
    },
    /// Compile a markdown plan file and print the insert operations as JSON
    Compile {
        /// Path to the plan file
        file: PathBuf,
        /// Goal the rows belong to
        #[arg(long, default_value_t = 1)]
        goal_id: i64,
        /// Highest timeline id already in use
        #[arg(long, default_value_t = 0)]
        timeline_start: i64,
        /// Highest plan item id already in use
        #[arg(long, default_value_t = 0)]
        item_start: i64,
        /// Level-2 shape: plan_item or timeline (defaults to the configured shape)
        #[arg(long)]
        shape: Option<Level2Shape>,
    },
    /// Stream a plan file through the re-segmenter and print each piece
    Replay {
        /// Path to the plan file
        file: PathBuf,
        /// Characters per simulated fragment
        #[arg(long, default_value_t = 16)]
        fragment_size: usize,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Add a user
    Add {
        /// Email address
        email: String,
        /// Generation quota (defaults to pipeline.default_quota)
        #[arg(long)]
        quota: Option<i32>,
    },
    /// Set a user's remaining generation quota
    SetQuota {
        /// User ID
        user_id: i64,
        /// New quota
        quota: i32,
    },
}

/// Execute the `stride init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        ..config::ConfigFile::default()
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  pipeline.level2_shape = {}", cfg.pipeline.level2_shape);
    println!();
    println!(
        "Next: set {} (or generation.api_key) and run `stride db-init`.",
        config::API_KEY_ENV
    );

    Ok(())
}

/// Execute the `stride db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = StrideConfig::resolve(cli_db_url)?;

    println!("Initializing stride database...");
    let pool::Bootstrap {
        pool: db_pool,
        created,
    } = pool::bootstrap(&resolved.db_config).await?;
    if created {
        println!(
            "Created database {}",
            resolved.db_config.database_name().unwrap_or_default()
        );
    }

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("stride db-init complete.");
    Ok(())
}

/// Execute the `stride serve` command.
async fn cmd_serve(resolved: StrideConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let openai = resolved.openai.with_context(|| {
        format!(
            "no completion API key configured; set {} or generation.api_key in {}",
            config::API_KEY_ENV,
            config::config_path().display()
        )
    })?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let compiler = OutlineCompiler::new(resolved.level2_shape);
    let source = Arc::new(OpenAiSource::new(openai)?);
    let store = Arc::new(PgPlanStore::new(db_pool.clone(), compiler));
    let tracker = TaskTracker::new();
    let pipeline = PlanPipeline::new(source, store).with_tracker(tracker.clone());
    let service = GoalService::new(db_pool.clone(), pipeline, compiler);

    tracing::info!(shape = %resolved.level2_shape, "plan compilation shape");
    let result = serve_cmd::run_serve(service, tracker, bind, port).await;
    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = StrideConfig::resolve(cli.database_url.as_deref())?;
            cmd_serve(resolved, &bind, port).await?;
        }
        Commands::User { command } => {
            let resolved = StrideConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                user_cmds::run_user_command(command, &db_pool, resolved.default_quota).await;
            db_pool.close().await;
            result?;
        }
        Commands::Outline { file } => {
            plan_cmds::run_outline(&file)?;
        }
        Commands::Compile {
            file,
            goal_id,
            timeline_start,
            item_start,
            shape,
        } => {
            let shape = match shape {
                Some(shape) => shape,
                None => StrideConfig::resolve(cli.database_url.as_deref())?.level2_shape,
            };
            let start = IdStart {
                timeline: timeline_start,
                plan_item: item_start,
            };
            plan_cmds::run_compile(&file, shape, goal_id, start)?;
        }
        Commands::Replay {
            file,
            fragment_size,
        } => {
            plan_cmds::run_replay(&file, fragment_size).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stride", &mut std::io::stdout());
        }
    }

    Ok(())
}
