use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use cohort_api::config::Config;
use cohort_api::db::DatabaseManager;
use cohort_api::domain::auth::{check_password, NewUser};
use cohort_api::logging;
use cohort_api::metrics;
use cohort_api::server::{start_server, AppState};
use cohort_api::storage::DatabaseStorage;

#[derive(Parser)]
#[command(name = "cohort_api")]
#[command(about = "Research cohort data API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Load demo types, tags, people and facts
    Seed {
        /// Number of people to generate
        #[arg(long, default_value_t = 25)]
        people: usize,
    },
    /// Create a login user
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        /// Role ids to grant (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
    },
}

async fn open_storage(config: &Config) -> anyhow::Result<DatabaseStorage> {
    let db = DatabaseManager::open(&config.database)
        .await
        .context("opening database")?;
    db.run_migrations().await.context("running migrations")?;
    Ok(DatabaseStorage::new(Arc::new(db)))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let storage = open_storage(&config).await?;

    match (&config.auth.bootstrap_email, &config.auth.bootstrap_password) {
        (Some(email), Some(password)) => {
            if let Some(user) = storage.bootstrap_admin(email, password).await? {
                info!("Created bootstrap admin {}", user.email);
            }
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("Both admin email and password are needed to bootstrap an admin user");
        }
        (None, None) => {}
    }
    storage.purge_expired_sessions().await?;

    if let Some(port) = config.metrics.port {
        metrics::init_metrics(port);
    }

    start_server(AppState::new(storage, config)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load()?;
    let _guard = logging::init_logging(&config.logging);

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Migrate => {
            open_storage(&config).await?;
            println!("Migrations applied to {}", config.database.url);
        }
        Commands::Seed { people } => {
            let storage = open_storage(&config).await?;
            let summary = storage.seed_demo_data(people).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::CreateUser {
            email,
            name,
            password,
            roles,
        } => {
            if let Err(message) = check_password(&password, config.auth.password_min_length) {
                bail!(message);
            }
            let storage = open_storage(&config).await?;
            let user = storage
                .create_user(NewUser {
                    email,
                    name,
                    password,
                    active: true,
                    role_ids: roles,
                })
                .await?;
            println!("Created user {} ({})", user.email, user.id);
        }
    }
    Ok(())
}
