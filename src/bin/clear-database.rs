use clap::Parser;
use cohort_api::config::Config;
use cohort_api::db::DatabaseManager;

/// Delete every row from every table, keeping the schema.
#[derive(Parser)]
#[command(name = "clear-database")]
struct Args {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let config = Config::load()?;

    if !args.yes {
        println!(
            "WARNING: this will delete ALL data from {}",
            config.database.url
        );
        println!("Press Enter to continue or Ctrl+C to cancel...");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
    }

    println!("Clearing database...");
    let db = DatabaseManager::open(&config.database).await?;
    db.run_migrations().await?;
    db.clear_all_data().await?;

    println!("Database cleared");
    Ok(())
}
