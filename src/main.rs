use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use softdelete::{AuthManager, ChangeSetAdmin, Permission, SoftDeleteConfig, SoftDeleteDb, User};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "softdelete-admin")]
#[command(about = "Inspect and undelete ChangeSets in a softdelete snapshot")]
struct Cli {
    /// Snapshot written by `SoftDeleteDb::save_snapshot`
    #[arg(long)]
    snapshot: PathBuf,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every ChangeSet
    List,
    /// Show one ChangeSet with its records and root entity
    Show { id: i64 },
    /// Restore everything a ChangeSet holds and save the snapshot
    Undelete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SoftDeleteConfig::load(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?,
        None => SoftDeleteConfig::default(),
    };
    let db = SoftDeleteDb::open_snapshot(&cli.snapshot, config)
        .await
        .with_context(|| format!("Failed to open snapshot '{}'", cli.snapshot.display()))?;

    // whoever can read the snapshot file operates on it as admin
    let auth = Arc::new(AuthManager::new()?);
    let operator = User::new("operator".to_string(), String::new(), vec![Permission::Admin]);
    let admin = ChangeSetAdmin::new(db.clone(), auth);

    match cli.command {
        Command::List => {
            let summaries = admin.list(&operator).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No changesets");
            } else {
                for summary in summaries {
                    println!(
                        "{:>6}  {}  {:<24} {} record(s)",
                        summary.id,
                        summary.created_at.format("%Y-%m-%d %H:%M:%S"),
                        summary.root.to_string(),
                        summary.records
                    );
                }
            }
        }
        Command::Show { id } => {
            let detail = admin.view(&operator, id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("{}", detail.changeset);
                match &detail.root {
                    Some(root) => println!("root: {}", serde_json::to_string(root.fields())?),
                    None => println!("root: <removed>"),
                }
                for record in &detail.records {
                    println!("  {}", record);
                }
            }
        }
        Command::Undelete { id } => {
            let restored = admin.undelete(&operator, id).await?;
            db.save_snapshot(&cli.snapshot)
                .await
                .with_context(|| format!("Failed to save snapshot '{}'", cli.snapshot.display()))?;
            println!("Restored {} entit{}", restored, if restored == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
