//! keesync - master/slave sync for KeePass databases
//!
//! Runs the sync jobs stored in a database the way a save would trigger them.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use keesync_core::{
    load_jobs, Credential, FileStore, KeepassDatabase, NoDocuments, SyncJob, SyncOrchestrator,
    SyncReport,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;

/// keesync - synchronize KeePass databases through sync job records
#[derive(Parser, Debug)]
#[command(name = "keesync")]
#[command(about = "Synchronize KeePass databases through sync job records")]
struct Cli {
    /// Path to a custom config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job of the database, then the jobs of its targets
    Sync(Unlock),
    /// List the jobs of the database and whether they can run
    Jobs(Unlock),
}

#[derive(Args, Debug)]
struct Unlock {
    /// Path to the KeePass database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Master password (falls back to the configured environment variable)
    #[arg(short, long)]
    password: Option<String>,

    /// Key file used together with the password
    #[arg(short, long)]
    keyfile: Option<PathBuf>,
}

impl Unlock {
    fn open(self, config: &Config) -> Result<KeepassDatabase> {
        let path = self
            .database
            .or_else(|| config.default_database.clone())
            .context("No database given and no default_database configured")?;

        let password = self
            .password
            .or_else(|| std::env::var(&config.password_env).ok())
            .unwrap_or_default();
        let credential = Credential::from_parts(&password, self.keyfile);

        tracing::info!("Opening {}", path.display());
        KeepassDatabase::unlock(&path, &credential)
            .with_context(|| format!("Failed to open {}", path.display()))
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("keesync=info".parse()?)
                .add_directive("keesync_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config)?;

    match cli.command {
        Command::Sync(unlock) => {
            let mut db = unlock.open(&config)?;
            let mut orchestrator = SyncOrchestrator::new(FileStore, NoDocuments, config.settings());
            let report = orchestrator.run_sync(&mut db);
            print_report(&report);
        }
        Command::Jobs(unlock) => {
            let db = unlock.open(&config)?;
            let jobs = load_jobs(&db, &config.jobs_group);
            if jobs.is_empty() {
                println!("No jobs in group '{}'", config.jobs_group);
            }
            for job in &jobs {
                println!("{}", describe(job));
            }
        }
    }

    Ok(())
}

fn describe(job: &SyncJob) -> String {
    let target = job
        .target_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let status = if job.disabled {
        "disabled".to_string()
    } else if job.is_slave {
        "runs when this database is a target".to_string()
    } else {
        match job.validate(false) {
            Ok(_) => "ready".to_string(),
            Err(e) => e.to_string(),
        }
    };

    let mut line = format!("{} -> {target} [{status}]", job.title);
    if !job.tags.is_empty() {
        line.push_str(&format!("\n    tags: {}", job.tags.join(", ")));
    }
    if !job.groups.is_empty() {
        line.push_str(&format!("\n    groups: {}", job.groups.join(", ")));
    }
    if job.export_user_and_pass_only {
        line.push_str("\n    user name and password only");
    }
    line
}

fn print_report(report: &SyncReport) {
    let merged = &report.merged;
    println!(
        "Ran {} jobs across {} databases",
        report.jobs_run,
        report.touched.len()
    );
    println!(
        "  created {}, updated {}, written back {}, relocated {}, deleted {}",
        merged.created, merged.updated, merged.written_back, merged.relocated, report.deleted
    );
    if merged.skipped_in_trash > 0 {
        println!("  skipped {} entries in the recycle bin", merged.skipped_in_trash);
    }
    for skipped in &report.skipped {
        println!("  skipped {skipped}");
    }
    for path in &report.touched {
        println!("  touched {}", path.display());
    }
    if !report.warnings.is_empty() {
        eprintln!("{} warnings:", report.warnings.len());
        for warning in &report.warnings {
            eprintln!("  {warning}");
        }
    }
}
