//! Command line interface for the research workflow

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outreach_research_sdk::{SubjectId, TenantId, WorkflowResult};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::research::state::derive_state;
use crate::research::ResearchOrchestrator;

/// Company research for B2B outreach
#[derive(Parser, Debug, Clone)]
#[command(name = "outreach-research", version, about)]
pub struct Cli {
    /// YAML settings file
    #[arg(long, env = "OUTREACH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the settings file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Tenant that owns the companies
    #[arg(long, env = "OUTREACH_TENANT", global = true)]
    pub tenant: Option<TenantId>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the database schema
    InitDb,

    /// Register a company to research
    AddCompany {
        name: String,
        #[arg(long)]
        website: Option<String>,
    },

    /// List the tenant's companies
    List,

    /// Start or resume research
    Research {
        id: SubjectId,
        /// Provider name (openai, claude); defaults to the configured provider
        #[arg(long)]
        provider: Option<String>,
        /// Restart at step 1 even if a run is in progress
        #[arg(long)]
        force: bool,
    },

    /// Show the duplicate-trigger guard's view of a company
    Status { id: SubjectId },

    /// Poll a pending deep research background job
    Poll { id: SubjectId },

    /// Deliver deep research text for a background job and continue
    CompleteJob {
        id: SubjectId,
        /// File holding the research text, `-` for stdin
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print a company's research record
    Show {
        id: SubjectId,
        /// Print only the rendered HTML report
        #[arg(long)]
        html: bool,
    },

    /// Print a company's workflow events
    Events {
        id: SubjectId,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Clear all research results for a company
    Reset { id: SubjectId },

    /// Delete a company and its event log
    Delete { id: SubjectId },
}

/// Run a parsed command, returning the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.database.clone() {
        config.database_path = path;
    }

    let orchestrator = ResearchOrchestrator::from_config(&config)?;
    let db = orchestrator.database();

    match cli.command {
        Command::InitDb => {
            println!(
                "Database ready at {} (schema v{})",
                config.database_path.display(),
                db.get_schema_version()?
            );
            Ok(0)
        }
        Command::AddCompany { name, website } => {
            let tenant = require_tenant(cli.tenant)?;
            let id = db.insert_company(tenant, &name, website.as_deref())?;
            println!("{}", id);
            Ok(0)
        }
        Command::List => {
            let tenant = require_tenant(cli.tenant)?;
            for subject in db.list_companies(tenant)? {
                let state = derive_state(&subject);
                println!(
                    "{:>6}  {:<40}  {:<28}  {:?}",
                    subject.id,
                    subject.name,
                    subject.status.to_string(),
                    state
                );
            }
            Ok(0)
        }
        Command::Research { id, provider, force } => {
            let tenant = require_tenant(cli.tenant)?;
            let provider = provider.unwrap_or_else(|| orchestrator.settings().default_provider.clone());
            let result = orchestrator.start(tenant, id, &provider, force).await;
            print_result(&result)
        }
        Command::Status { id } => {
            let tenant = require_tenant(cli.tenant)?;
            print_json(&orchestrator.check_status(tenant, id))?;
            Ok(0)
        }
        Command::Poll { id } => {
            let tenant = require_tenant(cli.tenant)?;
            let result = orchestrator.poll_background_job(tenant, id).await;
            print_result(&result)
        }
        Command::CompleteJob { id, file, provider } => {
            let tenant = require_tenant(cli.tenant)?;
            let text = read_input(&file)?;
            let result = orchestrator
                .complete_background_job(tenant, id, provider.as_deref().unwrap_or(""), text)
                .await;
            print_result(&result)
        }
        Command::Show { id, html } => {
            let tenant = require_tenant(cli.tenant)?;
            let subject = db
                .get_company(tenant, id)?
                .with_context(|| format!("Company {} not found", id))?;
            if html {
                match subject.report_html {
                    Some(report) => println!("{}", report),
                    None => {
                        eprintln!("Company {} has no report yet", id);
                        return Ok(1);
                    }
                }
            } else {
                print_json(&subject)?;
            }
            Ok(0)
        }
        Command::Events { id, limit } => {
            let tenant = require_tenant(cli.tenant)?;
            print_json(&db.get_events(tenant, id, limit)?)?;
            Ok(0)
        }
        Command::Reset { id } => {
            let tenant = require_tenant(cli.tenant)?;
            print_result(&orchestrator.reset_research(tenant, id))
        }
        Command::Delete { id } => {
            let tenant = require_tenant(cli.tenant)?;
            if db.delete_company(tenant, id)? {
                println!("Deleted company {}", id);
                Ok(0)
            } else {
                eprintln!("Company {} not found", id);
                Ok(1)
            }
        }
    }
}

fn require_tenant(tenant: Option<TenantId>) -> Result<TenantId> {
    tenant.context("--tenant (or OUTREACH_TENANT) is required for this command")
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read research text from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_result(result: &WorkflowResult) -> Result<i32> {
    print_json(result)?;
    Ok(if result.success { 0 } else { 1 })
}
