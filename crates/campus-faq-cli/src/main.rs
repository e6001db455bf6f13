use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use campus_faq_api::{CampusFaqApi, ChatRequest};
use campus_faq_core::{parse_date, ChatLogFilter, FaqDraft, FaqId};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "faq")]
#[command(about = "Campus FAQ assistant CLI")]
struct Cli {
    #[arg(long, env = "CAMPUS_FAQ_DB", default_value = "./campus_faq.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Faq {
        #[command(subcommand)]
        command: Box<FaqCommand>,
    },
    /// Replace all FAQs with the built-in campus set and wipe chat history.
    Seed,
    /// Ask a question the way a student would.
    Ask(AskArgs),
    Stats,
    Logs {
        #[command(subcommand)]
        command: Box<LogsCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum FaqCommand {
    Add(FaqContentArgs),
    List,
    Update {
        #[arg(long)]
        faq_id: FaqId,
        #[command(flatten)]
        content: FaqContentArgs,
    },
    Delete {
        #[arg(long)]
        faq_id: FaqId,
    },
}

#[derive(Debug, Args)]
struct FaqContentArgs {
    #[arg(long)]
    question: String,
    #[arg(long)]
    answer: String,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    year: Option<String>,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    message: String,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    year: Option<String>,
}

#[derive(Debug, Subcommand)]
enum LogsCommand {
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
    Export(LogsExportArgs),
    Clear,
}

#[derive(Debug, Args)]
struct LogsExportArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    #[arg(long)]
    start_date: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    #[arg(long)]
    end_date: Option<String>,
}

impl FaqContentArgs {
    fn into_draft(self) -> FaqDraft {
        FaqDraft {
            question: self.question,
            answer: self.answer,
            tags: Some(self.tags),
            department: self.department,
            year: self.year,
        }
    }
}

impl LogsExportArgs {
    fn filter(&self) -> Result<ChatLogFilter> {
        Ok(ChatLogFilter {
            search: self.search.clone(),
            department: self.department.clone(),
            year: self.year.clone(),
            tag: self.tag.clone(),
            start_date: self.start_date.as_deref().map(parse_date).transpose()?,
            end_date: self.end_date.as_deref().map(parse_date).transpose()?,
        })
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value).context("failed to serialize command output")?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = CampusFaqApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Faq { command } => run_faq(*command, &api),
        Command::Seed => emit_json(&api.seed()?),
        Command::Ask(args) => run_ask(args, &api),
        Command::Stats => emit_json(&api.stats_summary()?),
        Command::Logs { command } => run_logs(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &CampusFaqApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(&serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(&api.migrate(args.dry_run)?),
        DbCommand::IntegrityCheck => emit_json(&api.integrity_check()?),
    }
}

fn run_faq(command: FaqCommand, api: &CampusFaqApi) -> Result<()> {
    match command {
        FaqCommand::Add(content) => emit_json(&api.create_faq(content.into_draft())?),
        FaqCommand::List => emit_json(&api.list_faqs()?),
        FaqCommand::Update { faq_id, content } => {
            emit_json(&api.update_faq(faq_id, content.into_draft())?)
        }
        FaqCommand::Delete { faq_id } => emit_json(&api.delete_faq(faq_id)?),
    }
}

fn run_ask(args: AskArgs, api: &CampusFaqApi) -> Result<()> {
    let reply = api.chat(&ChatRequest {
        message: Some(args.message),
        department: args.department,
        year: args.year,
    })?;
    emit_json(&reply)
}

fn run_logs(command: LogsCommand, api: &CampusFaqApi) -> Result<()> {
    match command {
        LogsCommand::Recent { limit } => emit_json(&api.recent_chat_logs(limit)?),
        LogsCommand::Export(args) => {
            let filter = args.filter()?;
            let mut body = Vec::new();
            let summary = api.export_chat_history_csv(args.limit, &filter, &mut body)?;
            fs::write(&args.out, body)
                .with_context(|| format!("failed to write {}", args.out.display()))?;
            emit_json(&serde_json::json!({
                "out": args.out.display().to_string(),
                "rows": summary.rows
            }))
        }
        LogsCommand::Clear => emit_json(&api.clear_chat_logs()?),
    }
}
