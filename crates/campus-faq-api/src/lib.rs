use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use campus_faq_core::replies::reply_for;
use campus_faq_core::{
    extract_keywords, match_keywords, ChatLogEntry, ChatLogFilter, FaqDraft, FaqError, FaqId,
    FaqRecord, MatchOutcome, NoMatchReason, NormalizedFaq, Scope, ScopeValue, UsageEvent,
};
use campus_faq_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore, StatsSummary};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Chat history rows returned when the caller does not ask for a specific amount.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on chat history rows per request.
pub const MAX_HISTORY_LIMIT: usize = 1000;

pub const CSV_HEADER: [&str; 6] =
    ["Time", "Department", "Year", "Student Question", "Matched FAQ", "Tags"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    /// `None` (absent or `null`) is answered like a blank message.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
}

impl ChatRequest {
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Reply plus the matcher outcome. The outcome is diagnostic; chat clients only get `reply`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteFaqResult {
    pub faq_id: FaqId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedResult {
    pub faqs: Vec<FaqRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearChatLogsResult {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct CampusFaqApi {
    db_path: PathBuf,
}

impl CampusFaqApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run `SQLite` quick-check on the database.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or checked.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Answer one student question and record the usage event.
    ///
    /// Messages without keywords are answered without touching storage. A failure to record
    /// the usage event is logged and does not change the reply.
    ///
    /// # Errors
    /// Returns an error when candidate lookup fails.
    pub fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let message = request.message();
        let keywords = extract_keywords(message);
        if keywords.is_empty() {
            let outcome = MatchOutcome::NotMatched { reason: NoMatchReason::EmptyQuery };
            return Ok(ChatReply { reply: reply_for(message, &outcome), outcome });
        }

        let scope = Scope::normalize(request.department.as_deref(), request.year.as_deref());
        let mut store = self.open_migrated_store()?;
        let candidates = store.scoped_candidates(&scope)?;
        let outcome = match_keywords(&keywords, &candidates);

        tracing::debug!(
            department = %scope.department,
            year = %scope.year,
            candidates = candidates.len(),
            outcome = ?outcome,
            "chat query matched"
        );

        if outcome.is_logged() {
            let event = UsageEvent {
                message: message.to_string(),
                department: scope.department,
                year: scope.year,
                faq_id: outcome.matched_faq_id(),
                created_at: OffsetDateTime::now_utc(),
            };
            if let Err(err) = store.log_usage(&event) {
                tracing::warn!(error = %err, "failed to record chat usage event");
            }
        }

        Ok(ChatReply { reply: reply_for(message, &outcome), outcome })
    }

    /// All FAQs, newest first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_faqs(&self) -> Result<Vec<FaqRecord>> {
        let store = self.open_migrated_store()?;
        store.list_faqs()
    }

    /// Validate and persist a new FAQ.
    ///
    /// # Errors
    /// Returns [`FaqError::Validation`] for blank content, or a storage error.
    pub fn create_faq(&self, draft: FaqDraft) -> Result<FaqRecord> {
        let normalized = draft.normalize()?;
        let mut store = self.open_migrated_store()?;
        let record = store.create_faq(&normalized)?;
        tracing::info!(faq_id = %record.faq_id, "faq created");
        Ok(record)
    }

    /// Replace an existing FAQ's content.
    ///
    /// # Errors
    /// Returns [`FaqError::Validation`] for blank content, [`FaqError::NotFound`] for an unknown
    /// identifier, or a storage error.
    pub fn update_faq(&self, faq_id: FaqId, draft: FaqDraft) -> Result<FaqRecord> {
        let normalized = draft.normalize()?;
        let mut store = self.open_migrated_store()?;
        let record = store.update_faq(faq_id, &normalized)?.ok_or(FaqError::NotFound(faq_id))?;
        tracing::info!(faq_id = %record.faq_id, "faq updated");
        Ok(record)
    }

    /// Delete one FAQ. Deleting an unknown identifier is reported, not rejected.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_faq(&self, faq_id: FaqId) -> Result<DeleteFaqResult> {
        let mut store = self.open_migrated_store()?;
        let deleted = store.delete_faq(faq_id)?;
        tracing::info!(%faq_id, deleted, "faq delete requested");
        Ok(DeleteFaqResult { faq_id, deleted })
    }

    /// Replace every FAQ with the built-in campus set and wipe chat history.
    ///
    /// # Errors
    /// Returns an error when the seed transaction fails.
    pub fn seed(&self) -> Result<SeedResult> {
        let mut store = self.open_migrated_store()?;
        let faqs = store.replace_all_with(&seed_faqs()?)?;
        tracing::info!(count = faqs.len(), "seeded campus faqs");
        Ok(SeedResult { faqs })
    }

    /// Usage analytics as of now.
    ///
    /// # Errors
    /// Returns an error when aggregation fails.
    pub fn stats_summary(&self) -> Result<StatsSummary> {
        let store = self.open_migrated_store()?;
        store.stats_summary(OffsetDateTime::now_utc())
    }

    /// Most recent chat history, newest first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn recent_chat_logs(&self, limit: Option<usize>) -> Result<Vec<ChatLogEntry>> {
        let store = self.open_migrated_store()?;
        store.recent_chat_logs(effective_limit(limit))
    }

    /// Recent chat history narrowed by an admin filter.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn filtered_chat_logs(
        &self,
        limit: Option<usize>,
        filter: &ChatLogFilter,
    ) -> Result<Vec<ChatLogEntry>> {
        let entries = self.recent_chat_logs(limit)?;
        Ok(entries.into_iter().filter(|entry| filter.matches(entry)).collect())
    }

    /// Write filtered chat history as CSV.
    ///
    /// # Errors
    /// Returns [`FaqError::NothingToExport`] when the filter selects no rows, or an error when
    /// reading or writing fails.
    pub fn export_chat_history_csv<W: Write>(
        &self,
        limit: Option<usize>,
        filter: &ChatLogFilter,
        writer: W,
    ) -> Result<ExportSummary> {
        let entries = self.filtered_chat_logs(limit, filter)?;
        write_chat_history_csv(&entries, writer)
    }

    /// Delete all chat history.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn clear_chat_logs(&self) -> Result<ClearChatLogsResult> {
        let mut store = self.open_migrated_store()?;
        let removed = store.clear_chat_logs()?;
        tracing::info!(removed, "chat logs cleared");
        Ok(ClearChatLogsResult { removed })
    }
}

fn effective_limit(limit: Option<usize>) -> usize {
    // Zero reads as "not given".
    limit.filter(|limit| *limit > 0).unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT)
}

/// Write chat history rows with every cell quoted.
///
/// # Errors
/// Returns [`FaqError::NothingToExport`] for an empty slice, or an error when writing fails.
pub fn write_chat_history_csv<W: Write>(
    entries: &[ChatLogEntry],
    writer: W,
) -> Result<ExportSummary> {
    if entries.is_empty() {
        return Err(FaqError::NothingToExport.into());
    }

    let mut csv_writer =
        csv::WriterBuilder::new().quote_style(csv::QuoteStyle::Always).from_writer(writer);
    csv_writer.write_record(CSV_HEADER).context("failed to write csv header")?;

    for entry in entries {
        let (question, tags) = entry
            .matched_faq
            .as_ref()
            .map_or((String::new(), String::new()), |faq| {
                (single_line(&faq.question), faq.tags.join("|"))
            });
        csv_writer
            .write_record([
                display_time(entry.created_at)?,
                display_department(&entry.department),
                display_year(&entry.year),
                single_line(&entry.message),
                question,
                tags,
            ])
            .context("failed to write csv row")?;
    }

    csv_writer.flush().context("failed to flush csv output")?;
    Ok(ExportSummary { rows: entries.len() })
}

fn single_line(text: &str) -> String {
    text.replace('\n', " ")
}

fn display_time(value: OffsetDateTime) -> Result<String> {
    value
        .format(time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .context("failed to format chat log timestamp")
}

fn display_department(department: &ScopeValue) -> String {
    match department {
        ScopeValue::All => "All".to_string(),
        ScopeValue::Exact(value) => value.to_uppercase(),
    }
}

fn display_year(year: &ScopeValue) -> String {
    match year {
        ScopeValue::All => "All".to_string(),
        ScopeValue::Exact(value) => format!("{value} year"),
    }
}

fn seed_faqs() -> Result<Vec<NormalizedFaq>> {
    let drafts = [
        FaqDraft {
            question: "When are the semester exams?".to_string(),
            answer: "Semester exams are usually held in December and May. Please check the official exam timetable on the SRU Student Portal (SRAaP) for exact dates.".to_string(),
            tags: Some(vec!["exam".to_string(), "timetable".to_string(), "schedule".to_string()]),
            department: None,
            year: None,
        },
        FaqDraft {
            question: "Placement cell contact info".to_string(),
            answer: "You can reach the Training & Placement Cell at placement@sru.edu or visit the T&P office in the main campus during working hours.".to_string(),
            tags: Some(vec!["placement".to_string(), "contact".to_string(), "tnp".to_string()]),
            department: None,
            year: None,
        },
        FaqDraft {
            question: "Project submission deadlines".to_string(),
            answer: "Project synopsis and final report deadlines are announced by each department. Please refer to your department notice board or SRU portal for the current academic year schedule.".to_string(),
            tags: Some(vec!["project".to_string(), "deadline".to_string()]),
            department: None,
            year: Some("4".to_string()),
        },
    ];

    drafts
        .into_iter()
        .map(|draft| draft.normalize().context("built-in seed faq is invalid"))
        .collect()
}
