use std::path::Path;

use anyhow::{anyhow, Context, Result};
use campus_faq_core::{
    ChatLogEntry, ChatLogId, FaqId, FaqRecord, MatchedFaq, NormalizedFaq, Scope, ScopeValue,
    UsageEvent, ALL_SCOPE,
};
use rusqlite::{params, Connection, Row, Transaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Departments reported by the analytics summary.
pub const TOP_DEPARTMENTS_LIMIT: usize = 5;

/// Matched FAQs reported by the analytics summary.
pub const TOP_FAQS_LIMIT: usize = 5;

/// Question shown for a matched FAQ that has since been deleted.
pub const UNKNOWN_FAQ_QUESTION: &str = "Unknown FAQ";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

// `faq_seq` / `log_seq` pin insertion order; candidate order (and so match tie-breaks) follows it.
const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS faqs (
  faq_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  faq_id TEXT NOT NULL UNIQUE,
  question TEXT NOT NULL CHECK (length(trim(question)) > 0),
  answer TEXT NOT NULL CHECK (length(trim(answer)) > 0),
  tags_json TEXT NOT NULL,
  department TEXT NOT NULL DEFAULT 'all' CHECK (length(department) > 0),
  year TEXT NOT NULL DEFAULT 'all' CHECK (length(year) > 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_logs (
  log_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  log_id TEXT NOT NULL UNIQUE,
  message TEXT NOT NULL,
  department TEXT NOT NULL,
  year TEXT NOT NULL,
  faq_id TEXT,
  created_at TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_faqs_scope ON faqs(department, year);
CREATE INDEX IF NOT EXISTS idx_chat_logs_created_at ON chat_logs(created_at_ms);
CREATE INDEX IF NOT EXISTS idx_chat_logs_faq_id ON chat_logs(faq_id);
";

const FAQ_COLUMNS: &str =
    "faq_id, question, answer, tags_json, department, year, created_at, updated_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountBucket {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopFaq {
    pub faq_id: FaqId,
    pub question: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSummary {
    pub total_all_time: u64,
    pub total_today: u64,
    pub by_department: Vec<CountBucket>,
    pub by_year: Vec<CountBucket>,
    pub top_faqs: Vec<TopFaq>,
}

impl SqliteStore {
    /// Open a SQLite-backed FAQ store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database is newer than this build.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }

    /// Persist one normalized FAQ and return the stored record.
    ///
    /// # Errors
    /// Returns an error when serialization or the insert fails.
    pub fn create_faq(&mut self, faq: &NormalizedFaq) -> Result<FaqRecord> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let record = insert_faq(&tx, faq, OffsetDateTime::now_utc())?;
        tx.commit().context("failed to commit faq insert")?;
        Ok(record)
    }

    /// Look up one FAQ by identifier.
    ///
    /// # Errors
    /// Returns an error when the lookup or row decoding fails.
    pub fn get_faq(&self, faq_id: FaqId) -> Result<Option<FaqRecord>> {
        let mut stmt =
            self.conn.prepare(&format!("SELECT {FAQ_COLUMNS} FROM faqs WHERE faq_id = ?1"))?;
        let mut rows = stmt.query(params![faq_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(faq_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All FAQs, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_faqs(&self) -> Result<Vec<FaqRecord>> {
        self.query_faqs(&format!("SELECT {FAQ_COLUMNS} FROM faqs ORDER BY faq_seq DESC"), params![])
    }

    /// FAQs eligible for a query scope, in insertion order.
    ///
    /// A record qualifies when its department is `all` or the query's department, and likewise
    /// for year. A query scoped to `all` therefore only sees `all` records.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn scoped_candidates(&self, scope: &Scope) -> Result<Vec<FaqRecord>> {
        self.query_faqs(
            &format!(
                "SELECT {FAQ_COLUMNS} FROM faqs
                 WHERE (department = ?1 OR department = ?3)
                   AND (year = ?2 OR year = ?3)
                 ORDER BY faq_seq ASC"
            ),
            params![scope.department.as_str(), scope.year.as_str(), ALL_SCOPE],
        )
    }

    /// Replace an FAQ's content, keeping its identifier and creation time.
    ///
    /// # Errors
    /// Returns an error when serialization or the update fails.
    pub fn update_faq(&mut self, faq_id: FaqId, faq: &NormalizedFaq) -> Result<Option<FaqRecord>> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = tx
            .execute(
                "UPDATE faqs
                 SET question = ?2, answer = ?3, tags_json = ?4, department = ?5, year = ?6,
                     updated_at = ?7
                 WHERE faq_id = ?1",
                params![
                    faq_id.to_string(),
                    faq.question,
                    faq.answer,
                    serde_json::to_string(&faq.tags).context("failed to serialize tags")?,
                    faq.department.as_str(),
                    faq.year.as_str(),
                    now_rfc3339()?,
                ],
            )
            .context("failed to update faq")?;
        tx.commit().context("failed to commit faq update")?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_faq(faq_id)
    }

    /// Delete one FAQ. Chat logs keep the dangling identifier.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_faq(&mut self, faq_id: FaqId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM faqs WHERE faq_id = ?1", params![faq_id.to_string()])
            .context("failed to delete faq")?;
        Ok(deleted > 0)
    }

    /// Wipe all FAQs and chat logs, then insert `faqs` in order.
    ///
    /// # Errors
    /// Returns an error when any statement in the transaction fails.
    pub fn replace_all_with(&mut self, faqs: &[NormalizedFaq]) -> Result<Vec<FaqRecord>> {
        let tx = self.conn.transaction().context("failed to start seed transaction")?;
        tx.execute("DELETE FROM chat_logs", []).context("failed to clear chat logs")?;
        tx.execute("DELETE FROM faqs", []).context("failed to clear faqs")?;

        let now = OffsetDateTime::now_utc();
        let records =
            faqs.iter().map(|faq| insert_faq(&tx, faq, now)).collect::<Result<Vec<_>>>()?;
        tx.commit().context("failed to commit seed transaction")?;
        Ok(records)
    }

    /// Record one chat usage event.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn log_usage(&mut self, event: &UsageEvent) -> Result<ChatLogId> {
        let log_id = ChatLogId::new();
        self.conn
            .execute(
                "INSERT INTO chat_logs(log_id, message, department, year, faq_id, created_at, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    log_id.to_string(),
                    event.message,
                    event.department.as_str(),
                    event.year.as_str(),
                    event.faq_id.map(|faq_id| faq_id.to_string()),
                    rfc3339(event.created_at)?,
                    unix_millis(event.created_at),
                ],
            )
            .context("failed to insert chat log")?;
        Ok(log_id)
    }

    /// Most recent chat logs, newest first, with the matched FAQ joined in.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn recent_chat_logs(&self, limit: usize) -> Result<Vec<ChatLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.log_id, l.message, l.department, l.year, l.faq_id, l.created_at,
                    f.question, f.tags_json
             FROM chat_logs l
             LEFT JOIN faqs f ON f.faq_id = l.faq_id
             ORDER BY l.log_seq DESC
             LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![i64::try_from(limit).unwrap_or(i64::MAX)])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let log_id_raw: String = row.get(0)?;
            let faq_id_raw: Option<String> = row.get(4)?;
            let question: Option<String> = row.get(6)?;
            let tags_json: Option<String> = row.get(7)?;

            let matched_faq = match (question, tags_json) {
                (Some(question), Some(tags_json)) => {
                    Some(MatchedFaq { question, tags: parse_tags(&tags_json)? })
                }
                _ => None,
            };

            let department: String = row.get(2)?;
            let year: String = row.get(3)?;

            entries.push(ChatLogEntry {
                log_id: log_id_raw
                    .parse::<ChatLogId>()
                    .map_err(|err| anyhow!("stored log_id is invalid: {err}"))?,
                message: row.get(1)?,
                department: ScopeValue::department(Some(department.as_str())),
                year: ScopeValue::year(Some(year.as_str())),
                faq_id: faq_id_raw.as_deref().map(parse_faq_id).transpose()?,
                matched_faq,
                created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
            });
        }

        Ok(entries)
    }

    /// Delete every chat log and return how many were removed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn clear_chat_logs(&mut self) -> Result<usize> {
        self.conn.execute("DELETE FROM chat_logs", []).context("failed to clear chat logs")
    }

    /// Usage analytics as of `now`. "Today" starts at UTC midnight of `now`.
    ///
    /// # Errors
    /// Returns an error when any aggregate query fails.
    pub fn stats_summary(&self, now: OffsetDateTime) -> Result<StatsSummary> {
        let today_start = now.to_offset(time::UtcOffset::UTC).replace_time(time::Time::MIDNIGHT);

        let total_all_time = self
            .conn
            .query_row("SELECT COUNT(*) FROM chat_logs", [], |row| row.get::<_, i64>(0))
            .context("failed to count chat logs")?;
        let total_today = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chat_logs WHERE created_at_ms >= ?1",
                params![unix_millis(today_start)],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to count today's chat logs")?;

        let by_department = self.count_buckets("department", Some(TOP_DEPARTMENTS_LIMIT))?;
        let by_year = self.count_buckets("year", None)?;

        let mut stmt = self.conn.prepare(
            "SELECT l.faq_id, COUNT(*) AS hits, MAX(f.question)
             FROM chat_logs l
             LEFT JOIN faqs f ON f.faq_id = l.faq_id
             WHERE l.faq_id IS NOT NULL
             GROUP BY l.faq_id
             ORDER BY hits DESC, l.faq_id ASC
             LIMIT ?1",
        )?;
        let mut rows =
            stmt.query(params![i64::try_from(TOP_FAQS_LIMIT).unwrap_or(i64::MAX)])?;
        let mut top_faqs = Vec::new();
        while let Some(row) = rows.next()? {
            let faq_id_raw: String = row.get(0)?;
            let question: Option<String> = row.get(2)?;
            top_faqs.push(TopFaq {
                faq_id: parse_faq_id(&faq_id_raw)?,
                question: question.unwrap_or_else(|| UNKNOWN_FAQ_QUESTION.to_string()),
                count: to_count(row.get(1)?)?,
            });
        }

        Ok(StatsSummary {
            total_all_time: to_count(total_all_time)?,
            total_today: to_count(total_today)?,
            by_department,
            by_year,
            top_faqs,
        })
    }

    /// Run `PRAGMA quick_check` and report schema status alongside.
    ///
    /// # Errors
    /// Returns an error when the pragma or schema lookup fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run sqlite quick_check")?;

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status: self.schema_status()?,
        })
    }

    fn query_faqs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<FaqRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(faq_from_row(row)?);
        }
        Ok(records)
    }

    // `column` is one of two fixed identifiers, never caller input.
    fn count_buckets(&self, column: &str, limit: Option<usize>) -> Result<Vec<CountBucket>> {
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {column}, COUNT(*) AS hits FROM chat_logs
             GROUP BY {column}
             ORDER BY hits DESC, {column} ASC
             LIMIT ?1"
        ))?;
        let mut rows = stmt.query(params![limit])?;
        let mut buckets = Vec::new();
        while let Some(row) = rows.next()? {
            buckets.push(CountBucket { key: row.get(0)?, count: to_count(row.get(1)?)? });
        }
        Ok(buckets)
    }
}

fn insert_faq(tx: &Transaction<'_>, faq: &NormalizedFaq, now: OffsetDateTime) -> Result<FaqRecord> {
    let record = FaqRecord {
        faq_id: FaqId::new(),
        question: faq.question.clone(),
        answer: faq.answer.clone(),
        tags: faq.tags.clone(),
        department: faq.department.clone(),
        year: faq.year.clone(),
        created_at: now,
        updated_at: now,
    };

    tx.execute(
        "INSERT INTO faqs(faq_id, question, answer, tags_json, department, year, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.faq_id.to_string(),
            record.question,
            record.answer,
            serde_json::to_string(&record.tags).context("failed to serialize tags")?,
            record.department.as_str(),
            record.year.as_str(),
            rfc3339(record.created_at)?,
            rfc3339(record.updated_at)?,
        ],
    )
    .context("failed to insert faq")?;

    Ok(record)
}

fn faq_from_row(row: &Row<'_>) -> Result<FaqRecord> {
    let faq_id_raw: String = row.get(0)?;
    let tags_json: String = row.get(3)?;
    let department: String = row.get(4)?;
    let year: String = row.get(5)?;

    Ok(FaqRecord {
        faq_id: parse_faq_id(&faq_id_raw)?,
        question: row.get(1)?,
        answer: row.get(2)?,
        tags: parse_tags(&tags_json)?,
        department: ScopeValue::department(Some(department.as_str())),
        year: ScopeValue::year(Some(year.as_str())),
        created_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(7)?)?,
    })
}

fn parse_tags(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context("failed to deserialize faq tags")
}

fn parse_faq_id(raw: &str) -> Result<FaqId> {
    raw.parse().map_err(|err| anyhow!("stored faq_id is invalid: {err}"))
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("negative count from sqlite: {value}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn unix_millis(value: OffsetDateTime) -> i64 {
    i64::try_from(value.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
