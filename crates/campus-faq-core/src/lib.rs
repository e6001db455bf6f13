use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

pub mod replies;

/// Minimum overlap score a best candidate needs before its answer is trusted.
pub const MIN_SCORE: usize = 2;

/// Tokens shorter than this never become keywords.
pub const MIN_KEYWORD_LEN: usize = 3;

/// Wildcard scope label shared by departments and years.
pub const ALL_SCOPE: &str = "all";

/// Closed list of function words and chatbot filler that never count as keywords.
pub const STOP_WORDS: &[&str] = &[
    "what", "when", "where", "which", "who", "whom", "whose", "why", "how", "is", "are", "am",
    "was", "were", "will", "shall", "do", "does", "did", "the", "a", "an", "for", "to", "of", "in",
    "on", "at", "and", "or", "with", "this", "that", "these", "those", "please", "tell", "me",
    "about",
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FaqError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid identifier `{value}`: {reason}")]
    InvalidId { value: String, reason: String },
    #[error("invalid date `{0}`: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("faq `{0}` not found")]
    NotFound(FaqId),
    #[error("no data to export")]
    NothingToExport,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FaqId(pub Ulid);

impl FaqId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for FaqId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FaqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FaqId {
    type Err = FaqError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw.trim()).map(Self).map_err(|err| FaqError::InvalidId {
            value: raw.to_string(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChatLogId(pub Ulid);

impl ChatLogId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ChatLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ChatLogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChatLogId {
    type Err = FaqError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw.trim()).map(Self).map_err(|err| FaqError::InvalidId {
            value: raw.to_string(),
            reason: err.to_string(),
        })
    }
}

/// One side of a scope: either the `all` wildcard or one concrete label.
///
/// Missing, blank and `all` inputs collapse to [`ScopeValue::All`] at the boundary, so nothing
/// downstream distinguishes "absent" from "wildcard".
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ScopeValue {
    #[default]
    All,
    Exact(String),
}

impl ScopeValue {
    /// Normalize a department label: trimmed, lower-cased, defaulting to `all`.
    #[must_use]
    pub fn department(raw: Option<&str>) -> Self {
        Self::from_raw(raw, true)
    }

    /// Normalize a year label: trimmed, defaulting to `all`.
    #[must_use]
    pub fn year(raw: Option<&str>) -> Self {
        Self::from_raw(raw, false)
    }

    fn from_raw(raw: Option<&str>, lowercase: bool) -> Self {
        let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::All;
        };

        // Case-insensitive for years too, so `ALL` never becomes a literal year label.
        if value.eq_ignore_ascii_case(ALL_SCOPE) {
            return Self::All;
        }

        if lowercase {
            Self::Exact(value.to_lowercase())
        } else {
            Self::Exact(value.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_SCOPE,
            Self::Exact(value) => value,
        }
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether a record labelled `self` is eligible for a query scoped to `query`.
    #[must_use]
    pub fn admits(&self, query: &ScopeValue) -> bool {
        match self {
            Self::All => true,
            Self::Exact(_) => self == query,
        }
    }
}

impl Display for ScopeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ScopeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Plain deserialization trims and collapses the wildcard but keeps case, which is the year rule.
/// Department fields go through [`deserialize_department`].
impl<'de> Deserialize<'de> for ScopeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::year(raw.as_deref()))
    }
}

/// `deserialize_with` helper applying [`ScopeValue::department`] to a department field.
///
/// # Errors
/// Returns the deserializer's error when the value is neither a string nor null.
pub fn deserialize_department<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ScopeValue, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(ScopeValue::department(raw.as_deref()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Scope {
    #[serde(default, deserialize_with = "deserialize_department")]
    pub department: ScopeValue,
    pub year: ScopeValue,
}

impl Scope {
    #[must_use]
    pub fn normalize(department: Option<&str>, year: Option<&str>) -> Self {
        Self { department: ScopeValue::department(department), year: ScopeValue::year(year) }
    }

    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FaqRecord {
    pub faq_id: FaqId,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_department")]
    pub department: ScopeValue,
    #[serde(default)]
    pub year: ScopeValue,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FaqRecord {
    /// Structural scope rule: the record's department and year must each be `all` or equal to
    /// the query's value.
    #[must_use]
    pub fn in_scope(&self, scope: &Scope) -> bool {
        self.department.admits(&scope.department) && self.year.admits(&scope.year)
    }
}

/// Admin-supplied FAQ content before defaulting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FaqDraft {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
}

/// FAQ content with every optional field resolved; the only shape storage accepts.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NormalizedFaq {
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_department")]
    pub department: ScopeValue,
    #[serde(default)]
    pub year: ScopeValue,
}

impl FaqDraft {
    /// Apply the CRUD defaulting rules and reject blank content.
    ///
    /// # Errors
    /// Returns [`FaqError::Validation`] when `question` or `answer` is blank.
    pub fn normalize(self) -> Result<NormalizedFaq, FaqError> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(FaqError::Validation("question MUST be non-empty".to_string()));
        }

        let answer = self.answer.trim().to_string();
        if answer.is_empty() {
            return Err(FaqError::Validation("answer MUST be non-empty".to_string()));
        }

        let tags = self
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(NormalizedFaq {
            question,
            answer,
            tags,
            department: ScopeValue::department(self.department.as_deref()),
            year: ScopeValue::year(self.year.as_deref()),
        })
    }
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Split free text into matchable keywords, keeping duplicates in input order.
///
/// Lower-cases, blanks out everything but `[a-z0-9]` and whitespace, then drops short tokens
/// and stop-words. Empty output means the text carries nothing to match on.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let cleaned = text
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect::<String>();

    cleaned
        .split_whitespace()
        .filter(|token| token.len() >= MIN_KEYWORD_LEN && !is_stop_word(token))
        .map(str::to_string)
        .collect()
}

/// Keyword set of one FAQ: its question plus its tags.
#[must_use]
pub fn faq_keywords(record: &FaqRecord) -> BTreeSet<String> {
    keyword_set(&record.question, &record.tags)
}

fn keyword_set(question: &str, tags: &[String]) -> BTreeSet<String> {
    let combined = format!("{question} {}", tags.join(" "));
    extract_keywords(&combined).into_iter().collect()
}

/// Count query keyword occurrences (with repetition) that the FAQ keyword set contains.
#[must_use]
pub fn match_score(query_keywords: &[String], faq_keyword_set: &BTreeSet<String>) -> usize {
    query_keywords.iter().filter(|keyword| faq_keyword_set.contains(*keyword)).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestMatch<'a> {
    pub candidate: Option<&'a FaqRecord>,
    pub score: usize,
}

/// Pick the highest-scoring candidate.
///
/// Only a strictly greater score replaces the current best, so on ties the earliest candidate
/// in `candidates` wins, and a candidate scoring zero is never selected.
#[must_use]
pub fn select_best_match<'a>(query_keywords: &[String], candidates: &'a [FaqRecord]) -> BestMatch<'a> {
    let mut best = BestMatch { candidate: None, score: 0 };

    for candidate in candidates {
        let score = match_score(query_keywords, &faq_keywords(candidate));
        if score > best.score {
            best = BestMatch { candidate: Some(candidate), score };
        }
    }

    best
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoMatchReason {
    EmptyQuery,
    NoScopedCandidates,
    LowConfidence,
}

impl NoMatchReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::NoScopedCandidates => "NO_SCOPED_CANDIDATES",
            Self::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

impl Display for NoMatchReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { faq_id: FaqId, answer: String, score: usize },
    NotMatched { reason: NoMatchReason },
}

impl MatchOutcome {
    #[must_use]
    pub fn matched_faq_id(&self) -> Option<FaqId> {
        match self {
            Self::Matched { faq_id, .. } => Some(*faq_id),
            Self::NotMatched { .. } => None,
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<NoMatchReason> {
        match self {
            Self::Matched { .. } => None,
            Self::NotMatched { reason } => Some(*reason),
        }
    }

    /// Every outcome except an empty query is recorded as a usage event.
    #[must_use]
    pub fn is_logged(&self) -> bool {
        self.reason() != Some(NoMatchReason::EmptyQuery)
    }
}

/// Run scoring and the confidence gate over pre-extracted query keywords.
///
/// `candidates` must already be restricted to the query's scope; their order decides ties.
#[must_use]
pub fn match_keywords(query_keywords: &[String], candidates: &[FaqRecord]) -> MatchOutcome {
    if query_keywords.is_empty() {
        return MatchOutcome::NotMatched { reason: NoMatchReason::EmptyQuery };
    }

    if candidates.is_empty() {
        return MatchOutcome::NotMatched { reason: NoMatchReason::NoScopedCandidates };
    }

    let best = select_best_match(query_keywords, candidates);
    match best.candidate {
        Some(record) if best.score >= MIN_SCORE => MatchOutcome::Matched {
            faq_id: record.faq_id,
            answer: record.answer.clone(),
            score: best.score,
        },
        _ => MatchOutcome::NotMatched { reason: NoMatchReason::LowConfidence },
    }
}

#[must_use]
pub fn match_query(message: &str, candidates: &[FaqRecord]) -> MatchOutcome {
    match_keywords(&extract_keywords(message), candidates)
}

/// One chat query outcome as recorded for analytics.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UsageEvent {
    pub message: String,
    #[serde(default, deserialize_with = "deserialize_department")]
    pub department: ScopeValue,
    #[serde(default)]
    pub year: ScopeValue,
    pub faq_id: Option<FaqId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MatchedFaq {
    pub question: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A stored usage event with the matched FAQ joined in.
///
/// `matched_faq` is `None` when nothing matched or when the FAQ has since been deleted; in the
/// latter case `faq_id` still carries the dangling identifier.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChatLogEntry {
    pub log_id: ChatLogId,
    pub message: String,
    #[serde(default, deserialize_with = "deserialize_department")]
    pub department: ScopeValue,
    #[serde(default)]
    pub year: ScopeValue,
    pub faq_id: Option<FaqId>,
    pub matched_faq: Option<MatchedFaq>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Admin history filter. Every `None` (or `all`) field matches everything.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChatLogFilter {
    pub search: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub tag: Option<String>,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
}

impl ChatLogFilter {
    #[must_use]
    pub fn matches(&self, entry: &ChatLogEntry) -> bool {
        // Blankness is judged on the trimmed text; the needle itself keeps its spaces.
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let question = entry.matched_faq.as_ref().map_or("", |faq| faq.question.as_str());
            let combined = format!("{} {question}", entry.message).to_lowercase();
            if !combined.contains(&search.to_lowercase()) {
                return false;
            }
        }

        let department = ScopeValue::department(self.department.as_deref());
        if !department.is_all() && entry.department != department {
            return false;
        }

        let year = ScopeValue::year(self.year.as_deref());
        if !year.is_all() && entry.year != year {
            return false;
        }

        if let Some(tag) = self
            .tag
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty() && !tag.eq_ignore_ascii_case(ALL_SCOPE))
        {
            let tagged = entry
                .matched_faq
                .as_ref()
                .is_some_and(|faq| faq.tags.iter().any(|candidate| candidate == tag));
            if !tagged {
                return false;
            }
        }

        let logged_on = entry.created_at.date();
        if self.start_date.is_some_and(|start| logged_on < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| logged_on > end) {
            return false;
        }

        true
    }
}

/// Parse a `YYYY-MM-DD` calendar date as used by history filters.
///
/// # Errors
/// Returns [`FaqError::InvalidDate`] when the value is not a valid calendar date.
pub fn parse_date(raw: &str) -> Result<Date, FaqError> {
    Date::parse(raw.trim(), time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|_| FaqError::InvalidDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn fixture_id(n: u128) -> FaqId {
        FaqId(Ulid::from_parts(1_700_000_000_000, n))
    }

    fn mk_faq(n: u128, question: &str, tags: &[&str], department: &str, year: &str) -> FaqRecord {
        FaqRecord {
            faq_id: fixture_id(n),
            question: question.to_string(),
            answer: format!("answer-{n}"),
            tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
            department: ScopeValue::department(Some(department)),
            year: ScopeValue::year(Some(year)),
            created_at: fixture_time(),
            updated_at: fixture_time(),
        }
    }

    fn exam_faq() -> FaqRecord {
        mk_faq(1, "When are the semester exams?", &["exam", "timetable", "schedule"], "all", "all")
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|word| (*word).to_string()).collect()
    }

    fn seeded_permutation<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
        fn splitmix64(mut value: u64) -> u64 {
            value = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
            value = (value ^ (value >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            value = (value ^ (value >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            value ^ (value >> 31)
        }

        let mut keyed = items
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, item)| {
                let index_u64 = u64::try_from(index).unwrap_or(u64::MAX);
                (splitmix64(seed ^ index_u64), item)
            })
            .collect::<Vec<_>>();
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    #[test]
    fn extract_keywords_lowercases_and_strips_punctuation() {
        assert_eq!(
            extract_keywords("When are the SEMESTER exams?"),
            keywords(&["semester", "exams"])
        );
        assert_eq!(extract_keywords("hostel-fee,structure!"), keywords(&["hostel", "fee", "structure"]));
    }

    #[test]
    fn extract_keywords_keeps_duplicates_in_order() {
        assert_eq!(
            extract_keywords("exam exam timetable exam"),
            keywords(&["exam", "exam", "timetable", "exam"])
        );
    }

    #[test]
    fn extract_keywords_drops_stop_words_and_short_tokens() {
        assert!(extract_keywords("hi").is_empty());
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("   \t\n").is_empty());
        assert!(extract_keywords("please tell me about this").is_empty());
        assert_eq!(extract_keywords("Tell me about hostel fee structure"), keywords(&["hostel", "fee", "structure"]));
    }

    #[test]
    fn extract_keywords_treats_non_ascii_letters_as_separators() {
        assert_eq!(extract_keywords("café menu"), keywords(&["caf", "menu"]));
        assert_eq!(extract_keywords("année2024"), keywords(&["ann", "e2024"]));
    }

    #[test]
    fn faq_keywords_combine_question_and_tags() {
        let set = faq_keywords(&exam_faq());
        let expected: BTreeSet<String> =
            ["semester", "exams", "exam", "timetable", "schedule"].map(str::to_string).into();
        assert_eq!(set, expected);
    }

    #[test]
    fn match_score_counts_repeated_query_keywords() {
        let set = faq_keywords(&exam_faq());
        assert_eq!(match_score(&keywords(&["exam", "exam", "hostel"]), &set), 2);
        assert_eq!(match_score(&[], &set), 0);
    }

    #[test]
    fn scenario_semester_exams_matches_seed_faq() {
        let placement = mk_faq(2, "Placement cell contact info", &["placement", "contact", "tnp"], "all", "all");
        let candidates = vec![exam_faq(), placement];

        let outcome = match_query("When are the semester exams?", &candidates);

        assert_eq!(
            outcome,
            MatchOutcome::Matched { faq_id: fixture_id(1), answer: "answer-1".to_string(), score: 2 }
        );
    }

    #[test]
    fn scenario_greeting_is_empty_query() {
        let outcome = match_query("hi", &[exam_faq()]);
        assert_eq!(outcome.reason(), Some(NoMatchReason::EmptyQuery));
        assert!(!outcome.is_logged());
    }

    #[test]
    fn scenario_unrelated_question_is_low_confidence() {
        let outcome = match_query("Tell me about hostel fee structure", &[exam_faq()]);
        assert_eq!(outcome.reason(), Some(NoMatchReason::LowConfidence));
        assert!(outcome.is_logged());
    }

    #[test]
    fn scenario_empty_candidate_set_is_no_scoped_candidates() {
        let outcome = match_query("When are the semester exams?", &[]);
        assert_eq!(outcome.reason(), Some(NoMatchReason::NoScopedCandidates));
        assert!(outcome.is_logged());
    }

    #[test]
    fn empty_query_wins_over_empty_candidates() {
        let outcome = match_query("hi", &[]);
        assert_eq!(outcome.reason(), Some(NoMatchReason::EmptyQuery));
    }

    #[test]
    fn scenario_equal_scores_select_the_earlier_candidate() {
        let first = mk_faq(10, "Library opening hours timing", &[], "all", "all");
        let second = mk_faq(11, "Library opening hours timing details", &[], "all", "all");
        let query = keywords(&["library", "opening", "hours"]);

        let candidates = [first.clone(), second.clone()];
        let best = select_best_match(&query, &candidates);
        assert_eq!(best.score, 3);
        assert_eq!(best.candidate.map(|faq| faq.faq_id), Some(first.faq_id));

        let candidates = [second.clone(), first];
        let best = select_best_match(&query, &candidates);
        assert_eq!(best.candidate.map(|faq| faq.faq_id), Some(second.faq_id));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let record = exam_faq();
        let at_threshold = match_keywords(&keywords(&["semester", "exams"]), &[record.clone()]);
        assert_eq!(at_threshold.matched_faq_id(), Some(record.faq_id));

        let below = match_keywords(&keywords(&["semester", "hostel"]), &[record]);
        assert_eq!(below.reason(), Some(NoMatchReason::LowConfidence));
    }

    #[test]
    fn zero_scores_select_no_candidate() {
        let candidates = [exam_faq()];
        let best = select_best_match(&keywords(&["hostel"]), &candidates);
        assert_eq!(best, BestMatch { candidate: None, score: 0 });
    }

    #[test]
    fn scope_normalization_defaults_and_lowercases() {
        let scope = Scope::normalize(None, Some("  "));
        assert_eq!(scope, Scope::all());

        let scope = Scope::normalize(Some(" CSE "), Some("4"));
        assert_eq!(scope.department, ScopeValue::Exact("cse".to_string()));
        assert_eq!(scope.year, ScopeValue::Exact("4".to_string()));

        assert_eq!(ScopeValue::department(Some("ALL")), ScopeValue::All);
    }

    #[test]
    fn year_wildcard_is_case_insensitive_but_labels_keep_case() {
        assert_eq!(ScopeValue::year(Some("ALL")), ScopeValue::All);
        assert_eq!(ScopeValue::year(Some(" All ")), ScopeValue::All);
        assert_eq!(ScopeValue::year(Some("4")), ScopeValue::Exact("4".to_string()));
        assert_eq!(ScopeValue::year(Some("IV")), ScopeValue::Exact("IV".to_string()));
    }

    #[test]
    fn in_scope_admits_wildcards_and_exact_matches_only() {
        let scope = Scope::normalize(Some("cse"), Some("4"));
        assert!(mk_faq(1, "q", &[], "all", "all").in_scope(&scope));
        assert!(mk_faq(2, "q", &[], "cse", "all").in_scope(&scope));
        assert!(mk_faq(3, "q", &[], "all", "4").in_scope(&scope));
        assert!(!mk_faq(4, "q", &[], "ece", "4").in_scope(&scope));
        assert!(!mk_faq(5, "q", &[], "cse", "2").in_scope(&scope));

        let unscoped = Scope::all();
        assert!(mk_faq(6, "q", &[], "all", "all").in_scope(&unscoped));
        assert!(!mk_faq(7, "q", &[], "cse", "all").in_scope(&unscoped));
    }

    #[test]
    fn scope_value_serializes_as_plain_label() -> Result<(), serde_json::Error> {
        let record = mk_faq(1, "q", &[], "CSE", "all");
        let value = serde_json::to_value(&record)?;
        assert_eq!(value.get("department").and_then(serde_json::Value::as_str), Some("cse"));
        assert_eq!(value.get("year").and_then(serde_json::Value::as_str), Some("all"));

        let missing: ScopeValue = serde_json::from_str("null")?;
        assert_eq!(missing, ScopeValue::All);
        Ok(())
    }

    #[test]
    fn deserialized_department_labels_are_lowercased() -> Result<(), serde_json::Error> {
        let mut value = serde_json::to_value(mk_faq(1, "q", &[], "all", "4"))?;
        value["department"] = serde_json::json!(" CSE ");
        let record: FaqRecord = serde_json::from_value(value)?;
        assert_eq!(record.department, ScopeValue::Exact("cse".to_string()));
        assert!(record.in_scope(&Scope::normalize(Some("cse"), Some("4"))));

        let scope: Scope = serde_json::from_str(r#"{"department":"ECE","year":"ALL"}"#)?;
        assert_eq!(scope, Scope::normalize(Some("ece"), None));

        let defaulted: Scope = serde_json::from_str("{}")?;
        assert_eq!(defaulted, Scope::all());
        Ok(())
    }

    #[test]
    fn draft_normalization_applies_crud_defaults() -> Result<(), FaqError> {
        let normalized = FaqDraft {
            question: " Hostel fees? ".to_string(),
            answer: "See the accounts office.".to_string(),
            tags: Some(vec![" hostel ".to_string(), String::new(), "fees".to_string()]),
            department: Some("ECE".to_string()),
            year: None,
        }
        .normalize()?;

        assert_eq!(normalized.question, "Hostel fees?");
        assert_eq!(normalized.tags, vec!["hostel".to_string(), "fees".to_string()]);
        assert_eq!(normalized.department, ScopeValue::Exact("ece".to_string()));
        assert_eq!(normalized.year, ScopeValue::All);
        Ok(())
    }

    #[test]
    fn draft_normalization_rejects_blank_content() {
        let err = FaqDraft { question: " ".to_string(), answer: "a".to_string(), ..FaqDraft::default() }
            .normalize();
        assert!(matches!(err, Err(FaqError::Validation(message)) if message.contains("question")));

        let err = FaqDraft { question: "q".to_string(), answer: String::new(), ..FaqDraft::default() }
            .normalize();
        assert!(matches!(err, Err(FaqError::Validation(message)) if message.contains("answer")));
    }

    #[test]
    fn faq_id_parse_round_trips_and_rejects_garbage() -> Result<(), FaqError> {
        let id = fixture_id(42);
        assert_eq!(id.to_string().parse::<FaqId>()?, id);
        assert!(matches!("not-a-ulid".parse::<FaqId>(), Err(FaqError::InvalidId { .. })));
        Ok(())
    }

    #[test]
    fn match_outcome_serializes_reason_codes() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(MatchOutcome::NotMatched {
            reason: NoMatchReason::NoScopedCandidates,
        })?;
        assert_eq!(
            value,
            serde_json::json!({ "status": "not_matched", "reason": "NO_SCOPED_CANDIDATES" })
        );
        Ok(())
    }

    fn log_entry(message: &str, department: &str, year: &str, matched: Option<(&str, &[&str])>) -> ChatLogEntry {
        ChatLogEntry {
            log_id: ChatLogId(Ulid::from_parts(1_700_000_000_000, 7)),
            message: message.to_string(),
            department: ScopeValue::department(Some(department)),
            year: ScopeValue::year(Some(year)),
            faq_id: matched.map(|_| fixture_id(1)),
            matched_faq: matched.map(|(question, tags)| MatchedFaq {
                question: question.to_string(),
                tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
            }),
            created_at: fixture_time(),
        }
    }

    #[test]
    fn chat_log_filter_searches_message_and_matched_question() {
        let entry = log_entry("exam dates?", "cse", "4", Some(("When are the semester exams?", &["exam"][..])));

        let by_message = ChatLogFilter { search: Some("EXAM DATES".to_string()), ..ChatLogFilter::default() };
        assert!(by_message.matches(&entry));

        let by_question = ChatLogFilter { search: Some("semester".to_string()), ..ChatLogFilter::default() };
        assert!(by_question.matches(&entry));

        let miss = ChatLogFilter { search: Some("hostel".to_string()), ..ChatLogFilter::default() };
        assert!(!miss.matches(&entry));
    }

    #[test]
    fn chat_log_filter_search_keeps_surrounding_spaces() {
        let entry = log_entry("exam dates?", "cse", "4", Some(("When are the semester exams?", &["exam"][..])));

        let leading = ChatLogFilter { search: Some(" dates".to_string()), ..ChatLogFilter::default() };
        assert!(leading.matches(&entry));

        let trailing = ChatLogFilter { search: Some("dates ".to_string()), ..ChatLogFilter::default() };
        assert!(!trailing.matches(&entry));

        let blank = ChatLogFilter { search: Some("   ".to_string()), ..ChatLogFilter::default() };
        assert!(blank.matches(&entry));
    }

    #[test]
    fn chat_log_filter_applies_scope_tag_and_dates() -> Result<(), FaqError> {
        let entry = log_entry("exam dates?", "cse", "4", Some(("When are the semester exams?", &["exam"][..])));
        let unmatched = log_entry("hostel fees", "cse", "4", None);
        let logged_on = fixture_time().date();

        assert!(ChatLogFilter { department: Some("CSE".to_string()), ..ChatLogFilter::default() }.matches(&entry));
        assert!(ChatLogFilter { department: Some("all".to_string()), ..ChatLogFilter::default() }.matches(&entry));
        assert!(!ChatLogFilter { department: Some("ece".to_string()), ..ChatLogFilter::default() }.matches(&entry));
        assert!(!ChatLogFilter { year: Some("2".to_string()), ..ChatLogFilter::default() }.matches(&entry));

        let tag = ChatLogFilter { tag: Some("exam".to_string()), ..ChatLogFilter::default() };
        assert!(tag.matches(&entry));
        assert!(!tag.matches(&unmatched));

        let same_day = ChatLogFilter {
            start_date: Some(logged_on),
            end_date: Some(logged_on),
            ..ChatLogFilter::default()
        };
        assert!(same_day.matches(&entry));

        let later = ChatLogFilter { start_date: Some(parse_date("2030-01-01")?), ..ChatLogFilter::default() };
        assert!(!later.matches(&entry));
        Ok(())
    }

    #[test]
    fn parse_date_rejects_malformed_values() {
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("yesterday").is_err());
        assert!(parse_date(" 2024-02-29 ").is_ok());
    }

    fn filler_token() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(STOP_WORDS.to_vec()).prop_map(str::to_string),
            "[a-z0-9]{0,2}",
            "[A-Z?!.,]{0,2}",
        ]
    }

    proptest! {
        #[test]
        fn property_filler_only_queries_are_empty(tokens in prop::collection::vec(filler_token(), 0..12)) {
            let message = tokens.join(" ");
            prop_assert!(extract_keywords(&message).is_empty());
            prop_assert_eq!(
                match_query(&message, &[exam_faq()]).reason(),
                Some(NoMatchReason::EmptyQuery)
            );
        }
    }

    proptest! {
        #[test]
        fn property_faq_keywords_ignore_tag_order(
            tags in prop::collection::vec("[a-z]{1,8}", 0..8),
            seed in any::<u64>(),
        ) {
            let mut record = exam_faq();
            record.tags = tags.clone();
            let original = faq_keywords(&record);

            record.tags = seeded_permutation(&tags, seed);
            prop_assert_eq!(faq_keywords(&record), original);
        }
    }

    proptest! {
        #[test]
        fn property_adding_a_matching_keyword_never_lowers_score(
            query in prop::collection::vec("[a-z]{3,8}", 0..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let record = exam_faq();
            let set = faq_keywords(&record);
            let members = set.iter().cloned().collect::<Vec<_>>();
            let before = match_score(&query, &set);

            let mut extended = query.clone();
            extended.push(members[pick.index(members.len())].clone());
            prop_assert!(match_score(&extended, &set) >= before);
        }
    }

    proptest! {
        #[test]
        fn property_ties_resolve_to_first_candidate(
            question in "[a-z]{3,8}( [a-z]{3,8}){0,4}",
            query in prop::collection::vec("[a-z]{3,8}", 1..6),
        ) {
            let first = mk_faq(100, &question, &[], "all", "all");
            let second = mk_faq(101, &question, &[], "all", "all");
            let candidates = [first.clone(), second];
            let best = select_best_match(&query, &candidates);
            if best.score > 0 {
                prop_assert_eq!(best.candidate.map(|faq| faq.faq_id), Some(first.faq_id));
            } else {
                prop_assert!(best.candidate.is_none());
            }
        }
    }

    proptest! {
        #[test]
        fn property_matching_is_idempotent(message in "[a-zA-Z ?]{0,40}") {
            let candidates = vec![
                exam_faq(),
                mk_faq(2, "Placement cell contact info", &["placement", "contact", "tnp"], "all", "all"),
            ];
            prop_assert_eq!(match_query(&message, &candidates), match_query(&message, &candidates));
        }
    }
}
