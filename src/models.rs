use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::Serialize;

/// One spreadsheet cell as loaded from the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl Cell {
    /// Textual form of the cell, `None` for empty cells.
    ///
    /// Whole numbers print without a fractional part and midnight date-times
    /// print as a bare date, so the text concatenates cleanly with a separate
    /// time-of-day column.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(value) => Some(value.clone()),
            Cell::Number(value) => Some(format_number(*value)),
            Cell::Bool(value) => Some(value.to_string()),
            Cell::DateTime(value) => {
                if value.time() == NaiveTime::MIN {
                    Some(value.date().format("%Y-%m-%d").to_string())
                } else {
                    Some(value.format("%Y-%m-%d %H:%M:%S").to_string())
                }
            }
            Cell::Time(value) => Some(value.format("%H:%M:%S").to_string()),
        }
    }

    /// Trimmed text, `None` when the cell is empty or whitespace only.
    pub fn trimmed_text(&self) -> Option<String> {
        self.text()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            Cell::Number(value) => *value,
            Cell::Text(value) => value.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// A table exactly as read from a spreadsheet: free-text headers and
/// untyped cells. Every row has one cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl RawTable {
    /// Builds a table, padding short rows with [`Cell::Empty`] and truncating
    /// long ones to the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

/// The fixed target vocabulary every source column is resolved onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    VideoName,
    VideoId,
    ViewerId,
    OwnerId,
    ViewDate,
    ViewTime,
    DurationSeconds,
    DoneViewing,
    QuestionnaireId,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::VideoName,
        CanonicalField::VideoId,
        CanonicalField::ViewerId,
        CanonicalField::OwnerId,
        CanonicalField::ViewDate,
        CanonicalField::ViewTime,
        CanonicalField::DurationSeconds,
        CanonicalField::DoneViewing,
        CanonicalField::QuestionnaireId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::VideoName => "video_name",
            CanonicalField::VideoId => "video_id",
            CanonicalField::ViewerId => "viewer_id",
            CanonicalField::OwnerId => "owner_id",
            CanonicalField::ViewDate => "view_date",
            CanonicalField::ViewTime => "view_time",
            CanonicalField::DurationSeconds => "duration_seconds",
            CanonicalField::DoneViewing => "done_viewing",
            CanonicalField::QuestionnaireId => "questionnaire_id",
        }
    }

    /// Fields without which no row can survive normalization.
    pub fn is_required(self) -> bool {
        matches!(
            self,
            CanonicalField::VideoName
                | CanonicalField::ViewDate
                | CanonicalField::DurationSeconds
                | CanonicalField::DoneViewing
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical field -> source column name. Fields with no matching column are
/// simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    fields: BTreeMap<CanonicalField, String>,
}

impl FieldMapping {
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn missing(&self) -> Vec<CanonicalField> {
        CanonicalField::ALL
            .into_iter()
            .filter(|field| !self.fields.contains_key(field))
            .collect()
    }
}

impl FromIterator<(CanonicalField, String)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (CanonicalField, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Tri-state completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    Done,
    NotDone,
    Unknown,
}

impl Completion {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Completion::Done => Some(true),
            Completion::NotDone => Some(false),
            Completion::Unknown => None,
        }
    }
}

/// A view date with an optional time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewTimestamp {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl ViewTimestamp {
    pub fn hour(&self) -> Option<u32> {
        self.time.map(|time| time.hour())
    }

    /// Date and time, midnight when no time of day is known.
    pub fn as_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
    }
}

/// One cleaned video-view event.
#[derive(Debug, Clone)]
pub struct CanonicalRow {
    pub video_name: String,
    pub video_id: Option<String>,
    pub viewer_id: Option<String>,
    pub owner_id: Option<String>,
    pub questionnaire_id: Option<String>,
    pub view_timestamp: ViewTimestamp,
    pub duration_minutes: f64,
    pub done_viewing: bool,
    /// Catalogue view count joined from a counts sheet.
    pub view_count: Option<f64>,
    pub category: Option<String>,
    pub parent_or_child: Option<String>,
    /// Plays of this viewer-video pair across the whole table; `None` when
    /// the viewer is unknown. Filtering keeps the value as computed.
    pub plays_user_video: Option<usize>,
}

impl CanonicalRow {
    pub fn hour(&self) -> Option<u32> {
        self.view_timestamp.hour()
    }

    pub fn day_of_week(&self) -> Weekday {
        self.view_timestamp.date.weekday()
    }

    /// First day of the view's month.
    pub fn month(&self) -> NaiveDate {
        self.view_timestamp
            .date
            .with_day(1)
            .unwrap_or(self.view_timestamp.date)
    }

    pub fn has_questionnaire(&self) -> bool {
        self.questionnaire_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// True only when both ids are known and equal; two missing ids never match.
    pub fn is_owner_view(&self) -> bool {
        match (&self.viewer_id, &self.owner_id) {
            (Some(viewer), Some(owner)) => viewer == owner,
            _ => false,
        }
    }
}

// Identity covers the source view only; joined and derived fields are left
// out. duration_minutes is always finite and positive, so bitwise equality is
// numeric equality.
impl PartialEq for CanonicalRow {
    fn eq(&self, other: &Self) -> bool {
        self.video_name == other.video_name
            && self.video_id == other.video_id
            && self.viewer_id == other.viewer_id
            && self.owner_id == other.owner_id
            && self.questionnaire_id == other.questionnaire_id
            && self.view_timestamp == other.view_timestamp
            && self.duration_minutes.to_bits() == other.duration_minutes.to_bits()
            && self.done_viewing == other.done_viewing
    }
}

impl Eq for CanonicalRow {}

impl Hash for CanonicalRow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.video_name.hash(state);
        self.video_id.hash(state);
        self.viewer_id.hash(state);
        self.owner_id.hash(state);
        self.questionnaire_id.hash(state);
        self.view_timestamp.hash(state);
        self.duration_minutes.to_bits().hash(state);
        self.done_viewing.hash(state);
    }
}

/// The normalized, de-duplicated view table. Built in one pass and never
/// mutated; filtering produces a new table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalTable {
    rows: Vec<CanonicalRow>,
}

impl CanonicalTable {
    /// Builds a full table and derives every row's viewer-video play count.
    pub fn from_rows(mut rows: Vec<CanonicalRow>) -> Self {
        let plays: Vec<Option<usize>> = {
            let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
            for row in &rows {
                if let Some(viewer) = row.viewer_id.as_deref() {
                    *counts.entry((viewer, row.video_name.as_str())).or_default() += 1;
                }
            }
            rows.iter()
                .map(|row| {
                    let viewer = row.viewer_id.as_deref()?;
                    counts.get(&(viewer, row.video_name.as_str())).copied()
                })
                .collect()
        };
        for (row, plays) in rows.iter_mut().zip(plays) {
            row.plays_user_video = plays;
        }
        Self { rows }
    }

    /// The rows passing `keep`, derived fields carried over unchanged.
    pub fn retain_rows(&self, mut keep: impl FnMut(&CanonicalRow) -> bool) -> Self {
        Self {
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    pub fn rows(&self) -> &[CanonicalRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalRow> {
        self.rows().iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, CanonicalRow> {
        self.rows.iter_mut()
    }
}

/// Where raw rows went during normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowLoss {
    pub raw_rows: usize,
    pub missing_title: usize,
    pub missing_date: usize,
    pub bad_duration: usize,
    pub unknown_completion: usize,
    pub duplicates: usize,
    pub kept: usize,
}

impl RowLoss {
    pub fn dropped(&self) -> usize {
        self.raw_rows - self.kept
    }
}

/// Output of one full resolve -> normalize run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub mapping: FieldMapping,
    pub table: CanonicalTable,
    pub loss: RowLoss,
    pub joins: JoinStats,
}

/// How many canonical rows picked up values from the side sheets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub with_view_count: usize,
    pub with_metadata: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub total_views: usize,
    pub unique_viewers: usize,
    pub videos_watched: usize,
    pub avg_duration: Option<f64>,
    pub median_duration: Option<f64>,
    pub p75_duration: Option<f64>,
    pub completion_rate: Option<f64>,
    pub repeat_view_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStat {
    pub month: NaiveDate,
    pub views: usize,
    pub unique_viewers: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStat {
    pub video_name: String,
    pub category: Option<String>,
    pub views: usize,
    pub unique_viewers: usize,
    pub avg_duration: f64,
    pub q25_duration: f64,
    pub q75_duration: f64,
    pub repeat_share: Option<f64>,
    pub view_count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerViewerStat {
    pub is_owner_view: bool,
    pub views: usize,
    pub mean_duration: f64,
    pub repeat_share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakDay {
    pub date: NaiveDate,
    pub views: usize,
    pub rolling_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub key: String,
    pub views: usize,
}
