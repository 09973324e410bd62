use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use tracing::{debug, info};

use crate::models::{
    CanonicalField, CanonicalRow, CanonicalTable, Cell, Completion, Dataset, FieldMapping,
    JoinStats, RawTable, RowLoss, ViewTimestamp,
};
use crate::sanitize::sanitize_title;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %I:%M:%S %p",
    "%Y-%m-%d %I:%M %p",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y", "%B %d, %Y"];

const DONE_WORDS: &[&str] = &["yes", "true", "1", "y", "completed"];
const NOT_DONE_WORDS: &[&str] = &["no", "false", "0", "n", "not completed"];

/// What to do with rows whose completion flag cannot be mapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum)]
pub enum UnknownCompletion {
    /// Exclude the row.
    #[default]
    Drop,
    /// Count the row as not completed.
    AssumeNotDone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NormalizeOptions {
    pub unknown_completion: UnknownCompletion,
}

/// Parses a view timestamp from date text and optional time-of-day text.
///
/// With a time the two are joined by one space and parsed as a whole; a date
/// alone parses as a date with no time of day. Anything unparseable is `None`.
pub fn parse_timestamp(date: Option<&str>, time: Option<&str>) -> Option<ViewTimestamp> {
    let date = date.map(str::trim).filter(|value| !value.is_empty())?;
    match time.map(str::trim).filter(|value| !value.is_empty()) {
        Some(time) => parse_datetime(&format!("{date} {time}")).map(|value| ViewTimestamp {
            date: value.date(),
            time: Some(value.time()),
        }),
        None => parse_date_only(date),
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

// A date column may carry a full date-time; keep its time when it does.
fn parse_date_only(value: &str) -> Option<ViewTimestamp> {
    if let Some(datetime) = parse_datetime(value) {
        return Some(ViewTimestamp {
            date: datetime.date(),
            time: Some(datetime.time()),
        });
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .map(|date| ViewTimestamp { date, time: None })
}

/// Seconds to minutes. Non-numeric input is `None`, not zero.
pub fn duration_minutes(cell: &Cell) -> Option<f64> {
    cell.as_number().map(|seconds| seconds / 60.0)
}

pub fn map_completion(cell: &Cell) -> Completion {
    let Some(text) = cell.text() else {
        return Completion::Unknown;
    };
    let value = text.trim().to_lowercase();
    if DONE_WORDS.contains(&value.as_str()) {
        Completion::Done
    } else if NOT_DONE_WORDS.contains(&value.as_str()) {
        Completion::NotDone
    } else {
        Completion::Unknown
    }
}

/// Column positions for the resolved fields of one raw table.
struct Columns {
    indices: Vec<(CanonicalField, usize)>,
}

impl Columns {
    fn new(raw: &RawTable, mapping: &FieldMapping) -> Self {
        let indices = CanonicalField::ALL
            .into_iter()
            .filter_map(|field| {
                let idx = raw.column_index(mapping.get(field)?)?;
                Some((field, idx))
            })
            .collect();
        Self { indices }
    }

    fn cell<'a>(&self, row: &'a [Cell], field: CanonicalField) -> Option<&'a Cell> {
        self.indices
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .and_then(|(_, idx)| row.get(*idx))
    }

    fn text(&self, row: &[Cell], field: CanonicalField) -> Option<String> {
        self.cell(row, field).and_then(Cell::trimmed_text)
    }
}

enum Rejection {
    Title,
    Date,
    Duration,
    Completion,
}

fn normalize_row(
    row: &[Cell],
    columns: &Columns,
    options: NormalizeOptions,
) -> Result<CanonicalRow, Rejection> {
    let video_name = columns
        .text(row, CanonicalField::VideoName)
        .and_then(|raw| sanitize_title(&raw))
        .ok_or(Rejection::Title)?;

    let view_timestamp = parse_timestamp(
        columns.text(row, CanonicalField::ViewDate).as_deref(),
        columns.text(row, CanonicalField::ViewTime).as_deref(),
    )
    .ok_or(Rejection::Date)?;

    let duration_minutes = columns
        .cell(row, CanonicalField::DurationSeconds)
        .and_then(duration_minutes)
        .filter(|minutes| *minutes > 0.0)
        .ok_or(Rejection::Duration)?;

    let completion = columns
        .cell(row, CanonicalField::DoneViewing)
        .map_or(Completion::Unknown, map_completion);
    let done_viewing = match (completion.as_bool(), options.unknown_completion) {
        (Some(done), _) => done,
        (None, UnknownCompletion::AssumeNotDone) => false,
        (None, UnknownCompletion::Drop) => return Err(Rejection::Completion),
    };

    Ok(CanonicalRow {
        video_name,
        video_id: columns.text(row, CanonicalField::VideoId),
        viewer_id: columns.text(row, CanonicalField::ViewerId),
        owner_id: columns.text(row, CanonicalField::OwnerId),
        questionnaire_id: columns.text(row, CanonicalField::QuestionnaireId),
        view_timestamp,
        duration_minutes,
        done_viewing,
        view_count: None,
        category: None,
        parent_or_child: None,
        plays_user_video: None,
    })
}

/// Builds the canonical table from a raw table and its field mapping.
///
/// Never fails: rows that cannot be normalized are counted in the returned
/// [`RowLoss`] and left out. Duplicate rows keep their first occurrence.
pub fn normalize(
    raw: &RawTable,
    mapping: &FieldMapping,
    options: NormalizeOptions,
) -> (CanonicalTable, RowLoss) {
    let columns = Columns::new(raw, mapping);
    let mut loss = RowLoss {
        raw_rows: raw.len(),
        ..RowLoss::default()
    };
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for raw_row in raw.rows() {
        match normalize_row(raw_row, &columns, options) {
            Ok(row) => {
                if seen.insert(row.clone()) {
                    rows.push(row);
                } else {
                    loss.duplicates += 1;
                }
            }
            Err(Rejection::Title) => loss.missing_title += 1,
            Err(Rejection::Date) => loss.missing_date += 1,
            Err(Rejection::Duration) => loss.bad_duration += 1,
            Err(Rejection::Completion) => loss.unknown_completion += 1,
        }
    }

    loss.kept = rows.len();
    debug!(?loss, "normalized rows");
    (CanonicalTable::from_rows(rows), loss)
}

/// Resolves the schema and normalizes in one step.
pub fn build_dataset(raw: &RawTable, options: NormalizeOptions) -> Dataset {
    let mapping = FieldMapping::from_columns(raw.columns());
    let (table, loss) = normalize(raw, &mapping, options);
    info!(
        raw_rows = loss.raw_rows,
        kept = loss.kept,
        dropped = loss.dropped(),
        "built canonical table"
    );
    Dataset {
        mapping,
        table,
        loss,
        joins: JoinStats::default(),
    }
}
