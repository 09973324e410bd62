use std::io::Write;

use anyhow::Context;
use serde::Serialize;

use crate::models::{CanonicalRow, CanonicalTable, VideoStat};

/// One CSV line of the canonical schema. Absent values serialize as empty
/// fields.
#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    video_name: &'a str,
    video_id: Option<&'a str>,
    viewer_id: Option<&'a str>,
    owner_id: Option<&'a str>,
    questionnaire_id: Option<&'a str>,
    has_questionnaire: bool,
    view_date: String,
    view_time: Option<String>,
    hour: Option<u32>,
    day_of_week: String,
    month: String,
    duration_minutes: f64,
    done_viewing: bool,
    is_owner_view: bool,
    plays_user_video: Option<usize>,
    view_count: Option<f64>,
    category: Option<&'a str>,
    parent_or_child: Option<&'a str>,
}

impl<'a> From<&'a CanonicalRow> for ExportRecord<'a> {
    fn from(row: &'a CanonicalRow) -> Self {
        Self {
            video_name: &row.video_name,
            video_id: row.video_id.as_deref(),
            viewer_id: row.viewer_id.as_deref(),
            owner_id: row.owner_id.as_deref(),
            questionnaire_id: row.questionnaire_id.as_deref(),
            has_questionnaire: row.has_questionnaire(),
            view_date: row.view_timestamp.date.format("%Y-%m-%d").to_string(),
            view_time: row
                .view_timestamp
                .time
                .map(|time| time.format("%H:%M:%S").to_string()),
            hour: row.hour(),
            day_of_week: format!("{:?}", row.day_of_week()),
            month: row.month().format("%Y-%m-%d").to_string(),
            duration_minutes: row.duration_minutes,
            done_viewing: row.done_viewing,
            is_owner_view: row.is_owner_view(),
            plays_user_video: row.plays_user_video,
            view_count: row.view_count,
            category: row.category.as_deref(),
            parent_or_child: row.parent_or_child.as_deref(),
        }
    }
}

/// Writes the table as comma-separated text with a header row. An empty
/// table still produces the header.
pub fn write_csv<W: Write>(table: &CanonicalTable, writer: W) -> anyhow::Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer
        .write_record(HEADER)
        .context("failed to write csv header")?;
    for row in table.iter() {
        csv_writer
            .serialize(ExportRecord::from(row))
            .context("failed to write csv row")?;
    }
    csv_writer.flush().context("failed to flush csv output")?;
    Ok(())
}

/// Writes leaderboard rows with a header taken from the record fields.
pub fn write_leaderboard_csv<W: Write>(stats: &[VideoStat], writer: W) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for stat in stats {
        csv_writer
            .serialize(stat)
            .context("failed to write leaderboard row")?;
    }
    csv_writer.flush().context("failed to flush csv output")?;
    Ok(())
}

const HEADER: [&str; 18] = [
    "video_name",
    "video_id",
    "viewer_id",
    "owner_id",
    "questionnaire_id",
    "has_questionnaire",
    "view_date",
    "view_time",
    "hour",
    "day_of_week",
    "month",
    "duration_minutes",
    "done_viewing",
    "is_owner_view",
    "plays_user_video",
    "view_count",
    "category",
    "parent_or_child",
];
