use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{NaiveDate, Weekday};
use clap::ValueEnum;

use crate::models::{
    CanonicalRow, CanonicalTable, GroupCount, Kpis, MonthlyStat, OwnerViewerStat, PeakDay,
    VideoStat,
};

const PEAK_WINDOW: usize = 7;
const PEAK_FACTOR: f64 = 1.25;

/// Group-by keys handed to the chart renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupBy {
    Date,
    Month,
    HourWeekday,
    Video,
    Completion,
    Questionnaire,
    OwnerViewer,
    ViewerVideo,
    Category,
    ParentOrChild,
    /// Distribution of plays per viewer-video pair.
    Plays,
}

/// Numeric keys order numerically, ahead of text keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Number(usize),
    Text(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Number(value) => write!(f, "{value}"),
            GroupKey::Text(value) => f.write_str(value),
        }
    }
}

fn group_key(row: &CanonicalRow, group: GroupBy) -> Option<GroupKey> {
    let key = match group {
        GroupBy::Date => row.view_timestamp.date.to_string(),
        GroupBy::Month => row.month().format("%Y-%m").to_string(),
        GroupBy::HourWeekday => format!("{} {:02}", row.day_of_week(), row.hour()?),
        GroupBy::Video => row.video_name.clone(),
        GroupBy::Completion => completion_label(row.done_viewing).to_string(),
        GroupBy::Questionnaire => questionnaire_label(row.has_questionnaire()).to_string(),
        GroupBy::OwnerViewer => owner_label(row.is_owner_view()).to_string(),
        GroupBy::ViewerVideo => format!("{} / {}", row.viewer_id.as_deref()?, row.video_name),
        GroupBy::Category => row.category.clone()?,
        GroupBy::ParentOrChild => row.parent_or_child.clone()?,
        GroupBy::Plays => return row.plays_user_video.map(GroupKey::Number),
    };
    Some(GroupKey::Text(key))
}

pub fn completion_label(done: bool) -> &'static str {
    if done {
        "Completed"
    } else {
        "Not Completed"
    }
}

pub fn questionnaire_label(present: bool) -> &'static str {
    if present {
        "With questionnaire"
    } else {
        "Without questionnaire"
    }
}

pub fn owner_label(is_owner: bool) -> &'static str {
    if is_owner {
        "Owner viewing own video"
    } else {
        "Other viewers"
    }
}

/// View counts per group key, ordered by key. Rows lacking the grouped value
/// (no hour, no viewer, no category) are left out.
pub fn group_counts(table: &CanonicalTable, group: GroupBy) -> Vec<GroupCount> {
    let mut counts: BTreeMap<GroupKey, usize> = BTreeMap::new();
    for row in table.iter() {
        if let Some(key) = group_key(row, group) {
            *counts.entry(key).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(key, views)| GroupCount {
            key: key.to_string(),
            views,
        })
        .collect()
}

/// Share of rows with a known viewer whose viewer-video pair was played more
/// than once anywhere in the source table.
fn repeat_share<'a>(rows: impl Iterator<Item = &'a CanonicalRow>) -> Option<f64> {
    let mut known = 0usize;
    let mut repeated = 0usize;
    for plays in rows.filter_map(|row| row.plays_user_video) {
        known += 1;
        if plays > 1 {
            repeated += 1;
        }
    }
    (known > 0).then(|| repeated as f64 / known as f64)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

fn unique_viewers<'a>(rows: impl Iterator<Item = &'a CanonicalRow>) -> usize {
    rows.filter_map(|row| row.viewer_id.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

pub fn kpis(table: &CanonicalTable) -> Kpis {
    let durations: Vec<f64> = table.iter().map(|row| row.duration_minutes).collect();
    Kpis {
        total_views: table.len(),
        unique_viewers: unique_viewers(table.iter()),
        videos_watched: table
            .iter()
            .map(|row| row.video_name.as_str())
            .collect::<HashSet<_>>()
            .len(),
        avg_duration: mean(durations.iter().copied()),
        median_duration: quantile(&durations, 0.5),
        p75_duration: quantile(&durations, 0.75),
        completion_rate: mean(table.iter().map(|row| if row.done_viewing { 1.0 } else { 0.0 })),
        repeat_view_rate: repeat_share(table.iter()),
    }
}

pub fn monthly_stats(table: &CanonicalTable) -> Vec<MonthlyStat> {
    let mut months: BTreeMap<NaiveDate, Vec<&CanonicalRow>> = BTreeMap::new();
    for row in table.iter() {
        months.entry(row.month()).or_default().push(row);
    }
    months
        .into_iter()
        .map(|(month, rows)| MonthlyStat {
            month,
            views: rows.len(),
            unique_viewers: unique_viewers(rows.iter().copied()),
            avg_duration: mean(rows.iter().map(|row| row.duration_minutes)).unwrap_or(0.0),
        })
        .collect()
}

/// Month with the most views; the earliest month wins a tie.
pub fn peak_month(stats: &[MonthlyStat]) -> Option<&MonthlyStat> {
    stats
        .iter()
        .fold(None, |best: Option<&MonthlyStat>, stat| match best {
            Some(best) if best.views >= stat.views => Some(best),
            _ => Some(stat),
        })
}

pub fn daily_views(table: &CanonicalTable) -> Vec<(NaiveDate, usize)> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for row in table.iter() {
        *days.entry(row.view_timestamp.date).or_default() += 1;
    }
    days.into_iter().collect()
}

/// Days whose views reach 1.25x the trailing 7-entry rolling mean. Needs at
/// least seven viewing days.
pub fn peak_days(table: &CanonicalTable) -> Vec<PeakDay> {
    let daily = daily_views(table);
    if daily.len() < PEAK_WINDOW {
        return Vec::new();
    }
    daily
        .iter()
        .enumerate()
        .filter_map(|(idx, (date, views))| {
            let window = &daily[idx.saturating_sub(PEAK_WINDOW - 1)..=idx];
            let rolling_mean =
                window.iter().map(|(_, views)| *views as f64).sum::<f64>() / window.len() as f64;
            (*views as f64 >= rolling_mean * PEAK_FACTOR).then_some(PeakDay {
                date: *date,
                views: *views,
                rolling_mean,
            })
        })
        .collect()
}

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// View counts indexed `[weekday from Monday][hour]`. Rows without a time of
/// day are not placed.
pub fn weekday_hour_heatmap(table: &CanonicalTable) -> [[usize; 24]; 7] {
    let mut heat = [[0usize; 24]; 7];
    for row in table.iter() {
        if let Some(hour) = row.hour() {
            heat[row.day_of_week().num_days_from_monday() as usize][hour as usize] += 1;
        }
    }
    heat
}

/// Per-video engagement, most viewed first. Videos with fewer than
/// `min_views` views are left out.
pub fn video_leaderboard(table: &CanonicalTable, min_views: usize) -> Vec<VideoStat> {
    let mut videos: HashMap<&str, Vec<&CanonicalRow>> = HashMap::new();
    for row in table.iter() {
        videos.entry(row.video_name.as_str()).or_default().push(row);
    }

    let mut stats: Vec<VideoStat> = videos
        .into_iter()
        .filter(|(_, rows)| rows.len() >= min_views)
        .map(|(name, rows)| {
            let durations: Vec<f64> = rows.iter().map(|row| row.duration_minutes).collect();
            VideoStat {
                video_name: name.to_string(),
                category: rows.iter().find_map(|row| row.category.clone()),
                views: rows.len(),
                unique_viewers: unique_viewers(rows.iter().copied()),
                avg_duration: mean(durations.iter().copied()).unwrap_or(0.0),
                q25_duration: quantile(&durations, 0.25).unwrap_or(0.0),
                q75_duration: quantile(&durations, 0.75).unwrap_or(0.0),
                repeat_share: repeat_share(rows.iter().copied()),
                view_count: rows.iter().find_map(|row| row.view_count),
            }
        })
        .collect();
    stats.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.video_name.cmp(&b.video_name)));
    stats
}

/// (completed, not completed) view counts.
pub fn completion_breakdown(table: &CanonicalTable) -> (usize, usize) {
    let completed = table.iter().filter(|row| row.done_viewing).count();
    (completed, table.len() - completed)
}

/// (with questionnaire, without questionnaire) view counts.
pub fn questionnaire_breakdown(table: &CanonicalTable) -> (usize, usize) {
    let with = table.iter().filter(|row| row.has_questionnaire()).count();
    (with, table.len() - with)
}

/// Engagement of owners watching their own videos against everyone else.
/// Groups without views are omitted; the "other viewers" group comes first.
pub fn owner_vs_viewer(table: &CanonicalTable) -> Vec<OwnerViewerStat> {
    [false, true]
        .into_iter()
        .filter_map(|is_owner_view| {
            let rows: Vec<&CanonicalRow> = table
                .iter()
                .filter(|row| row.is_owner_view() == is_owner_view)
                .collect();
            if rows.is_empty() {
                return None;
            }
            Some(OwnerViewerStat {
                is_owner_view,
                views: rows.len(),
                mean_duration: mean(rows.iter().map(|row| row.duration_minutes)).unwrap_or(0.0),
                repeat_share: repeat_share(rows.iter().copied()),
            })
        })
        .collect()
}
