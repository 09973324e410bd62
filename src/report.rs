use std::fmt::Write;

use crate::aggregate::{self, GroupBy, WEEKDAYS};
use crate::models::{CanonicalTable, RowLoss};

fn percent(share: Option<f64>) -> String {
    share.map_or_else(|| "n/a".to_string(), |share| format!("{:.1}%", share * 100.0))
}

fn minutes(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

pub fn build_report(
    source: &str,
    table: &CanonicalTable,
    loss: &RowLoss,
    min_views: usize,
) -> String {
    let kpis = aggregate::kpis(table);
    let monthly = aggregate::monthly_stats(table);
    let leaderboard = aggregate::video_leaderboard(table, min_views);
    let (completed, not_completed) = aggregate::completion_breakdown(table);
    let (with_questionnaire, without_questionnaire) = aggregate::questionnaire_breakdown(table);
    let owner_groups = aggregate::owner_vs_viewer(table);
    let peaks = aggregate::peak_days(table);

    let mut output = String::new();

    let _ = writeln!(output, "# FreeFuse Engagement Report");
    let _ = writeln!(output, "Generated from {source}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Metrics");
    let _ = writeln!(output, "- Total views: {}", kpis.total_views);
    let _ = writeln!(output, "- Unique viewers: {}", kpis.unique_viewers);
    let _ = writeln!(output, "- Videos watched: {}", kpis.videos_watched);
    let _ = writeln!(output, "- Avg duration (min): {}", minutes(kpis.avg_duration));
    let _ = writeln!(output, "- Median duration (min): {}", minutes(kpis.median_duration));
    let _ = writeln!(output, "- P75 duration (min): {}", minutes(kpis.p75_duration));
    let _ = writeln!(output, "- Completion rate: {}", percent(kpis.completion_rate));
    let _ = writeln!(output, "- Repeat view rate: {}", percent(kpis.repeat_view_rate));

    if let Some(peak) = aggregate::peak_month(&monthly) {
        let _ = writeln!(
            output,
            "- Peak month: {} with {} views",
            peak.month.format("%b %Y"),
            peak.views
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Videos");

    if leaderboard.is_empty() {
        let _ = writeln!(output, "No views recorded.");
    } else {
        for video in leaderboard.iter().take(10) {
            let category = video
                .category
                .as_deref()
                .map(|category| format!(" [{category}]"))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- {}{}: {} views, {} viewers, avg {:.2} min (IQR {:.2}-{:.2}), repeat {}",
                video.video_name,
                category,
                video.views,
                video.unique_viewers,
                video.avg_duration,
                video.q25_duration,
                video.q75_duration,
                percent(video.repeat_share)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Completion");
    let _ = writeln!(output, "- {}: {}", aggregate::completion_label(true), completed);
    let _ = writeln!(output, "- {}: {}", aggregate::completion_label(false), not_completed);
    let _ = writeln!(output, "- {}: {}", aggregate::questionnaire_label(true), with_questionnaire);
    let _ = writeln!(
        output,
        "- {}: {}",
        aggregate::questionnaire_label(false),
        without_questionnaire
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Owner vs Viewer");

    if owner_groups.is_empty() {
        let _ = writeln!(output, "No views recorded.");
    } else {
        for group in owner_groups.iter() {
            let _ = writeln!(
                output,
                "- {}: {} views, mean {:.2} min, repeat {}",
                aggregate::owner_label(group.is_owner_view),
                group.views,
                group.mean_duration,
                percent(group.repeat_share)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Repeat Viewing");
    let plays = aggregate::group_counts(table, GroupBy::Plays);
    if plays.is_empty() {
        let _ = writeln!(output, "No views with a known viewer.");
    } else {
        for bucket in plays.iter() {
            let _ = writeln!(output, "- {} plays per viewer-video: {} views", bucket.key, bucket.views);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Busiest Time Slot");
    let heat = aggregate::weekday_hour_heatmap(table);
    let busiest = heat
        .iter()
        .enumerate()
        .flat_map(|(day, hours)| hours.iter().enumerate().map(move |(hour, views)| (day, hour, *views)))
        .filter(|(_, _, views)| *views > 0)
        .max_by(|a, b| a.2.cmp(&b.2).then_with(|| (b.0, b.1).cmp(&(a.0, a.1))));
    match busiest {
        Some((day, hour, views)) => {
            let _ = writeln!(output, "- {} {:02}:00 with {} views", WEEKDAYS[day], hour, views);
        }
        None => {
            let _ = writeln!(output, "No views with a time of day.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Peak Days");

    if peaks.is_empty() {
        let _ = writeln!(output, "No peak days detected.");
    } else {
        for peak in peaks.iter() {
            let _ = writeln!(
                output,
                "- {}: {} views (7-day mean {:.1})",
                peak.date, peak.views, peak.rolling_mean
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");
    let _ = writeln!(
        output,
        "- {} of {} source rows kept",
        loss.kept, loss.raw_rows
    );
    let _ = writeln!(output, "- Unusable title: {}", loss.missing_title);
    let _ = writeln!(output, "- Missing or unparseable date: {}", loss.missing_date);
    let _ = writeln!(output, "- Non-positive or non-numeric duration: {}", loss.bad_duration);
    let _ = writeln!(output, "- Unknown completion: {}", loss.unknown_completion);
    let _ = writeln!(output, "- Duplicate rows: {}", loss.duplicates);

    output
}
