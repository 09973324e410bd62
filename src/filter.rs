use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::Serialize;

use crate::models::{CanonicalRow, CanonicalTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
pub enum CompletionFilter {
    #[default]
    All,
    Completed,
    NotCompleted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
pub enum ViewerType {
    #[default]
    All,
    OwnerOnly,
    NonOwnerOnly,
}

/// Predicate over canonical rows. Default matches everything.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    /// Empty selects every video.
    pub videos: Vec<String>,
    pub completion: CompletionFilter,
    pub dates: Option<RangeInclusive<NaiveDate>>,
    /// Rows without a time of day never match an explicit hour range.
    pub hours: Option<RangeInclusive<u32>>,
    pub has_questionnaire: Option<bool>,
    pub viewer_type: ViewerType,
    /// Exact category; rows without one never match.
    pub category: Option<String>,
    pub parent_or_child: Option<String>,
}

impl ViewFilter {
    pub fn matches(&self, row: &CanonicalRow) -> bool {
        if !self.videos.is_empty() && !self.videos.iter().any(|name| *name == row.video_name) {
            return false;
        }
        let completion_ok = match self.completion {
            CompletionFilter::All => true,
            CompletionFilter::Completed => row.done_viewing,
            CompletionFilter::NotCompleted => !row.done_viewing,
        };
        if !completion_ok {
            return false;
        }
        if let Some(dates) = &self.dates {
            if !dates.contains(&row.view_timestamp.date) {
                return false;
            }
        }
        if let Some(hours) = &self.hours {
            if !row.hour().is_some_and(|hour| hours.contains(&hour)) {
                return false;
            }
        }
        if let Some(wanted) = self.has_questionnaire {
            if row.has_questionnaire() != wanted {
                return false;
            }
        }
        if !matches_label(self.category.as_deref(), row.category.as_deref())
            || !matches_label(self.parent_or_child.as_deref(), row.parent_or_child.as_deref())
        {
            return false;
        }
        match self.viewer_type {
            ViewerType::All => true,
            ViewerType::OwnerOnly => row.is_owner_view(),
            ViewerType::NonOwnerOnly => !row.is_owner_view(),
        }
    }

    /// Returns the matching rows as a new table. Play counts stay those of
    /// the full table.
    pub fn apply(&self, table: &CanonicalTable) -> CanonicalTable {
        table.retain_rows(|row| self.matches(row))
    }
}

fn matches_label(wanted: Option<&str>, value: Option<&str>) -> bool {
    wanted.map_or(true, |wanted| value == Some(wanted))
}

fn distinct_labels<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    values
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Value domains used to populate filter controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub video_names: Vec<String>,
    pub first_view: Option<NaiveDateTime>,
    pub last_view: Option<NaiveDateTime>,
    pub hours: RangeInclusive<u32>,
    pub completion: Vec<CompletionFilter>,
    pub questionnaire: Vec<bool>,
    pub viewer_types: Vec<ViewerType>,
    /// Empty when no metadata sheet was joined.
    pub categories: Vec<String>,
    pub parent_or_child: Vec<String>,
}

impl FilterOptions {
    pub fn from_table(table: &CanonicalTable) -> Self {
        let video_names: BTreeSet<&str> = table.iter().map(|row| row.video_name.as_str()).collect();
        let timestamps = table.iter().map(|row| row.view_timestamp.as_datetime());
        Self {
            video_names: video_names.into_iter().map(str::to_string).collect(),
            first_view: timestamps.clone().min(),
            last_view: timestamps.max(),
            hours: 0..=23,
            completion: CompletionFilter::value_variants().to_vec(),
            questionnaire: vec![true, false],
            viewer_types: ViewerType::value_variants().to_vec(),
            categories: distinct_labels(table.iter().map(|row| row.category.as_deref())),
            parent_or_child: distinct_labels(table.iter().map(|row| row.parent_or_child.as_deref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViewTimestamp;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;

    fn row(name: &str, day: u32, hour: Option<u32>, done: bool) -> CanonicalRow {
        CanonicalRow {
            video_name: name.to_string(),
            video_id: None,
            viewer_id: Some("s1".to_string()),
            owner_id: Some("t1".to_string()),
            questionnaire_id: None,
            view_timestamp: ViewTimestamp {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                time: hour.map(|h| NaiveTime::from_hms_opt(h, 0, 0).unwrap()),
            },
            duration_minutes: 5.0,
            done_viewing: done,
            view_count: None,
            category: None,
            parent_or_child: None,
            plays_user_video: None,
        }
    }

    fn sample() -> CanonicalTable {
        let mut biology = row("Biology", 1, Some(9), true);
        biology.category = Some("Life Science".to_string());
        biology.parent_or_child = Some("Parent".to_string());
        let mut chemistry = row("Chemistry", 2, None, true);
        chemistry.category = Some("Physical Science".to_string());
        chemistry.parent_or_child = Some("Child".to_string());
        let mut owner = row("Physics", 3, Some(20), false);
        owner.viewer_id = Some("t1".to_string());
        owner.questionnaire_id = Some("Q1".to_string());
        owner.category = Some("Physical Science".to_string());
        CanonicalTable::from_rows(vec![biology, chemistry, owner])
    }

    fn names(table: &CanonicalTable) -> Vec<&str> {
        table.iter().map(|row| row.video_name.as_str()).collect()
    }

    #[test]
    fn default_filter_keeps_everything() {
        let table = sample();
        assert_eq!(ViewFilter::default().apply(&table), table);
    }

    #[test]
    fn filters_by_video_and_completion() {
        let table = sample();
        let filter = ViewFilter {
            videos: vec!["Biology".to_string(), "Physics".to_string()],
            completion: CompletionFilter::Completed,
            ..ViewFilter::default()
        };
        assert_eq!(names(&filter.apply(&table)), vec!["Biology"]);
    }

    #[test]
    fn date_range_is_inclusive() {
        let table = sample();
        let filter = ViewFilter {
            dates: Some(
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()..=NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            ),
            ..ViewFilter::default()
        };
        assert_eq!(names(&filter.apply(&table)), vec!["Chemistry", "Physics"]);
    }

    #[test]
    fn hour_range_excludes_rows_without_time() {
        let table = sample();
        let filter = ViewFilter {
            hours: Some(0..=23),
            ..ViewFilter::default()
        };
        assert_eq!(names(&filter.apply(&table)), vec!["Biology", "Physics"]);
    }

    #[test]
    fn questionnaire_and_owner_filters() {
        let table = sample();
        let with_questionnaire = ViewFilter {
            has_questionnaire: Some(true),
            ..ViewFilter::default()
        };
        assert_eq!(names(&with_questionnaire.apply(&table)), vec!["Physics"]);

        let non_owner = ViewFilter {
            viewer_type: ViewerType::NonOwnerOnly,
            ..ViewFilter::default()
        };
        assert_eq!(names(&non_owner.apply(&table)), vec!["Biology", "Chemistry"]);
    }

    #[test]
    fn category_and_level_filters() {
        let table = sample();
        let physical = ViewFilter {
            category: Some("Physical Science".to_string()),
            ..ViewFilter::default()
        };
        assert_eq!(names(&physical.apply(&table)), vec!["Chemistry", "Physics"]);

        let children = ViewFilter {
            category: Some("Physical Science".to_string()),
            parent_or_child: Some("Child".to_string()),
            ..ViewFilter::default()
        };
        assert_eq!(names(&children.apply(&table)), vec!["Chemistry"]);
    }

    #[test]
    fn filtering_keeps_full_table_play_counts() {
        let mut first = row("Biology", 5, Some(9), true);
        first.viewer_id = Some("s9".to_string());
        let mut second = first.clone();
        second.view_timestamp.date = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();
        let table = CanonicalTable::from_rows(vec![first, second]);

        let january = ViewFilter {
            dates: Some(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()..=NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ),
            ..ViewFilter::default()
        };
        let view = january.apply(&table);
        assert_eq!(view.len(), 1);
        assert_eq!(view.rows()[0].plays_user_video, Some(2));
    }

    #[test]
    fn options_describe_table() {
        let options = FilterOptions::from_table(&sample());
        assert_eq!(options.video_names, vec!["Biology", "Chemistry", "Physics"]);
        assert_eq!(
            options.first_view,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0)
        );
        assert_eq!(
            options.last_view,
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(20, 0, 0)
        );
        assert_eq!(options.hours, 0..=23);
        assert_eq!(options.completion.len(), 3);
        assert_eq!(options.categories, vec!["Life Science", "Physical Science"]);
        assert_eq!(options.parent_or_child, vec!["Child", "Parent"]);
    }

    #[test]
    fn options_for_empty_table() {
        let options = FilterOptions::from_table(&CanonicalTable::default());
        assert!(options.video_names.is_empty());
        assert_eq!(options.first_view, None);
        assert_eq!(options.last_view, None);
        assert!(options.categories.is_empty());
    }
}
