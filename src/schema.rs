use tracing::{debug, warn};

use crate::models::{CanonicalField, FieldMapping};

/// Known historical header spellings per canonical field, most specific first.
///
/// A bare `id` is deliberately absent from the video id list: as a substring it
/// matches any header containing "video".
pub const CANDIDATES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::VideoName,
        &[
            "viewerChoices_VideoName",
            "Video_Name",
            "VideoName",
            "Video Title",
            "video name",
            "viewerChoices video name",
        ],
    ),
    (
        CanonicalField::VideoId,
        &["viewerChoices_VideoId", "VideoID", "Video_Id", "video id"],
    ),
    (
        CanonicalField::ViewerId,
        &["videoViewer", "Viewer", "User", "Student", "viewer id"],
    ),
    (
        CanonicalField::OwnerId,
        &["videoOwner", "Owner", "Instructor"],
    ),
    (
        CanonicalField::ViewDate,
        &["viewerChoices_ViewDate", "View_Date", "ViewDate", "Date"],
    ),
    (
        CanonicalField::ViewTime,
        &["viewerChoices_ViewTime", "View_Time", "ViewTime", "Time"],
    ),
    (
        CanonicalField::DurationSeconds,
        &[
            "viewerChoices_ViewingDuration",
            "Viewing_Duration_Sec",
            "ViewingDuration",
            "Duration",
            "Duration_Seconds",
        ],
    ),
    (
        CanonicalField::DoneViewing,
        &[
            "viewerChoices_DoneViewing",
            "Done_Viewing",
            "Done",
            "Completed",
            "Completion",
        ],
    ),
    (
        CanonicalField::QuestionnaireId,
        &[
            "viewerChoices_QuestionnaireId",
            "Questionnaire_Id",
            "QuestionnaireID",
            "Questionnaire",
            "Survey_Id",
            "Survey",
        ],
    ),
];

/// Header spellings for the optional per-video counts sheet. Bare `id` and `n`
/// are left out for the same substring reason as above.
pub const COUNTS_VIDEO_ID: &[&str] = &["VideoID", "Video_Id", "viewerChoices_VideoId", "video id"];
pub const COUNTS_VIDEO_NAME: &[&str] =
    &["Video_Name", "VideoName", "viewerChoices_VideoName", "name", "title"];
pub const COUNTS_VIEW_COUNT: &[&str] = &["Count", "Views", "View_Count", "Total_Views"];

/// Header spellings for the optional parent/child metadata sheet.
pub const META_VIDEO_ID: &[&str] = COUNTS_VIDEO_ID;
pub const META_VIDEO_NAME: &[&str] = COUNTS_VIDEO_NAME;
pub const META_PARENT_OR_CHILD: &[&str] = &[
    "Type",
    "Level",
    "ParentChild",
    "parent_child",
    "is_parent",
    "Parent/Child",
];
pub const META_CATEGORY: &[&str] = &["Category", "Topic", "Module", "Tag", "Tags"];

/// Lowercases, then keeps only ASCII letters and digits.
pub fn norm(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Picks the source column for one canonical field.
///
/// Tiers are tried in order and the first tier with a hit wins:
/// 1. exact, case-sensitive match, in candidate order;
/// 2. normalized equality, in candidate order; when several columns share
///    that normalized form the rightmost one wins;
/// 3. normalized column contains a normalized candidate, in column order.
pub fn resolve<'a, S: AsRef<str>>(columns: &'a [S], candidates: &[&str]) -> Option<&'a str> {
    for candidate in candidates {
        if let Some(column) = columns.iter().find(|column| column.as_ref() == *candidate) {
            return Some(column.as_ref());
        }
    }

    let normalized_columns: Vec<String> =
        columns.iter().map(|column| norm(column.as_ref())).collect();
    let targets: Vec<String> = candidates
        .iter()
        .map(|candidate| norm(candidate))
        .filter(|target| !target.is_empty())
        .collect();

    for target in &targets {
        if let Some(idx) = normalized_columns.iter().rposition(|column| column == target) {
            return Some(columns[idx].as_ref());
        }
    }

    normalized_columns
        .iter()
        .position(|column| targets.iter().any(|target| column.contains(target.as_str())))
        .map(|idx| columns[idx].as_ref())
}

pub fn candidates_for(field: CanonicalField) -> &'static [&'static str] {
    CANDIDATES
        .iter()
        .find(|(candidate_field, _)| *candidate_field == field)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

impl FieldMapping {
    /// Resolves every canonical field independently against the headers.
    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        CanonicalField::ALL
            .into_iter()
            .filter_map(|field| {
                let column = resolve(columns, candidates_for(field));
                match column {
                    Some(column) => debug!(%field, column, "resolved column"),
                    None if field.is_required() => warn!(%field, "no column matches required field"),
                    None => debug!(%field, "field not present in source"),
                }
                column.map(|column| (field, column.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("viewerChoices_VideoName", "viewerchoicesvideoname")]
    #[case("  Video Title ", "videotitle")]
    #[case("Duration (sec.)", "durationsec")]
    #[case("Vidéo", "vido")]
    #[case("", "")]
    fn norm_keeps_ascii_alphanumerics(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(norm(input), expected);
    }

    #[test]
    fn exact_match_beats_substring_ambiguity() {
        let columns = ["Duration", "Duration_Seconds"];
        assert_eq!(
            resolve(&columns, &["Duration_Seconds", "Duration"]),
            Some("Duration_Seconds")
        );
    }

    #[test]
    fn exact_match_follows_candidate_order() {
        let columns = ["Video_Name", "viewerChoices_VideoName"];
        assert_eq!(
            resolve(&columns, &["viewerChoices_VideoName", "Video_Name"]),
            Some("viewerChoices_VideoName")
        );
    }

    #[test]
    fn normalized_match_ignores_case_and_separators() {
        let columns = ["VIEW DATE", "Notes"];
        assert_eq!(resolve(&columns, &["View_Date"]), Some("VIEW DATE"));
    }

    #[test]
    fn normalized_tier_beats_substring_tier() {
        let columns = ["Total Duration Watched", "duration"];
        assert_eq!(resolve(&columns, &["Duration"]), Some("duration"));
    }

    #[test]
    fn substring_match_takes_leftmost_column() {
        let columns = ["Session", "Video Duration (s)", "Duration Bucket"];
        assert_eq!(
            resolve(&columns, &["Duration_Seconds", "Duration"]),
            Some("Video Duration (s)")
        );
    }

    #[test]
    fn no_match_is_none() {
        let columns = ["Foo", "Bar"];
        assert_eq!(resolve(&columns, &["Duration"]), None);
        let empty: [&str; 0] = [];
        assert_eq!(resolve(&empty, &["Duration"]), None);
    }

    #[test]
    fn empty_normalized_candidate_never_matches_everything() {
        let columns = ["Foo"];
        assert_eq!(resolve(&columns, &["--"]), None);
    }

    #[test]
    fn maps_prefixed_export_headers() {
        let columns = [
            "viewerChoices_VideoName",
            "viewerChoices_ViewDate",
            "viewerChoices_ViewTime",
            "viewerChoices_ViewingDuration",
            "viewerChoices_DoneViewing",
            "videoViewer",
            "videoOwner",
        ];
        let mapping = FieldMapping::from_columns(&columns);
        assert_eq!(mapping.get(CanonicalField::VideoName), Some("viewerChoices_VideoName"));
        assert_eq!(mapping.get(CanonicalField::ViewDate), Some("viewerChoices_ViewDate"));
        assert_eq!(mapping.get(CanonicalField::ViewTime), Some("viewerChoices_ViewTime"));
        assert_eq!(
            mapping.get(CanonicalField::DurationSeconds),
            Some("viewerChoices_ViewingDuration")
        );
        assert_eq!(mapping.get(CanonicalField::DoneViewing), Some("viewerChoices_DoneViewing"));
        assert_eq!(mapping.get(CanonicalField::ViewerId), Some("videoViewer"));
        assert_eq!(mapping.get(CanonicalField::OwnerId), Some("videoOwner"));
        assert_eq!(
            mapping.missing(),
            vec![CanonicalField::VideoId, CanonicalField::QuestionnaireId]
        );
    }

    #[test]
    fn maps_human_friendly_headers() {
        let columns = ["Video Title", "Date", "Duration", "Completed", "Questionnaire ID"];
        let mapping = FieldMapping::from_columns(&columns);
        assert_eq!(mapping.get(CanonicalField::VideoName), Some("Video Title"));
        assert_eq!(mapping.get(CanonicalField::ViewDate), Some("Date"));
        assert_eq!(mapping.get(CanonicalField::ViewTime), None);
        assert_eq!(mapping.get(CanonicalField::DurationSeconds), Some("Duration"));
        assert_eq!(mapping.get(CanonicalField::DoneViewing), Some("Completed"));
        assert_eq!(mapping.get(CanonicalField::QuestionnaireId), Some("Questionnaire ID"));
    }

    #[test]
    fn every_field_has_candidates() {
        for field in CanonicalField::ALL {
            assert!(!candidates_for(field).is_empty(), "{field} has no candidates");
        }
    }

    #[test]
    fn norm_lowercases_before_filtering() {
        // KELVIN SIGN lowercases to an ASCII 'k'.
        assert_eq!(norm("\u{212A}ey"), "key");
    }

    #[test]
    fn normalized_tie_takes_rightmost_column() {
        let columns = ["View Date", "view_date", "Other"];
        assert_eq!(resolve(&columns, &["ViewDate"]), Some("view_date"));
    }

    #[test]
    fn side_sheet_candidates_resolve() {
        let counts = ["Video Title", "Total Views"];
        assert_eq!(resolve(&counts, COUNTS_VIDEO_NAME), Some("Video Title"));
        assert_eq!(resolve(&counts, COUNTS_VIEW_COUNT), Some("Total Views"));
        assert_eq!(resolve(&counts, COUNTS_VIDEO_ID), None);

        let meta = ["Video_Name", "Parent/Child", "Module"];
        assert_eq!(resolve(&meta, META_PARENT_OR_CHILD), Some("Parent/Child"));
        assert_eq!(resolve(&meta, META_CATEGORY), Some("Module"));
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(columns in proptest::collection::vec("[A-Za-z_ ]{0,12}", 0..8)) {
            let candidates = candidates_for(CanonicalField::DurationSeconds);
            let first = resolve(&columns, candidates);
            let second = resolve(&columns, candidates);
            prop_assert_eq!(first, second);
        }
    }
}
