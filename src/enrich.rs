use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{CanonicalRow, CanonicalTable, Cell, JoinStats, RawTable};
use crate::sanitize::sanitize_title;
use crate::schema::{
    resolve, COUNTS_VIDEO_ID, COUNTS_VIDEO_NAME, COUNTS_VIEW_COUNT, META_CATEGORY,
    META_PARENT_OR_CHILD, META_VIDEO_ID, META_VIDEO_NAME,
};

fn column(raw: &RawTable, candidates: &[&str]) -> Option<usize> {
    resolve(raw.columns(), candidates).and_then(|name| raw.column_index(name))
}

fn text_at(row: &[Cell], idx: Option<usize>) -> Option<String> {
    idx.and_then(|idx| row.get(idx)).and_then(Cell::trimmed_text)
}

fn title_at(row: &[Cell], idx: Option<usize>) -> Option<String> {
    text_at(row, idx).and_then(|raw| sanitize_title(&raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKey {
    VideoName,
    VideoId,
}

/// Catalogue view counts per video, keyed by cleaned title when the sheet
/// has any usable title and by video id otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoCounts {
    key: Option<JoinKey>,
    counts: HashMap<String, f64>,
}

impl VideoCounts {
    pub fn from_raw(raw: &RawTable) -> Self {
        let Some(count_col) = column(raw, COUNTS_VIEW_COUNT) else {
            warn!("counts sheet has no view count column");
            return Self::default();
        };
        let name_col = column(raw, COUNTS_VIDEO_NAME);
        let id_col = column(raw, COUNTS_VIDEO_ID);

        let names: Vec<Option<String>> = raw
            .rows()
            .iter()
            .map(|row| title_at(row, name_col))
            .collect();
        let key = if names.iter().any(Option::is_some) {
            JoinKey::VideoName
        } else if id_col.is_some() {
            JoinKey::VideoId
        } else {
            warn!("counts sheet has neither video names nor video ids");
            return Self::default();
        };

        let mut counts = HashMap::new();
        for (row, name) in raw.rows().iter().zip(names) {
            let id = match key {
                JoinKey::VideoName => name,
                JoinKey::VideoId => text_at(row, id_col),
            };
            let count = row.get(count_col).and_then(Cell::as_number);
            if let (Some(id), Some(count)) = (id, count) {
                counts.entry(id).or_insert(count);
            }
        }
        debug!(?key, videos = counts.len(), "loaded view counts");
        Self {
            key: Some(key),
            counts,
        }
    }

    pub fn lookup(&self, row: &CanonicalRow) -> Option<f64> {
        let id = match self.key? {
            JoinKey::VideoName => row.video_name.as_str(),
            JoinKey::VideoId => row.video_id.as_deref()?,
        };
        self.counts.get(id).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MetaEntry {
    video_id: Option<String>,
    parent_or_child: Option<String>,
    category: Option<String>,
}

/// Parent/child level and category per cleaned video title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    by_name: HashMap<String, Vec<MetaEntry>>,
}

impl VideoMetadata {
    pub fn from_raw(raw: &RawTable) -> Self {
        let name_col = column(raw, META_VIDEO_NAME);
        let level_col = column(raw, META_PARENT_OR_CHILD);
        let category_col = column(raw, META_CATEGORY);
        if name_col.is_none() || (level_col.is_none() && category_col.is_none()) {
            warn!("metadata sheet needs a video name and a category or parent/child column");
            return Self::default();
        }
        let id_col = column(raw, META_VIDEO_ID);

        let mut by_name: HashMap<String, Vec<MetaEntry>> = HashMap::new();
        for row in raw.rows() {
            let Some(name) = title_at(row, name_col) else {
                continue;
            };
            let entry = MetaEntry {
                video_id: text_at(row, id_col),
                parent_or_child: text_at(row, level_col),
                category: text_at(row, category_col),
            };
            if entry.parent_or_child.is_none() && entry.category.is_none() {
                continue;
            }
            let entries = by_name.entry(name).or_default();
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        debug!(videos = by_name.len(), "loaded video metadata");
        Self { by_name }
    }

    /// First entry for the row's title whose id does not contradict the
    /// row's id. A missing id on either side is no contradiction.
    fn lookup(&self, row: &CanonicalRow) -> Option<&MetaEntry> {
        self.by_name.get(&row.video_name)?.iter().find(|entry| {
            match (entry.video_id.as_deref(), row.video_id.as_deref()) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => true,
            }
        })
    }
}

/// Copies view counts and metadata onto matching rows. Rows without a match
/// keep `None`.
pub fn attach(
    table: &mut CanonicalTable,
    counts: Option<&VideoCounts>,
    metadata: Option<&VideoMetadata>,
) -> JoinStats {
    let mut stats = JoinStats::default();
    for row in table.iter_mut() {
        if let Some(count) = counts.and_then(|counts| counts.lookup(row)) {
            row.view_count = Some(count);
            stats.with_view_count += 1;
        }
        if let Some(entry) = metadata.and_then(|metadata| metadata.lookup(row)) {
            row.parent_or_child = entry.parent_or_child.clone();
            row.category = entry.category.clone();
            stats.with_metadata += 1;
        }
    }
    stats
}
