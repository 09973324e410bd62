use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::enrich::{self, VideoCounts, VideoMetadata};
use crate::models::Dataset;
use crate::normalize::{build_dataset, NormalizeOptions};
use crate::source::{parse_raw_table, read_source, LoadError, Sources};

struct CacheEntry {
    digest: [u8; 32],
    options: NormalizeOptions,
    dataset: Arc<Dataset>,
}

/// Memoizes the load step per set of source paths. An entry is reused only
/// while every file's content and the normalization options stay the same.
#[derive(Default)]
pub struct PipelineCache {
    entries: HashMap<Sources, CacheEntry>,
}

fn read_optional(path: Option<&Path>) -> Result<Option<(&Path, Vec<u8>)>, LoadError> {
    path.map(|path| read_source(path).map(|bytes| (path, bytes)))
        .transpose()
}

// Presence and length prefixes keep distinct file sets from hashing alike.
fn digest_inputs<'a>(inputs: impl IntoIterator<Item = Option<&'a [u8]>>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for input in inputs {
        match input {
            Some(bytes) => {
                hasher.update([1u8]);
                hasher.update((bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            None => hasher.update([0u8]),
        }
    }
    hasher.finalize().into()
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &mut self,
        sources: &Sources,
        options: NormalizeOptions,
    ) -> Result<Arc<Dataset>, LoadError> {
        let watch = read_source(&sources.watch)?;
        let counts = read_optional(sources.counts.as_deref())?;
        let metadata = read_optional(sources.metadata.as_deref())?;
        let digest = digest_inputs([
            Some(watch.as_slice()),
            counts.as_ref().map(|(_, bytes)| bytes.as_slice()),
            metadata.as_ref().map(|(_, bytes)| bytes.as_slice()),
        ]);

        if let Some(entry) = self.entries.get(sources) {
            if entry.digest == digest && entry.options == options {
                debug!(path = %sources.watch.display(), "reusing cached dataset");
                return Ok(Arc::clone(&entry.dataset));
            }
        }

        let raw = parse_raw_table(&sources.watch, watch)?;
        let mut dataset = build_dataset(&raw, options);
        let counts = counts
            .map(|(path, bytes)| parse_raw_table(path, bytes).map(|raw| VideoCounts::from_raw(&raw)))
            .transpose()?;
        let metadata = metadata
            .map(|(path, bytes)| parse_raw_table(path, bytes).map(|raw| VideoMetadata::from_raw(&raw)))
            .transpose()?;
        if counts.is_some() || metadata.is_some() {
            dataset.joins = enrich::attach(&mut dataset.table, counts.as_ref(), metadata.as_ref());
            info!(
                with_view_count = dataset.joins.with_view_count,
                with_metadata = dataset.joins.with_metadata,
                "joined side sheets"
            );
        }

        let dataset = Arc::new(dataset);
        self.entries.insert(
            sources.clone(),
            CacheEntry {
                digest,
                options,
                dataset: Arc::clone(&dataset),
            },
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::UnknownCompletion;
    use std::path::PathBuf;

    const VIEWS: &str = "Video_Name,View_Date,View_Time,Duration,Done\n\
                         Intro to Biology,2024-01-05,14:30:00,600,Yes\n";

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("write source");
        path
    }

    fn watch_only(path: PathBuf) -> Sources {
        Sources {
            watch: path,
            counts: None,
            metadata: None,
        }
    }

    #[test]
    fn same_content_reuses_dataset() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = watch_only(write(&dir, "views.csv", VIEWS));
        let mut cache = PipelineCache::new();

        let first = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        let second = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table.len(), 1);
    }

    #[test]
    fn changed_content_rebuilds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = watch_only(write(&dir, "views.csv", VIEWS));
        let mut cache = PipelineCache::new();
        let first = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();

        write(
            &dir,
            "views.csv",
            &format!("{VIEWS}Chemistry 101,2024-02-01,09:00:00,300,No\n"),
        );
        let second = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.table.len(), 2);
    }

    #[test]
    fn changed_options_rebuild() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = watch_only(write(&dir, "views.csv", VIEWS));
        let mut cache = PipelineCache::new();
        let first = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        let options = NormalizeOptions {
            unknown_completion: UnknownCompletion::AssumeNotDone,
        };
        let second = cache.get_or_load(&sources, options).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unreadable_source_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut cache = PipelineCache::new();
        let sources = watch_only(dir.path().join("missing.csv"));
        let result = cache.get_or_load(&sources, NormalizeOptions::default());
        assert!(matches!(result, Err(LoadError::Read { .. })));
    }

    #[test]
    fn side_sheets_are_joined_and_tracked() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = Sources {
            watch: write(&dir, "views.csv", VIEWS),
            counts: Some(write(&dir, "counts.csv", "Video_Name,Views\nIntro to Biology,250\n")),
            metadata: Some(write(
                &dir,
                "meta.csv",
                "Video_Name,Parent/Child,Category\nIntro to Biology,Parent,Life Science\n",
            )),
        };
        let mut cache = PipelineCache::new();
        let first = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        let row = &first.table.rows()[0];
        assert_eq!(row.view_count, Some(250.0));
        assert_eq!(row.category.as_deref(), Some("Life Science"));
        assert_eq!(row.parent_or_child.as_deref(), Some("Parent"));
        assert_eq!(first.joins.with_metadata, 1);

        write(&dir, "counts.csv", "Video_Name,Views\nIntro to Biology,300\n");
        let second = cache.get_or_load(&sources, NormalizeOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.table.rows()[0].view_count, Some(300.0));
    }

    #[test]
    fn missing_side_sheet_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = Sources {
            watch: write(&dir, "views.csv", VIEWS),
            counts: Some(dir.path().join("missing.csv")),
            metadata: None,
        };
        let mut cache = PipelineCache::new();
        let result = cache.get_or_load(&sources, NormalizeOptions::default());
        assert!(matches!(result, Err(LoadError::Read { .. })));
    }
}
