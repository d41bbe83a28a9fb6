use crate::index::{InvertedIndex, PhraseCounts};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const INDEX_KEYWORD: &str = "_index_";
pub const PHRASES_KEYWORD: &str = "_phrases_";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub phrases: usize,
    pub memberships: usize,
    pub counters: usize,
    pub documents: usize,
    pub created_at: String,
    pub version: u32,
}

/// File names of one snapshot: `{stem}_index_{millis}.idx`, `{stem}_phrases_{millis}.idx`, `{stem}_meta_{millis}.json`.
pub struct SnapshotPaths {
    pub root: PathBuf,
    stem: String,
    stamp: String,
}

impl SnapshotPaths {
    pub fn new<P: AsRef<Path>>(root: P, stem: &str, millis: u128) -> Self {
        Self { root: root.as_ref().to_path_buf(), stem: stem.to_string(), stamp: format!("{millis:013}") }
    }

    /// Stamped with the current time.
    pub fn now<P: AsRef<Path>>(root: P, stem: &str) -> Self {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self::new(root, stem, millis.max(0) as u128)
    }

    pub fn index(&self) -> PathBuf { self.root.join(format!("{}{INDEX_KEYWORD}{}.idx", self.stem, self.stamp)) }
    pub fn phrases(&self) -> PathBuf { self.root.join(format!("{}{PHRASES_KEYWORD}{}.idx", self.stem, self.stamp)) }
    pub fn meta(&self) -> PathBuf { self.root.join(format!("{}_meta_{}.json", self.stem, self.stamp)) }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let bytes = bincode::serialize(value)?;
    f.write_all(&bytes)?;
    Ok(())
}

fn read_bincode<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

pub fn save_index(paths: &SnapshotPaths, index: &InvertedIndex) -> Result<PathBuf> {
    create_dir_all(&paths.root)?;
    let path = paths.index();
    write_bincode(&path, index)?;
    Ok(path)
}

pub fn load_index(path: &Path) -> Result<InvertedIndex> { read_bincode(path) }

pub fn save_phrase_counts(paths: &SnapshotPaths, counts: &PhraseCounts) -> Result<PathBuf> {
    create_dir_all(&paths.root)?;
    let path = paths.phrases();
    write_bincode(&path, counts)?;
    Ok(path)
}

pub fn load_phrase_counts(path: &Path) -> Result<PhraseCounts> { read_bincode(path) }

pub fn save_meta(paths: &SnapshotPaths, meta: &MetaFile) -> Result<PathBuf> {
    create_dir_all(&paths.root)?;
    let path = paths.meta();
    let mut f = File::create(&path)?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(path)
}

pub fn meta_for(index: &InvertedIndex, counts: &PhraseCounts, documents: usize) -> MetaFile {
    MetaFile {
        phrases: index.len(),
        memberships: index.entries(),
        counters: counts.len(),
        documents,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    }
}

/// The lexicographically last `.idx` file in `dir` whose name contains `keyword`.
pub fn latest(dir: &Path, keyword: &str) -> Result<PathBuf> {
    let mut names: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("idx"))
        .filter(|p| p.file_name().and_then(|s| s.to_str()).map_or(false, |n| n.contains(keyword)))
        .collect();
    names.sort();
    names.pop().ok_or_else(|| anyhow!("no {keyword} snapshot in {}", dir.display()))
}

/// Load the newest index and phrase-count snapshots found in `dir`.
pub fn load_latest(dir: &Path) -> Result<(InvertedIndex, PhraseCounts)> {
    let index_path = latest(dir, INDEX_KEYWORD)?;
    let phrases_path = latest(dir, PHRASES_KEYWORD)?;
    let index = load_index(&index_path)?;
    let counts = load_phrase_counts(&phrases_path)?;
    tracing::info!(index = %index_path.display(), phrases = %phrases_path.display(), "snapshot loaded");
    Ok((index, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;

    #[test]
    fn snapshot_round_trip_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let b = IndexBuilder::new(vec!["widget".to_string()], 4);
        b.index_text("a.tgz!/x.html", "widget widget gadget");
        let (index, counts) = b.finish();

        let old = SnapshotPaths::new(dir.path(), "links", 1_000);
        save_index(&old, &InvertedIndex::new()).unwrap();
        save_phrase_counts(&old, &PhraseCounts::new()).unwrap();
        let new = SnapshotPaths::new(dir.path(), "links", 2_000);
        save_index(&new, &index).unwrap();
        save_phrase_counts(&new, &counts).unwrap();
        let meta_path = save_meta(&new, &meta_for(&index, &counts, 1)).unwrap();

        assert_eq!(latest(dir.path(), INDEX_KEYWORD).unwrap(), new.index());
        let (index2, counts2) = load_latest(dir.path()).unwrap();
        assert_eq!(index2, index);
        assert_eq!(counts2.get("widget", "a.tgz!/x.html"), 2);
        let meta: MetaFile = serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta.phrases, index.len());
    }

    #[test]
    fn latest_without_snapshots_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest(dir.path(), INDEX_KEYWORD).is_err());
    }
}
