use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use flate2::read::GzDecoder;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{0} is neither a .tgz archive nor a directory")]
    NotAnArchive(PathBuf),
    #[error("no document {path} in {archive}")]
    NotFound { archive: String, path: String },
    #[error("malformed document uri {0}")]
    BadUri(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io { path: path.to_path_buf(), source }
}

/// Archive-relative document locator, written `archive!/path/in/archive.html`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocUri {
    pub archive: String,
    pub path: String,
}

impl DocUri {
    pub fn new(archive: impl Into<String>, path: impl Into<String>) -> Self {
        Self { archive: archive.into(), path: path.into() }
    }
}

impl fmt::Display for DocUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!/{}", self.archive, self.path)
    }
}

impl FromStr for DocUri {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("!/") {
            Some((archive, path)) if !archive.is_empty() && !path.is_empty() => Ok(DocUri::new(archive, path)),
            _ => Err(SourceError::BadUri(s.to_string())),
        }
    }
}

/// Narrow interface extraction and retrieval use to reach documents.
pub trait DocumentStore: Send + Sync {
    /// Markup of one document.
    fn read(&self, uri: &DocUri) -> Result<String, SourceError>;

    /// Resolve an `href` found in `relative_to` to an existing HTML document, if any.
    fn resolve(&self, href: &str, relative_to: &DocUri) -> Option<DocUri>;

    /// Hint that no more documents from `archive` are needed for now.
    fn release(&self, _archive: &str) {}
}

enum Backend {
    Tarball(HashMap<String, Vec<u8>>),
    Directory(PathBuf),
}

/// One opened documentation archive.
pub struct Docset {
    name: String,
    html_paths: Vec<String>,
    backend: Backend,
}

pub fn is_html(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

pub fn is_archive_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_ascii_lowercase();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

impl Docset {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SourceError::NotAnArchive(path.to_path_buf()))?
            .to_string();
        if path.is_dir() {
            Self::open_directory(name, path)
        } else if is_archive_file(path) {
            Self::open_tarball(name, path)
        } else {
            Err(SourceError::NotAnArchive(path.to_path_buf()))
        }
    }

    fn open_directory(name: String, root: &Path) -> Result<Self, SourceError> {
        let mut html_paths = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            if is_html(&rel) {
                html_paths.push(rel);
            }
        }
        html_paths.sort();
        Ok(Self { name, html_paths, backend: Backend::Directory(root.to_path_buf()) })
    }

    fn open_tarball(name: String, path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(io_err(path))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut entries = HashMap::new();
        for entry in archive.entries().map_err(io_err(path))? {
            let mut entry = entry.map_err(io_err(path))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let entry_path = entry.path().map_err(io_err(path))?.to_string_lossy().into_owned();
            let entry_path = entry_path.trim_start_matches("./").to_string();
            if !is_html(&entry_path) {
                continue;
            }
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(io_err(path))?;
            entries.insert(entry_path, bytes);
        }
        let mut html_paths: Vec<String> = entries.keys().cloned().collect();
        html_paths.sort();
        Ok(Self { name, html_paths, backend: Backend::Tarball(entries) })
    }

    pub fn name(&self) -> &str { &self.name }

    /// Every HTML entry, sorted.
    pub fn html_paths(&self) -> &[String] { &self.html_paths }

    pub fn uri(&self, path: &str) -> DocUri { DocUri::new(&self.name, path) }

    pub fn contains(&self, path: &str) -> bool {
        self.html_paths.binary_search_by(|p| p.as_str().cmp(path)).is_ok()
    }

    pub fn read(&self, path: &str) -> Result<String, SourceError> {
        let not_found = || SourceError::NotFound { archive: self.name.clone(), path: path.to_string() };
        match &self.backend {
            Backend::Tarball(entries) => {
                entries.get(path).map(|b| String::from_utf8_lossy(b).into_owned()).ok_or_else(not_found)
            }
            Backend::Directory(root) => {
                if !self.contains(path) {
                    return Err(not_found());
                }
                let full = root.join(path);
                let bytes = fs::read(&full).map_err(io_err(&full))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }

    /// Resolve `href` against the directory holding `relative_to`. Only existing HTML entries resolve.
    pub fn resolve(&self, href: &str, relative_to: &str) -> Option<String> {
        let target = resolve_path(href, relative_to)?;
        if self.contains(&target) { Some(target) } else { None }
    }
}

/// Path arithmetic behind [`Docset::resolve`], without the existence check.
pub fn resolve_path(href: &str, relative_to: &str) -> Option<String> {
    let href = href.trim();
    let href = href.split('#').next().unwrap_or_default();
    let href = href.split('?').next().unwrap_or_default();
    if has_scheme(href) || href.starts_with('/') {
        return None;
    }
    if href.is_empty() {
        return Some(relative_to.to_string());
    }
    let decoded = urlencoding::decode(href).ok()?;

    let mut parts: Vec<&str> = relative_to.split('/').collect();
    parts.pop();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(seg) => parts.push(seg.to_str()?),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    let joined = parts.join("/");
    // A trailing slash after decoding means a directory, never a document.
    if joined.is_empty() || decoded.ends_with('/') { None } else { Some(joined) }
}

fn has_scheme(href: &str) -> bool {
    match href.find(':') {
        Some(colon) => !href[..colon].contains('/'),
        None => false,
    }
}

/// The archive root: lists docsets and keeps the ones currently in use open.
pub struct Library {
    root: PathBuf,
    open: DashMap<String, Arc<Docset>>,
}

impl Library {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf(), open: DashMap::new() }
    }

    /// Tarballs and unpacked docset directories directly under the root, sorted.
    pub fn list_archives(&self) -> Result<Vec<PathBuf>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::NotAnArchive(self.root.clone()));
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if entry.file_type().is_dir() || (entry.file_type().is_file() && is_archive_file(p)) {
                out.push(p.to_path_buf());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Open (or reuse) the docset called `name`.
    pub fn open(&self, name: &str) -> Result<Arc<Docset>, SourceError> {
        if let Some(docset) = self.open.get(name) {
            return Ok(docset.clone());
        }
        let docset = Arc::new(Docset::open(&self.root.join(name))?);
        Ok(self.open.entry(name.to_string()).or_insert(docset).clone())
    }

    /// Drop a docset once its unit of work is done.
    pub fn release(&self, name: &str) {
        self.open.remove(name);
    }
}

impl DocumentStore for Library {
    fn read(&self, uri: &DocUri) -> Result<String, SourceError> {
        self.open(&uri.archive)?.read(&uri.path)
    }

    fn resolve(&self, href: &str, relative_to: &DocUri) -> Option<DocUri> {
        let docset = self.open(&relative_to.archive).ok()?;
        docset.resolve(href, &relative_to.path).map(|p| docset.uri(&p))
    }

    fn release(&self, archive: &str) {
        Library::release(self, archive);
    }
}
