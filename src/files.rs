//! Scanning the source tree and planning the work.
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashSet},
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{error::OutsideSourceRootSnafu, Result};

pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mpg", "thm", "mts", "vob", "webm", "mod", "gif",
];

pub const DEFAULT_IGNORED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "rar", "txt", "rtf", "mp3", "doc", "xcf", "odt",
];

/// A convenience function to get the file name from a path as a string.
pub fn get_filename<P: AsRef<Path>>(path: &P) -> String {
    path.as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Everything after the last `.` of the file name, lowercased. A name without a dot is its own
/// extension, and a dotfile like `.MP4` has extension `mp4`.
pub fn lowercase_extension<P: AsRef<Path>>(path: &P) -> String {
    let name = get_filename(path);
    name.rsplit('.').next().unwrap_or_default().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Gets converted.
    Video,
    /// Known not to be a video; skipped silently.
    Ignored,
    /// Neither; reported to the operator once.
    Unknown,
}

/// Sorts files into [`FileKind`]s by extension alone. An extension on both lists counts as video.
#[derive(Debug, Clone)]
pub struct Classifier {
    video: HashSet<String>,
    ignored: HashSet<String>,
}

impl Classifier {
    pub fn new<V, I, S, T>(video: V, ignored: I) -> Self
    where
        V: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            video: video.into_iter().map(|e| e.as_ref().to_lowercase()).collect(),
            ignored: ignored
                .into_iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn classify_extension(&self, extension: &str) -> FileKind {
        let extension = extension.to_lowercase();
        if self.video.contains(&extension) {
            FileKind::Video
        } else if self.ignored.contains(&extension) {
            FileKind::Ignored
        } else {
            FileKind::Unknown
        }
    }

    pub fn classify<P: AsRef<Path>>(&self, path: &P) -> FileKind {
        self.classify_extension(&lowercase_extension(path))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_VIDEO_EXTENSIONS, DEFAULT_IGNORED_EXTENSIONS)
    }
}

/// One source file and where its converted copy goes. Ordered by the raw path strings, source
/// first, so `a b/c.mp4` < `a-b.mp4` < `a/b.mp4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    source_path: PathBuf,
    destination_path: PathBuf,
}

impl WorkItem {
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(source_path: S, destination_path: D) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn destination_path(&self) -> &Path {
        &self.destination_path
    }

    fn sort_key(&self) -> (&OsStr, &OsStr) {
        (
            self.source_path.as_os_str(),
            self.destination_path.as_os_str(),
        )
    }
}

impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The result of a scan: the sorted pending work plus what the operator should hear about.
#[derive(Debug, Default)]
pub struct Plan {
    items: Vec<WorkItem>,
    unknown_extensions: BTreeSet<String>,
    videos_found: usize,
}

impl Plan {
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unknown_extensions(&self) -> &BTreeSet<String> {
        &self.unknown_extensions
    }

    /// Every video in the source tree, including those already converted.
    pub fn videos_found(&self) -> usize {
        self.videos_found
    }
}

/// Re-roots `path` from `source_root` under `dest_root`, keeping the relative layout and file name.
pub fn destination_for(source_root: &Path, dest_root: &Path, path: &Path) -> Result<PathBuf> {
    let relative = path
        .strip_prefix(source_root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .ok_or_else(|| OutsideSourceRootSnafu { path }.build())?;
    Ok(dest_root.join(relative))
}

fn is_dest_root(path: &Path, dest_root: Option<&Path>) -> bool {
    match dest_root {
        Some(dest_root) => fs::canonicalize(path)
            .map(|p| p == dest_root)
            .unwrap_or(false),
        None => false,
    }
}

/// Walks `source_root` and returns every video whose converted copy doesn't exist yet under
/// `dest_root`, sorted. Missing destination directories are created along the way.
pub fn build_plan(source_root: &Path, dest_root: &Path, classifier: &Classifier) -> Result<Plan> {
    let canonical_dest = fs::canonicalize(dest_root).ok();
    let mut plan = Plan::default();
    let walker = WalkDir::new(source_root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && is_dest_root(entry.path(), canonical_dest.as_deref()))
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match classifier.classify(&path) {
            FileKind::Video => {}
            FileKind::Ignored => continue,
            FileKind::Unknown => {
                plan.unknown_extensions.insert(lowercase_extension(&path));
                continue;
            }
        }
        plan.videos_found += 1;
        let destination = destination_for(source_root, dest_root, path)?;
        if destination.exists() {
            log::debug!("Already converted: {}", destination.display());
            continue;
        }
        if let Some(dir) = destination.parent() {
            if !dir.exists() {
                log::info!("Create dir: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        plan.items.push(WorkItem::new(path, destination));
    }
    plan.items.sort();
    Ok(plan)
}
