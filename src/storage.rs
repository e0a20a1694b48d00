//! Root-confined path resolution and directory enumeration.
//!
//! Every client-supplied path goes through [`Storage::resolve_dir`] or
//! [`Storage::resolve_file`] before touching the filesystem. Both reject
//! `..` components outright and then compare the canonicalized result against
//! the canonical root, so symlinks are only followed while their target stays
//! inside the served tree.

use chrono::{DateTime, Local};
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::debug;

/// Name prefix of in-flight upload files; never listed or addressable.
pub const STAGING_PREFIX: &str = ".axo-part-";

/// A normalized, slash-separated path relative to the root. Untrusted until
/// resolved by [`Storage`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelativePath(String);

impl RelativePath {
    /// Normalizes raw client input: backslashes become slashes, surrounding
    /// whitespace and leading slashes go away, repeated slashes collapse and
    /// `.` segments are dropped. `..` segments are kept so resolution can
    /// reject them.
    pub fn parse(raw: &str) -> Self {
        let replaced = raw.replace('\\', "/");
        let segments: Vec<&str> = replaced
            .trim()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        Self(segments.join("/"))
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Self {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Self(parent.to_string()),
            None => Self::root(),
        }
    }

    pub fn join(&self, name: &str) -> Self {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path verified to be the root or one of its descendants.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub relative: RelativePath,
    pub absolute: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates the root directory when missing and pins its canonical form.
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(io::Error::new(
                ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves a directory target. The empty path is the root itself and the
    /// target does not have to exist yet.
    pub async fn resolve_dir(&self, raw: &str) -> Result<ResolvedPath, StorageError> {
        self.resolve(RelativePath::parse(raw), true).await
    }

    /// Resolves an existing file target. The root is never a file, so the
    /// empty path is reported as not found.
    pub async fn resolve_file(&self, raw: &str) -> Result<ResolvedPath, StorageError> {
        let relative = RelativePath::parse(raw);
        if relative.is_root() {
            return Err(StorageError::NotFound);
        }
        self.resolve(relative, false).await
    }

    async fn resolve(
        &self,
        relative: RelativePath,
        allow_missing: bool,
    ) -> Result<ResolvedPath, StorageError> {
        let mut joined = self.root.clone();
        for component in Path::new(relative.as_str()).components() {
            match component {
                Component::Normal(segment)
                    if segment.to_string_lossy().starts_with(STAGING_PREFIX) =>
                {
                    debug!(path = relative.as_str(), "rejected staging file segment");
                    return Err(StorageError::InvalidPath);
                }
                Component::Normal(segment) => joined.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    debug!(path = relative.as_str(), "rejected path component");
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        let absolute = self.canonicalize(&joined, allow_missing).await?;
        if !absolute.starts_with(&self.root) {
            debug!(path = relative.as_str(), resolved = ?absolute, "path escapes root");
            return Err(StorageError::InvalidPath);
        }
        Ok(ResolvedPath { relative, absolute })
    }

    /// Canonicalizes `joined`. With `allow_missing`, the deepest existing
    /// ancestor is canonicalized instead and the missing tail re-appended; the
    /// tail holds only normal components at this point.
    async fn canonicalize(
        &self,
        joined: &Path,
        allow_missing: bool,
    ) -> Result<PathBuf, StorageError> {
        match fs::canonicalize(joined).await {
            Ok(path) => return Ok(path),
            Err(err) if is_missing(&err) && allow_missing => {}
            Err(err) if is_missing(&err) => return Err(StorageError::NotFound),
            Err(err) => return Err(StorageError::Io(err)),
        }

        let mut missing = Vec::new();
        let mut current = joined.to_path_buf();
        loop {
            // A dangling symlink is not "missing": creating through it would
            // write wherever it points.
            if fs::symlink_metadata(&current).await.is_ok() {
                return Err(StorageError::InvalidPath);
            }
            let Some(name) = current.file_name().map(|name| name.to_os_string()) else {
                return Err(StorageError::InvalidPath);
            };
            missing.push(name);
            if !current.pop() {
                return Err(StorageError::InvalidPath);
            }
            match fs::canonicalize(&current).await {
                Ok(existing) => {
                    if !fs::metadata(&existing).await?.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                    return Ok(missing
                        .iter()
                        .rev()
                        .fold(existing, |path, segment| path.join(segment)));
                }
                Err(err) if is_missing(&err) => continue,
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
    }

    /// Lists the immediate children of a resolved directory: directories
    /// first, then files, each group ordered by case-insensitive name.
    pub async fn list_dir(&self, target: &ResolvedPath) -> Result<Vec<FileEntry>, StorageError> {
        let metadata = match fs::metadata(&target.absolute).await {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err) => return Err(StorageError::NotFound),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if !metadata.is_dir() {
            return Err(StorageError::NotFound);
        }

        let mut dir = fs::read_dir(&target.absolute).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_symlink() && !self.link_stays_inside(&path).await {
                debug!(name, "skipping symlink leading outside root");
                continue;
            }
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(name, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else if metadata.is_file() {
                EntryKind::File {
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Local>::from),
                }
            } else {
                continue;
            };
            entries.push(FileEntry { name, kind });
        }

        entries.sort_by(compare_entries);
        Ok(entries)
    }

    async fn link_stays_inside(&self, link: &Path) -> bool {
        match fs::canonicalize(link).await {
            Ok(target) => target.starts_with(&self.root),
            Err(_) => false,
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn compare_entries(a: &FileEntry, b: &FileEntry) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    NotFound,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File {
        size: u64,
        modified: Option<DateTime<Local>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::{RelativePath, STAGING_PREFIX, Storage, StorageError};
    use tempfile::tempdir;

    async fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open(temp.path().join("root"))
            .await
            .expect("open storage");
        (temp, storage)
    }

    #[test]
    fn relative_path_normalizes_separators_and_whitespace() {
        let path = RelativePath::parse("  //music\\\\live//./set.wav ");
        assert_eq!(path.as_str(), "music/live/set.wav");
        assert_eq!(path.file_name(), Some("set.wav"));
        assert_eq!(path.parent().as_str(), "music/live");
        assert_eq!(RelativePath::parse("music").parent(), RelativePath::root());
        assert_eq!(RelativePath::root().join("a").join("b").as_str(), "a/b");
        assert!(RelativePath::parse(" / ").is_root());
    }

    #[tokio::test]
    async fn open_creates_missing_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("a").join("b");
        let storage = Storage::open(&root).await.expect("open storage");
        assert!(root.is_dir());
        assert_eq!(
            storage.root_path(),
            std::fs::canonicalize(&root).expect("canonicalize")
        );
    }

    #[tokio::test]
    async fn empty_path_resolves_to_root() {
        let (_temp, storage) = make_storage().await;
        let resolved = storage.resolve_dir("").await.expect("resolve root");
        assert_eq!(resolved.absolute, storage.root_path());
        assert!(resolved.relative.is_root());
    }

    #[tokio::test]
    async fn traversal_attempts_never_leave_root() {
        let (_temp, storage) = make_storage().await;
        std::fs::create_dir_all(storage.root_path().join("a")).expect("create dir");

        let attempts = [
            "..",
            "../..",
            "../../etc/passwd",
            "a/../..",
            "a/..",
            "..\\..\\secret.txt",
            "a\\..\\..\\secret.txt",
            "/../secret.txt",
            "/etc/passwd",
            "//a//..//..",
        ];
        for attempt in attempts {
            for result in [
                storage.resolve_dir(attempt).await,
                storage.resolve_file(attempt).await,
            ] {
                if let Ok(resolved) = result {
                    assert!(
                        resolved.absolute.starts_with(storage.root_path()),
                        "{attempt} escaped to {:?}",
                        resolved.absolute
                    );
                }
            }
        }

        assert!(matches!(
            storage.resolve_dir("../..").await,
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve_dir("a/..").await,
            Err(StorageError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn absolute_looking_path_is_relative_to_root() {
        let (_temp, storage) = make_storage().await;
        let resolved = storage.resolve_dir("/etc/passwd").await.expect("resolve");
        assert_eq!(resolved.absolute, storage.root_path().join("etc").join("passwd"));
    }

    #[tokio::test]
    async fn directory_mode_allows_missing_tail() {
        let (_temp, storage) = make_storage().await;
        let resolved = storage
            .resolve_dir("recordings/2024")
            .await
            .expect("resolve missing dir");
        assert_eq!(
            resolved.absolute,
            storage.root_path().join("recordings").join("2024")
        );
        assert_eq!(resolved.relative.as_str(), "recordings/2024");
    }

    #[tokio::test]
    async fn directory_mode_rejects_tail_below_a_file() {
        let (_temp, storage) = make_storage().await;
        std::fs::write(storage.root_path().join("notes.txt"), b"x").expect("write");
        let result = storage.resolve_dir("notes.txt/sub").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[tokio::test]
    async fn file_mode_requires_existing_non_root_target() {
        let (_temp, storage) = make_storage().await;
        assert!(matches!(
            storage.resolve_file("").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            storage.resolve_file("missing.txt").await,
            Err(StorageError::NotFound)
        ));

        std::fs::write(storage.root_path().join("song.wav"), b"RIFF").expect("write");
        let resolved = storage.resolve_file("song.wav").await.expect("resolve");
        assert_eq!(resolved.absolute, storage.root_path().join("song.wav"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage().await;
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("create outside");
        std::fs::write(outside.join("secret.txt"), b"secret").expect("write secret");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        assert!(matches!(
            storage.resolve_dir("link").await,
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve_file("link/secret.txt").await,
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve_dir("link/new").await,
            Err(StorageError::InvalidPath)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_inside_root_is_followed() {
        use std::os::unix::fs::symlink;

        let (_temp, storage) = make_storage().await;
        let real = storage.root_path().join("real");
        std::fs::create_dir_all(&real).expect("create dir");
        std::fs::write(real.join("a.txt"), b"a").expect("write");
        symlink(&real, storage.root_path().join("alias")).expect("symlink");

        let resolved = storage.resolve_file("alias/a.txt").await.expect("resolve");
        assert_eq!(resolved.absolute, real.join("a.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_is_not_treated_as_missing() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage().await;
        symlink(temp.path().join("nowhere"), storage.root_path().join("dangling"))
            .expect("symlink");
        assert!(matches!(
            storage.resolve_dir("dangling").await,
            Err(StorageError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn list_orders_directories_before_files() {
        let (_temp, storage) = make_storage().await;
        let root = storage.root_path();
        std::fs::create_dir_all(root.join("b")).expect("dir b");
        std::fs::create_dir_all(root.join("A")).expect("dir A");
        std::fs::write(root.join("c.txt"), b"ccc").expect("c");
        std::fs::write(root.join("B.txt"), b"bb").expect("B");
        std::fs::write(root.join("a.txt"), b"a").expect("a");

        let target = storage.resolve_dir("").await.expect("resolve");
        let entries = storage.list_dir(&target).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["A", "b", "a.txt", "B.txt", "c.txt"]);
        assert_eq!(entries.len(), std::fs::read_dir(root).expect("read").count());

        let sizes: Vec<Option<u64>> = entries
            .iter()
            .map(|entry| match entry.kind {
                super::EntryKind::File { size, .. } => Some(size),
                super::EntryKind::Directory => None,
            })
            .collect();
        assert_eq!(sizes, [None, None, Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn list_empty_root_is_empty() {
        let (_temp, storage) = make_storage().await;
        let target = storage.resolve_dir("").await.expect("resolve");
        let entries = storage.list_dir(&target).await.expect("list");
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn list_missing_or_file_target_is_not_found() {
        let (_temp, storage) = make_storage().await;
        std::fs::write(storage.root_path().join("file.txt"), b"x").expect("write");

        let missing = storage.resolve_dir("nope").await.expect("resolve");
        assert!(matches!(
            storage.list_dir(&missing).await,
            Err(StorageError::NotFound)
        ));
        let file = storage.resolve_dir("file.txt").await.expect("resolve");
        assert!(matches!(
            storage.list_dir(&file).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_hides_staging_files() {
        let (_temp, storage) = make_storage().await;
        let root = storage.root_path();
        std::fs::write(root.join(format!("{STAGING_PREFIX}1234")), b"x").expect("write");
        std::fs::write(root.join("visible.txt"), b"x").expect("write");

        let target = storage.resolve_dir("").await.expect("resolve");
        let entries = storage.list_dir(&target).await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "visible.txt");
    }

    #[tokio::test]
    async fn staging_files_cannot_be_addressed() {
        let (_temp, storage) = make_storage().await;
        let root = storage.root_path();
        std::fs::create_dir_all(root.join("inbox")).expect("create dir");
        std::fs::write(root.join("inbox").join(format!("{STAGING_PREFIX}1234")), b"x")
            .expect("write");

        let staged = format!("inbox/{STAGING_PREFIX}1234");
        assert!(matches!(
            storage.resolve_file(&staged).await,
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve_dir(&staged).await,
            Err(StorageError::InvalidPath)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_skips_symlinks_leading_outside() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage().await;
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside");
        symlink(&outside, storage.root_path().join("leak.txt")).expect("symlink");
        std::fs::write(storage.root_path().join("inside.txt"), b"x").expect("write");
        symlink(
            storage.root_path().join("inside.txt"),
            storage.root_path().join("alias.txt"),
        )
        .expect("symlink");

        let target = storage.resolve_dir("").await.expect("resolve");
        let entries = storage.list_dir(&target).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["alias.txt", "inside.txt"]);
    }
}
