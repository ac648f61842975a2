//! Source expansion and verbatim copies.
//!
//! A `files` element lists whitespace-separated shell patterns relative to
//! the source base (the source root or a mounted disc). Matches that are
//! directories are walked recursively. Without `keepdirs` every match
//! lands under the destination by its own name, so `data/maps` installs as
//! `<dest>/maps/...`; with `keepdirs` the path relative to the base is kept.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::codec::{CopyContext, FileWrite, write_file_record};
use crate::install::{FileRef, InstalledFile};
use crate::metadata;
use crate::stream::InputStream;
use crate::{Error, Result};

/// One concrete source found by pattern expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Source {
    /// Path on the install media.
    pub path: PathBuf,
    /// Destination path relative to the leaf's destination directory.
    pub rel: PathBuf,
    /// Directory entries are created, not copied.
    pub is_dir: bool,
}

/// Result of expanding a `files` element.
#[derive(Debug, Clone, Default)]
pub(crate) struct Expansion {
    pub sources: Vec<Source>,
    /// Patterns that matched nothing.
    pub missing: Vec<String>,
}

fn relative(path: &Path, root: Option<&Path>) -> PathBuf {
    root.and_then(|r| path.strip_prefix(r).ok())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))
        .unwrap_or_default()
}

/// Expands the patterns of a `files` element against `base`.
pub(crate) fn expand(base: &Path, patterns: &str, keepdirs: bool) -> Result<Expansion> {
    let mut expansion = Expansion::default();
    for token in patterns.split_whitespace() {
        let pattern = base.join(token).to_string_lossy().into_owned();
        let paths = glob::glob(&pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut matched = false;
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Unreadable match for '{}': {}", token, e);
                    continue;
                }
            };
            matched = true;
            let is_dir = fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir());
            if !is_dir {
                let rel = relative(&path, keepdirs.then_some(base));
                expansion.sources.push(Source {
                    path,
                    rel,
                    is_dir: false,
                });
                continue;
            }

            let root = if keepdirs { Some(base) } else { path.parent() };
            for item in WalkDir::new(&path).follow_links(false).sort_by_file_name() {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => {
                        log::warn!("Skipping unreadable '{}': {}", path.display(), e);
                        continue;
                    }
                };
                expansion.sources.push(Source {
                    rel: relative(item.path(), root),
                    is_dir: item.file_type().is_dir(),
                    path: item.into_path(),
                });
            }
        }
        if !matched {
            expansion.missing.push(token.to_string());
        }
    }
    Ok(expansion)
}

/// Size of a source on disk; symlinks count as zero.
pub(crate) fn disk_size(path: &Path) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

/// Copies one file byte for byte, or re-creates a symlink with its target
/// unchanged.
///
/// The written content is checked against the node's `md5sum` attribute.
pub(crate) fn copy_verbatim(
    ctx: &mut CopyContext<'_>,
    src: &Path,
    dest: &Path,
    mode: u32,
) -> Result<(u64, FileRef)> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src)?.to_string_lossy().into_owned();
        metadata::create_symlink(dest, &target)?;
        ctx.report(dest, 0, 0)?;
        let record = ctx.record(InstalledFile::symlink(dest, target));
        return Ok((0, record));
    }

    let mut stream = InputStream::open_raw(src)?;
    let mut file = FileWrite::exact(dest, meta.len()).mode(mode);
    if let Some(md5) = ctx.attr("md5sum") {
        file = file.expect_md5(md5);
    }
    write_file_record(ctx, &mut stream, file, "file", src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data/maps/empty")).unwrap();
        fs::write(dir.path().join("data/a.pak"), b"aaaa").unwrap();
        fs::write(dir.path().join("data/b.pak"), b"bb").unwrap();
        fs::write(dir.path().join("data/maps/m1.map"), b"m").unwrap();
        dir
    }

    #[test]
    fn test_glob_flattens_by_default() {
        let dir = tree();
        let found = expand(dir.path(), "data/*.pak", false).unwrap();
        let rels: Vec<_> = found.sources.iter().map(|s| s.rel.clone()).collect();
        assert_eq!(rels, vec![PathBuf::from("a.pak"), PathBuf::from("b.pak")]);
        assert!(found.missing.is_empty());
    }

    #[test]
    fn test_keepdirs() {
        let dir = tree();
        let found = expand(dir.path(), "data/a.pak", true).unwrap();
        assert_eq!(found.sources[0].rel, PathBuf::from("data/a.pak"));
    }

    #[test]
    fn test_directory_recursion_keeps_empty_dirs() {
        let dir = tree();
        let found = expand(dir.path(), "data/maps", false).unwrap();
        let rels: Vec<_> = found
            .sources
            .iter()
            .map(|s| (s.rel.to_string_lossy().into_owned(), s.is_dir))
            .collect();
        assert_eq!(
            rels,
            vec![
                ("maps".to_string(), true),
                ("maps/empty".to_string(), true),
                ("maps/m1.map".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_missing_pattern_is_reported() {
        let dir = tree();
        let found = expand(dir.path(), "nothing.txt data/b.pak", false).unwrap();
        assert_eq!(found.missing, vec!["nothing.txt".to_string()]);
        assert_eq!(found.sources.len(), 1);
    }

    #[test]
    fn test_bad_pattern() {
        let dir = tree();
        assert!(matches!(
            expand(dir.path(), "data/[", false),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_disk_size() {
        let dir = tree();
        assert_eq!(disk_size(&dir.path().join("data/a.pak")), 4);
        assert_eq!(disk_size(&dir.path().join("data")), 0);
        assert_eq!(disk_size(&dir.path().join("nope")), 0);
    }
}
