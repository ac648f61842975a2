//! RAR codec.
//!
//! RAR is decoded by a third-party backend behind the [`RarBackend`]
//! trait. The backend lists entries and streams one entry at a time; the
//! codec decides per entry whether to create a directory, a link or a file.
//!
//! Requests the backend cannot satisfy on its own (a password, another
//! volume of a split archive) arrive as [`RarEvent`]s. The codec's handler
//! always answers [`RarAnswer::Abort`]: there is no interactive recovery at
//! this layer, so encrypted and incomplete multi-volume archives fail
//! closed.
//!
//! [`UnrarCommand`] is the default backend and drives the `unrar` tool.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use super::{Codec, CodecInfo, CopyContext, FileWrite, verify_source_md5, write_file, write_symlink};
use crate::install::InstalledFile;
use crate::metadata;
use crate::safety::{ResourceLimits, resolve_entry_path};
use crate::{Error, Result};

const FORMAT: &str = "rar";

const INFO: CodecInfo = CodecInfo {
    name: "rar",
    version: "1.0",
    author: "installkit",
    suffixes: &[".rar"],
};

/// unrar exit status for a missing or wrong password.
const UNRAR_BAD_PASSWORD: i32 = 11;

/// Kind of a RAR entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RarEntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link with its stored target.
    Symlink {
        /// Link target.
        target: String,
    },
    /// Hard links, junctions and file references, which are not extracted.
    Unsupported {
        /// Type reported by the backend.
        kind: String,
    },
}

/// One entry of a RAR archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarEntry {
    /// Path inside the archive.
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
    /// Entry kind.
    pub kind: RarEntryKind,
    /// Unix permission bits, if recorded.
    pub mode: Option<u32>,
    /// Whether the entry's data is encrypted.
    pub encrypted: bool,
}

/// A request raised by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RarEvent {
    /// Data or headers are encrypted.
    NeedPassword {
        /// The entry, if the request is for a single entry.
        entry: Option<String>,
    },
    /// The next volume of a split archive is needed.
    ChangeVolume {
        /// Volume name reported by the backend.
        volume: String,
    },
}

impl RarEvent {
    /// Converts an unanswered request into an error.
    pub fn into_error(self, archive: &Path) -> Error {
        match self {
            RarEvent::NeedPassword { .. } => Error::PasswordRequired {
                archive: archive.display().to_string(),
            },
            RarEvent::ChangeVolume { volume } => Error::VolumeRequired { volume },
        }
    }
}

/// Answer to a [`RarEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarAnswer {
    /// Stop extracting the archive.
    Abort,
    /// Skip the entry the request was about.
    Skip,
}

/// Event callback passed to a backend.
pub type RarEventHandler<'a> = dyn FnMut(&RarEvent) -> RarAnswer + 'a;

/// A RAR extraction backend.
pub trait RarBackend {
    /// Whether the backend can run at all.
    fn available(&self) -> bool {
        true
    }

    /// Lists the archive's entries.
    fn list(&self, archive: &Path, events: &mut RarEventHandler<'_>) -> Result<Vec<RarEntry>>;

    /// Opens a reader over one entry's data.
    ///
    /// Failures detected while streaming travel inside [`io::Error`] as an
    /// [`Error`].
    fn open(&self, archive: &Path, entry: &RarEntry) -> Result<Box<dyn Read>>;
}

/// Answers every request with [`RarAnswer::Abort`].
fn fail_closed(event: &RarEvent) -> RarAnswer {
    log::error!("RAR extraction needs interaction ({:?}), aborting", event);
    RarAnswer::Abort
}

/// Parses the technical listing printed by `unrar vt`.
pub(crate) fn parse_listing(text: &str) -> Vec<RarEntry> {
    struct Pending {
        name: String,
        kind: String,
        size: u64,
        mode: Option<u32>,
        target: Option<String>,
        encrypted: bool,
    }

    fn finish(pending: Pending) -> RarEntry {
        let lower = pending.kind.to_ascii_lowercase();
        let kind = if lower.is_empty() || lower == "file" {
            RarEntryKind::File
        } else if lower == "directory" {
            RarEntryKind::Directory
        } else if lower.contains("symbolic link") && pending.target.is_some() {
            RarEntryKind::Symlink {
                target: pending.target.unwrap_or_default(),
            }
        } else {
            RarEntryKind::Unsupported { kind: pending.kind }
        };
        RarEntry {
            name: pending.name,
            size: pending.size,
            kind,
            mode: pending.mode,
            encrypted: pending.encrypted,
        }
    }

    let mut entries = Vec::new();
    let mut pending: Option<Pending> = None;
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key == "Name" {
            if let Some(done) = pending.take() {
                entries.push(finish(done));
            }
            pending = Some(Pending {
                name: value.to_string(),
                kind: String::new(),
                size: 0,
                mode: None,
                target: None,
                encrypted: false,
            });
            continue;
        }
        let Some(entry) = pending.as_mut() else {
            continue;
        };
        match key {
            "Type" => entry.kind = value.to_string(),
            "Size" => entry.size = value.parse().unwrap_or(0),
            "Attributes" => entry.mode = parse_unix_attributes(value),
            "Target" => entry.target = Some(value.to_string()),
            "Flags" => entry.encrypted = value.contains("encrypted"),
            _ => {}
        }
    }
    if let Some(done) = pending {
        entries.push(finish(done));
    }
    entries
}

/// Parses an `ls -l` style attribute string such as `-rwxr-xr-x`.
fn parse_unix_attributes(value: &str) -> Option<u32> {
    let bits = value.as_bytes();
    if bits.len() != 10 {
        return None;
    }
    let mut mode = 0u32;
    for (i, &b) in bits[1..].iter().enumerate() {
        let expected = b"rwxrwxrwx"[i];
        match b {
            b'-' => {}
            _ if b == expected => mode |= 1 << (8 - i),
            b's' | b'S' | b't' | b'T' if i % 3 == 2 => {
                if b.is_ascii_lowercase() {
                    mode |= 1 << (8 - i);
                }
                mode |= match i {
                    2 => 0o4000,
                    5 => 0o2000,
                    _ => 0o1000,
                };
            }
            _ => return None,
        }
    }
    Some(mode)
}

/// Finds a missing-volume report in unrar's diagnostics.
fn missing_volume(stderr: &str) -> Option<String> {
    stderr.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Cannot find volume")?;
        Some(rest.trim().to_string())
    })
}

/// Backend that drives the `unrar` command-line tool.
///
/// Passwords are disabled with `-p-`, so the tool never prompts.
#[derive(Debug, Clone)]
pub struct UnrarCommand {
    program: OsString,
}

impl Default for UnrarCommand {
    fn default() -> Self {
        Self::new("unrar")
    }
}

impl UnrarCommand {
    /// Uses the given program name or path.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|_| Error::MissingBinary {
            name: self.program.to_string_lossy().into_owned(),
            searched: std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        })
    }
}

impl RarBackend for UnrarCommand {
    fn available(&self) -> bool {
        self.resolve().is_ok()
    }

    fn list(&self, archive: &Path, events: &mut RarEventHandler<'_>) -> Result<Vec<RarEntry>> {
        let program = self.resolve()?;
        let output = Command::new(&program)
            .args(["vt", "-p-", "-y"])
            .arg(archive)
            .stdin(Stdio::null())
            .output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let event = if output.status.code() == Some(UNRAR_BAD_PASSWORD) {
                RarEvent::NeedPassword { entry: None }
            } else if let Some(volume) = missing_volume(&stderr) {
                RarEvent::ChangeVolume { volume }
            } else {
                return Err(Error::InvalidFormat {
                    format: FORMAT,
                    reason: format!("unrar exited with {}: {}", output.status, stderr.trim()),
                });
            };
            // A listing cannot be skipped, so any answer stops here.
            let _ = events(&event);
            return Err(event.into_error(archive));
        }
        if let Some(volume) = missing_volume(&stderr) {
            let event = RarEvent::ChangeVolume { volume };
            let _ = events(&event);
            return Err(event.into_error(archive));
        }
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn open(&self, archive: &Path, entry: &RarEntry) -> Result<Box<dyn Read>> {
        let program = self.resolve()?;
        let mut child = Command::new(&program)
            .args(["p", "-inul", "-p-", "-y", "--"])
            .arg(archive)
            .arg(&entry.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io(io::Error::other("unrar stdout was not captured"))
        })?;
        Ok(Box::new(ChildReader {
            child,
            stdout,
            archive: archive.to_path_buf(),
            done: false,
        }))
    }
}

/// Streams a child's stdout and checks its exit status at end of stream.
struct ChildReader {
    child: Child,
    stdout: ChildStdout,
    archive: PathBuf,
    done: bool,
}

impl Read for ChildReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.done {
            self.done = true;
            let status = self.child.wait()?;
            if !status.success() {
                let err = if status.code() == Some(UNRAR_BAD_PASSWORD) {
                    Error::PasswordRequired {
                        archive: self.archive.display().to_string(),
                    }
                } else {
                    Error::InvalidFormat {
                        format: FORMAT,
                        reason: format!("unrar exited with {}", status),
                    }
                };
                return Err(io::Error::other(err));
            }
        }
        Ok(n)
    }
}

impl Drop for ChildReader {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// RAR archive codec.
pub struct RarCodec {
    limits: ResourceLimits,
    backend: Box<dyn RarBackend>,
}

impl std::fmt::Debug for RarCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RarCodec")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RarCodec {
    /// Creates the codec with the `unrar` backend.
    pub fn new(limits: ResourceLimits) -> Self {
        Self::with_backend(limits, Box::new(UnrarCommand::default()))
    }

    /// Creates the codec with a custom backend.
    pub fn with_backend(limits: ResourceLimits, backend: Box<dyn RarBackend>) -> Self {
        Self { limits, backend }
    }

    fn entries(&self, archive: &Path) -> Result<Vec<RarEntry>> {
        let entries = self.backend.list(archive, &mut fail_closed)?;
        self.limits.check_entries(entries.len() as u64)?;
        for entry in &entries {
            self.limits.check_name_len(entry.name.len() as u64)?;
            self.limits.check_entry_size("entry size", entry.size)?;
        }
        Ok(entries)
    }
}

impl Codec for RarCodec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn init(&mut self) -> bool {
        self.backend.available()
    }

    fn size(&self, path: &Path) -> Result<u64> {
        Ok(self
            .entries(path)?
            .iter()
            .filter(|e| e.kind == RarEntryKind::File)
            .map(|e| e.size)
            .fold(0u64, u64::saturating_add))
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let mut written = 0u64;
        let handler = fail_closed;

        for entry in self.entries(path)? {
            ctx.check_cancel()?;
            let out = resolve_entry_path(dest, &entry.name)?;
            match &entry.kind {
                RarEntryKind::Directory => {
                    metadata::create_dir(&out, entry.mode)?;
                    ctx.record(InstalledFile::directory(&out));
                }
                RarEntryKind::Symlink { target } => {
                    self.limits.check_symlink_len(target.len() as u64)?;
                    write_symlink(ctx, &out, &entry.name, target)?;
                }
                RarEntryKind::Unsupported { kind } => {
                    ctx.warn(&format!("Skipping '{}' of type '{}'", entry.name, kind));
                }
                RarEntryKind::File => {
                    if entry.encrypted {
                        let event = RarEvent::NeedPassword {
                            entry: Some(entry.name.clone()),
                        };
                        match handler(&event) {
                            RarAnswer::Skip => {
                                ctx.warn(&format!("Skipping encrypted entry '{}'", entry.name));
                                continue;
                            }
                            RarAnswer::Abort => return Err(event.into_error(path)),
                        }
                    }
                    let mut reader = self.backend.open(path, &entry)?;
                    let mut file = FileWrite::exact(&out, entry.size);
                    if let Some(mode) = entry.mode {
                        file = file.mode(mode);
                    }
                    written += write_file(ctx, &mut reader, file, FORMAT, path)?;
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "
UNRAR 6.24 freeware      Copyright (c) 1993-2023 Alexander Roshal

Archive: data.rar
Details: RAR 5

        Name: docs
        Type: Directory
  Attributes: drwxr-xr-x

        Name: docs/readme.txt
        Type: File
        Size: 12
 Packed size: 12
  Attributes: -rw-r--r--

        Name: bin/tool
        Type: File
        Size: 4
  Attributes: -rwsr-xr-x
       Flags: encrypted

        Name: current
        Type: Unix symbolic link
      Target: docs

        Name: docs/copy.txt
        Type: Hard link
      Target: docs/readme.txt
";

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing(LISTING);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].kind, RarEntryKind::Directory);
        assert_eq!(entries[0].mode, Some(0o755));
        assert_eq!(entries[1].name, "docs/readme.txt");
        assert_eq!(entries[1].size, 12);
        assert_eq!(entries[1].mode, Some(0o644));
        assert!(!entries[1].encrypted);
        assert_eq!(entries[2].mode, Some(0o4755));
        assert!(entries[2].encrypted);
        assert_eq!(
            entries[3].kind,
            RarEntryKind::Symlink {
                target: "docs".into()
            }
        );
        assert_eq!(
            entries[4].kind,
            RarEntryKind::Unsupported {
                kind: "Hard link".into()
            }
        );
    }

    #[test]
    fn test_unix_attributes() {
        assert_eq!(parse_unix_attributes("-rwxrwxrwt"), Some(0o1777));
        assert_eq!(parse_unix_attributes("-rw-r-S---"), Some(0o2640));
        assert_eq!(parse_unix_attributes("..A...."), None);
        assert_eq!(parse_unix_attributes("-rwxq-xr-x"), None);
    }

    #[test]
    fn test_missing_volume() {
        assert_eq!(
            missing_volume("\nCannot find volume data.part2.rar\n").as_deref(),
            Some("data.part2.rar")
        );
        assert_eq!(missing_volume("All OK"), None);
    }

    #[test]
    fn test_events_fail_closed() {
        let event = RarEvent::ChangeVolume {
            volume: "b.r00".into(),
        };
        assert_eq!(fail_closed(&event), RarAnswer::Abort);
        assert!(matches!(
            event.into_error(Path::new("a.rar")),
            Error::VolumeRequired { .. }
        ));
        assert!(matches!(
            RarEvent::NeedPassword { entry: None }.into_error(Path::new("a.rar")),
            Error::PasswordRequired { .. }
        ));
    }

    struct MockBackend {
        entries: Vec<RarEntry>,
    }

    impl RarBackend for MockBackend {
        fn list(
            &self,
            _archive: &Path,
            _events: &mut RarEventHandler<'_>,
        ) -> Result<Vec<RarEntry>> {
            Ok(self.entries.clone())
        }

        fn open(&self, _archive: &Path, entry: &RarEntry) -> Result<Box<dyn Read>> {
            Ok(Box::new(io::Cursor::new(vec![b'x'; entry.size as usize])))
        }
    }

    fn copy_with(
        entries: Vec<RarEntry>,
    ) -> (Result<u64>, crate::install::InstallState, tempfile::TempDir) {
        use crate::install::{InstallOptions, InstallState};
        use crate::progress::StatisticsProgress;

        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("data.rar");
        std::fs::write(&archive, b"Rar!").unwrap();
        let codec =
            RarCodec::with_backend(ResourceLimits::default(), Box::new(MockBackend { entries }));
        let options = InstallOptions::new(dir.path());
        let mut state = InstallState::new();
        let mut progress = StatisticsProgress::new();
        let dest = dir.path().join("out");
        let result = {
            let mut ctx = CopyContext::new("Base", None, &options, &mut state, &mut progress);
            codec.copy(&mut ctx, &archive, &dest)
        };
        if result.is_ok() {
            assert_eq!(progress.reported_bytes(), state.installed_bytes());
        }
        (result, state, dir)
    }

    #[test]
    fn test_copy_through_backend() {
        let entries = parse_listing(LISTING)
            .into_iter()
            .filter(|e| !e.encrypted)
            .collect();
        let (result, state, dir) = copy_with(entries);
        assert_eq!(result.unwrap(), 12);
        let out = dir.path().join("out");
        assert_eq!(std::fs::read(out.join("docs/readme.txt")).unwrap(), vec![b'x'; 12]);
        assert!(state.find_file(&out.join("docs")).is_some());
        assert_eq!(state.installed_bytes(), 12);

        let copy = out.join("docs/copy.txt");
        assert!(std::fs::symlink_metadata(&copy).is_err());
        assert!(state.find_file(&copy).is_none());
    }

    #[test]
    fn test_encrypted_entry_aborts() {
        let (result, _state, _dir) = copy_with(parse_listing(LISTING));
        assert!(matches!(result, Err(Error::PasswordRequired { .. })));
    }
}
