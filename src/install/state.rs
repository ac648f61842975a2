//! Bookkeeping for one installation run.
//!
//! [`InstallState`] accumulates everything the surrounding product registry
//! and uninstaller need: the files written per option, components,
//! binaries with their menu metadata, packages handed to the platform tool
//! and stashed uninstall scripts. Records are appended and never mutated
//! afterwards.

use std::path::{Path, PathBuf};

/// What kind of filesystem object an installed file is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file.
    Regular,
    /// A directory created by the installer.
    Directory,
    /// A symbolic link and its (sanitized) target.
    Symlink {
        /// Link target as written to disk.
        target: String,
    },
    /// A FIFO or device node.
    Special,
}

/// One file written to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFile {
    /// Destination path.
    pub path: PathBuf,
    /// Object type.
    pub kind: FileKind,
    /// Bytes written.
    pub size: u64,
    /// MD5 of the written content; `None` for non-regular or mutable files.
    pub md5: Option<String>,
}

impl InstalledFile {
    /// A regular file with its content hash.
    pub fn regular(path: impl Into<PathBuf>, size: u64, md5: Option<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Regular,
            size,
            md5,
        }
    }

    /// A directory.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Directory,
            size: 0,
            md5: None,
        }
    }

    /// A symbolic link.
    pub fn symlink(path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Symlink {
                target: target.into(),
            },
            size: 0,
            md5: None,
        }
    }

    /// A FIFO or device node.
    pub fn special(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Special,
            size: 0,
            md5: None,
        }
    }
}

/// Back-reference to a recorded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRef {
    /// Index into an option record's file list.
    Option {
        /// Option index.
        option: usize,
        /// File index within the option.
        index: usize,
    },
    /// Index into the list of files written outside any option.
    Loose(usize),
}

/// Files installed on behalf of one selected option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionRecord {
    /// Option label.
    pub label: String,
    /// Files in write order.
    pub files: Vec<InstalledFile>,
}

/// A registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    /// Component name (empty for the default component).
    pub name: String,
    /// Component version, if declared.
    pub version: Option<String>,
    /// Index of the first option recorded under this component.
    pub first_option: usize,
}

/// Desktop menu metadata for an installed binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuEntry {
    /// Display name.
    pub name: Option<String>,
    /// Icon path relative to the install root.
    pub icon: Option<String>,
    /// Menu category.
    pub menu: Option<String>,
    /// Extra command-line arguments.
    pub args: Option<String>,
}

/// An installed binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRecord {
    /// Binary name as listed in the option tree.
    pub name: String,
    /// Installed path.
    pub path: PathBuf,
    /// The file record written for it, if the installer copied it.
    pub file: Option<FileRef>,
    /// Symlink created in the binaries directory.
    pub symlink: Option<PathBuf>,
    /// Menu metadata, if any was declared.
    pub menu: Option<MenuEntry>,
}

/// A package installed from a platform package file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Package release.
    pub release: String,
    /// Whether the platform package tool performed the transaction.
    pub via_tool: bool,
    /// Whether the uninstaller should remove it with the product.
    pub autoremove: bool,
}

/// When a stashed uninstall script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    /// Before package files are removed.
    PreUninstall,
    /// After package files are removed.
    PostUninstall,
}

/// An uninstall script extracted from a package for later use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallScript {
    /// Owning package name.
    pub package: String,
    /// When to run it.
    pub phase: ScriptPhase,
    /// Script text.
    pub body: String,
}

/// The state of an installation run.
#[derive(Debug, Clone, Default)]
pub struct InstallState {
    options: Vec<OptionRecord>,
    loose_files: Vec<InstalledFile>,
    option_stack: Vec<usize>,
    components: Vec<ComponentRecord>,
    binaries: Vec<BinaryRecord>,
    packages: Vec<PackageRecord>,
    uninstall_scripts: Vec<UninstallScript>,
    installed_bytes: u64,
    aborted: Option<String>,
}

impl InstallState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a record for an option; files recorded until the matching
    /// [`end_option`](Self::end_option) belong to it.
    pub fn begin_option(&mut self, label: impl Into<String>) -> usize {
        let index = self.options.len();
        self.options.push(OptionRecord {
            label: label.into(),
            files: Vec::new(),
        });
        self.option_stack.push(index);
        index
    }

    /// Closes the innermost open option.
    pub fn end_option(&mut self) {
        self.option_stack.pop();
    }

    /// Registers a component starting at the next option.
    pub fn begin_component(&mut self, name: impl Into<String>, version: Option<String>) {
        self.components.push(ComponentRecord {
            name: name.into(),
            version,
            first_option: self.options.len(),
        });
    }

    /// Records a written file and adds its size to the installed total.
    pub fn record_file(&mut self, file: InstalledFile) -> FileRef {
        self.installed_bytes += file.size;
        match self.option_stack.last() {
            Some(&option) => {
                let files = &mut self.options[option].files;
                files.push(file);
                FileRef::Option {
                    option,
                    index: files.len() - 1,
                }
            }
            None => {
                self.loose_files.push(file);
                FileRef::Loose(self.loose_files.len() - 1)
            }
        }
    }

    /// Adds bytes written by an external tool that produced no file records.
    pub fn add_bytes(&mut self, bytes: u64) {
        self.installed_bytes += bytes;
    }

    /// Looks up a recorded file.
    pub fn file(&self, file: FileRef) -> Option<&InstalledFile> {
        match file {
            FileRef::Option { option, index } => self.options.get(option)?.files.get(index),
            FileRef::Loose(index) => self.loose_files.get(index),
        }
    }

    /// Records an installed binary.
    pub fn add_binary(&mut self, binary: BinaryRecord) {
        self.binaries.push(binary);
    }

    /// Records a package.
    pub fn add_package(&mut self, package: PackageRecord) {
        self.packages.push(package);
    }

    /// Stashes an uninstall script.
    pub fn add_uninstall_script(&mut self, script: UninstallScript) {
        self.uninstall_scripts.push(script);
    }

    /// Total bytes written to the destination so far.
    pub fn installed_bytes(&self) -> u64 {
        self.installed_bytes
    }

    /// Option records in install order.
    pub fn options(&self) -> &[OptionRecord] {
        &self.options
    }

    /// Files written outside of any option.
    pub fn loose_files(&self) -> &[InstalledFile] {
        &self.loose_files
    }

    /// Every recorded file, options first.
    pub fn files(&self) -> impl Iterator<Item = &InstalledFile> {
        self.options
            .iter()
            .flat_map(|o| o.files.iter())
            .chain(self.loose_files.iter())
    }

    /// Finds the record for a destination path.
    pub fn find_file(&self, path: &Path) -> Option<&InstalledFile> {
        self.files().find(|f| f.path == path)
    }

    /// Registered components.
    pub fn components(&self) -> &[ComponentRecord] {
        &self.components
    }

    /// Installed binaries.
    pub fn binaries(&self) -> &[BinaryRecord] {
        &self.binaries
    }

    /// Installed packages.
    pub fn packages(&self) -> &[PackageRecord] {
        &self.packages
    }

    /// Stashed uninstall scripts.
    pub fn uninstall_scripts(&self) -> &[UninstallScript] {
        &self.uninstall_scripts
    }

    /// Marks the run as aborted.
    pub(crate) fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.option_stack.clear();
        self.aborted = Some(reason.into());
    }

    /// Returns true once the run has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Why the run was aborted.
    pub fn abort_reason(&self) -> Option<&str> {
        self.aborted.as_deref()
    }
}
