//! Copy/install orchestration.
//!
//! The [`Installer`] walks an [`OptionTree`] and materializes every
//! selected option:
//!
//! - `option` elements are entered when the [`Selection`] says so, and open
//!   a per-option record in the [`InstallState`];
//! - `exclusive` groups are entered unconditionally (their children are
//!   options that were decided upstream);
//! - `component` groups are entered when their `arch`/`libc` match the host,
//!   and register a component record;
//! - `files`, `binary` and `script` leaves do the work.
//!
//! A `files` leaf expands its patterns against the source root (or a
//! mounted disc named by `cdromid`) and routes every match through the
//! [`CodecRegistry`]: a matching codec extracts the archive, anything else
//! is copied verbatim. Binaries are looked up per platform and are
//! mandatory. Scripts run through the configured shell.
//!
//! # Failure policy
//!
//! | Problem | Effect |
//! |---------|--------|
//! | Pattern matches nothing | warning, zero bytes |
//! | Unknown archive entry type, unsupported feature | warning, skipped |
//! | Missing binary | fatal |
//! | Checksum mismatch, corrupt archive | fatal |
//! | Script exits non-zero | fatal |
//!
//! Every fatal error goes through [`Installer::abort_install`], which marks
//! the state as aborted and calls the abort hook so the caller can roll
//! back the recorded files.
//!
//! ```rust,no_run
//! use installkit::codec::CodecRegistry;
//! use installkit::install::{InstallOptions, InstallState, Installer, OptionTree, Selection};
//! use installkit::progress::NoProgress;
//! use installkit::safety::ResourceLimits;
//!
//! let mut tree = OptionTree::new();
//! let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
//! tree.add(base, "files").text("data.tar.gz");
//!
//! let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
//! let options = InstallOptions::new("/opt/game").source_root("/media/cdrom");
//! let mut state = InstallState::new();
//! let written = Installer::new(&registry, &options)
//!     .install(&tree, &Selection::new(), &mut state, &mut NoProgress)?;
//! assert_eq!(written, state.installed_bytes());
//! # Ok::<(), installkit::Error>(())
//! ```

mod binary;
pub(crate) mod script;
mod selection;
pub(crate) mod sources;
mod state;
mod tree;

pub use selection::Selection;
pub use state::{
    BinaryRecord, ComponentRecord, FileKind, FileRef, InstallState, InstalledFile, MenuEntry,
    OptionRecord, PackageRecord, ScriptPhase, UninstallScript,
};
pub use tree::{NodeBuilder, NodeId, OptionNode, OptionTree};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::codec::{CodecRegistry, CopyContext};
use crate::metadata;
use crate::platform::{Platform, matches_any};
use crate::progress::{ProgressReporter, ProgressUpdate, format_bytes_iec};
use crate::{Error, Result};

/// Progress label used while a script runs.
pub const RUNNING_SCRIPT: &str = "Running script";

/// Installation settings.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Directory the product is installed into.
    pub install_root: PathBuf,
    /// Directory relative source patterns are resolved against.
    pub source_root: PathBuf,
    /// Directory for binary symlinks, if the user chose one.
    pub symlinks_dir: Option<PathBuf>,
    /// Product name passed to scripts.
    pub product_name: String,
    /// Selected language, matched against `lang` attributes.
    pub lang: Option<String>,
    /// Root for packages installed without relocation.
    pub rpm_root: PathBuf,
    /// Never hand packages to the platform package tool.
    pub force_manual_rpm: bool,
    /// Rewrite existing files in place instead of replacing them.
    pub overwrite_in_place: bool,
    /// Permissions for copied files without a `mode` attribute.
    pub default_mode: u32,
    /// Permissions for installed binaries without a `mode` attribute.
    pub binary_mode: u32,
    /// Shell for scripts and conditions.
    pub script_shell: PathBuf,
    /// Host description for filters and binary lookup.
    pub platform: Platform,
}

impl InstallOptions {
    /// Creates options installing into `install_root` on the detected host.
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            source_root: PathBuf::from("."),
            symlinks_dir: None,
            product_name: String::new(),
            lang: None,
            rpm_root: PathBuf::from("/"),
            force_manual_rpm: false,
            overwrite_in_place: false,
            default_mode: 0o644,
            binary_mode: 0o755,
            script_shell: PathBuf::from("/bin/sh"),
            platform: Platform::detect(),
        }
    }

    /// Sets the source root.
    pub fn source_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_root = path.into();
        self
    }

    /// Sets the binary symlink directory.
    pub fn symlinks_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.symlinks_dir = Some(path.into());
        self
    }

    /// Sets the product name.
    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = name.into();
        self
    }

    /// Sets the selected language.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Sets the package root.
    pub fn rpm_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.rpm_root = path.into();
        self
    }

    /// Forces manual package extraction.
    pub fn force_manual_rpm(mut self, force: bool) -> Self {
        self.force_manual_rpm = force;
        self
    }

    /// Sets the overwrite-in-place policy.
    pub fn overwrite_in_place(mut self, in_place: bool) -> Self {
        self.overwrite_in_place = in_place;
        self
    }

    /// Sets the default file mode.
    pub fn default_mode(mut self, mode: u32) -> Self {
        self.default_mode = mode;
        self
    }

    /// Sets the binary mode.
    pub fn binary_mode(mut self, mode: u32) -> Self {
        self.binary_mode = mode;
        self
    }

    /// Sets the script shell.
    pub fn script_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.script_shell = shell.into();
        self
    }

    /// Sets the host description.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

/// Resolves logical disc identifiers to mount points.
pub trait MediaResolver {
    /// Returns where the disc `cdromid` is mounted, if it is available.
    fn mount_point(&self, cdromid: &str) -> Option<PathBuf>;
}

/// Called once when an installation aborts.
pub type AbortHook<'a> = Box<dyn FnMut(&Error, &InstallState) + 'a>;

/// Where a leaf reads from and writes to.
#[derive(Debug, Clone)]
struct Leaf {
    dest: PathBuf,
    base: PathBuf,
    cdrom: Option<PathBuf>,
}

/// Parses a `size` attribute: bytes with an optional `K`, `M` or `G` suffix.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()?.to_ascii_uppercase() {
        'K' => (&value[..value.len() - 1], 1u64 << 10),
        'M' => (&value[..value.len() - 1], 1u64 << 20),
        'G' => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

fn lang_matches(value: Option<&str>, lang: Option<&str>) -> bool {
    let Some(lang) = lang else {
        return matches_any(value, "");
    };
    let base = lang.split(['_', '.', '@']).next().unwrap_or(lang);
    matches_any(value, lang) || matches_any(value, base)
}

/// Label of the nearest enclosing option.
fn option_label<'t>(node: OptionNode<'t>) -> &'t str {
    let mut current = Some(node);
    while let Some(n) = current {
        if n.element() == "option" {
            return n.label();
        }
        current = n.parent();
    }
    ""
}

/// Drives an installation.
pub struct Installer<'a> {
    registry: &'a CodecRegistry,
    options: &'a InstallOptions,
    media: Option<&'a dyn MediaResolver>,
    abort_hook: Option<AbortHook<'a>>,
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Installer<'a> {
    /// Creates an installer over a codec registry.
    pub fn new(registry: &'a CodecRegistry, options: &'a InstallOptions) -> Self {
        Self {
            registry,
            options,
            media: None,
            abort_hook: None,
        }
    }

    /// Sets the disc resolver used for `cdromid` attributes.
    pub fn media(mut self, media: &'a dyn MediaResolver) -> Self {
        self.media = Some(media);
        self
    }

    /// Sets the hook called when the installation aborts.
    pub fn on_abort(mut self, hook: impl FnMut(&Error, &InstallState) + 'a) -> Self {
        self.abort_hook = Some(Box::new(hook));
        self
    }

    /// Installs every selected option and returns the bytes written.
    ///
    /// The reporter first receives the dry-run estimate through
    /// [`on_total`](ProgressReporter::on_total). On failure the state is
    /// left marked as aborted with everything written so far recorded.
    pub fn install(
        &mut self,
        tree: &OptionTree,
        selection: &Selection,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let total = self.estimate_size(tree, selection);
        log::info!(
            "Installing '{}' into {} ({} estimated)",
            self.options.product_name,
            self.options.install_root.display(),
            format_bytes_iec(total)
        );
        progress.on_total(total);

        match self.install_children(tree.node(tree.root()), selection, state, progress) {
            Ok(written) => {
                log::info!("Installed {}", format_bytes_iec(written));
                Ok(written)
            }
            Err(error) => Err(self.abort_install(error, state)),
        }
    }

    /// Marks the installation as aborted and notifies the abort hook.
    ///
    /// Returns `error` for the caller to propagate.
    pub fn abort_install(&mut self, error: Error, state: &mut InstallState) -> Error {
        if matches!(error, Error::Cancelled) {
            log::info!("Installation cancelled");
        } else {
            log::error!("Installation aborted: {}", error);
        }
        state.mark_aborted(error.to_string());
        if let Some(hook) = self.abort_hook.as_mut() {
            hook(&error, state);
        }
        error
    }

    /// Estimates the bytes a full installation would write.
    ///
    /// Mirrors the installation walk without writing anything. Sources that
    /// cannot be sized count as zero.
    pub fn estimate_size(&self, tree: &OptionTree, selection: &Selection) -> u64 {
        self.estimate_children(tree.node(tree.root()), selection)
    }

    fn estimate_children(&self, node: OptionNode<'_>, selection: &Selection) -> u64 {
        node.children()
            .map(|child| self.estimate_node(child, selection))
            .fold(0u64, u64::saturating_add)
    }

    fn estimate_node(&self, node: OptionNode<'_>, selection: &Selection) -> u64 {
        match node.element() {
            "option" if selection.is_selected(node) => self.estimate_children(node, selection),
            "exclusive" => self.estimate_children(node, selection),
            "component" if self.component_applies(node) => self.estimate_children(node, selection),
            "files" | "binary" if self.leaf_applies(node) => {
                if let Some(size) = node.attr("size").and_then(parse_size) {
                    return size;
                }
                let leaf = self.leaf(node);
                if node.element() == "files" {
                    self.estimate_files(node, &leaf)
                } else {
                    self.estimate_binary(node, &leaf)
                }
            }
            _ => 0,
        }
    }

    fn estimate_files(&self, node: OptionNode<'_>, leaf: &Leaf) -> u64 {
        let expansion = match sources::expand(&leaf.base, node.text(), node.flag("keepdirs")) {
            Ok(expansion) => expansion,
            Err(e) => {
                log::warn!("Cannot size '{}': {}", node.text().trim(), e);
                return 0;
            }
        };
        expansion
            .sources
            .iter()
            .filter(|s| !s.is_dir)
            .map(|s| match self.registry.find(&s.path) {
                Some(codec) => codec.size(&s.path).unwrap_or_else(|e| {
                    log::warn!("Cannot size '{}': {}", s.path.display(), e);
                    0
                }),
                None => sources::disk_size(&s.path),
            })
            .fold(0u64, u64::saturating_add)
    }

    fn estimate_binary(&self, node: OptionNode<'_>, leaf: &Leaf) -> u64 {
        if node.flag("inrpm") {
            return 0;
        }
        binary::candidates(
            &leaf.base,
            node.text().trim(),
            node.attr("binpath"),
            &self.options.platform,
        )
        .iter()
        .find(|p| p.is_file())
        .map_or(0, |p| sources::disk_size(p))
    }

    fn install_children(
        &self,
        node: OptionNode<'_>,
        selection: &Selection,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let mut written = 0u64;
        for child in node.children() {
            written += self.install_node(child, selection, state, progress)?;
        }
        Ok(written)
    }

    fn install_node(
        &self,
        node: OptionNode<'_>,
        selection: &Selection,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        match node.element() {
            "option" => {
                if !selection.is_selected(node) {
                    return Ok(0);
                }
                log::debug!("Installing option '{}'", node.label());
                state.begin_option(node.label());
                let result = self.install_children(node, selection, state, progress);
                state.end_option();
                result
            }
            "exclusive" => self.install_children(node, selection, state, progress),
            "component" => {
                if !self.component_applies(node) {
                    log::debug!("Component '{}' does not apply to this host", node.label());
                    return Ok(0);
                }
                state.begin_component(
                    node.attr("name").unwrap_or_default(),
                    node.attr("version").map(str::to_string),
                );
                self.install_children(node, selection, state, progress)
            }
            "files" | "binary" | "script" => {
                if !self.leaf_applies(node) {
                    log::debug!("Skipping <{}> filtered for this host", node.element());
                    return Ok(0);
                }
                if progress.should_cancel() {
                    return Err(Error::Cancelled);
                }
                let leaf = self.leaf(node);
                match node.element() {
                    "files" => self.install_files(node, &leaf, state, progress),
                    "binary" => self.install_binary(node, &leaf, state, progress),
                    _ => self.run_script(node, &leaf, state, progress),
                }
            }
            other => {
                log::trace!("Ignoring <{}>", other);
                Ok(0)
            }
        }
    }

    fn component_applies(&self, node: OptionNode<'_>) -> bool {
        let platform = &self.options.platform;
        platform.matches_arch(node.attr("arch")) && platform.matches_libc(node.attr("libc"))
    }

    fn leaf_applies(&self, node: OptionNode<'_>) -> bool {
        let platform = &self.options.platform;
        platform.matches_arch(node.attr("arch"))
            && platform.matches_libc(node.attr("libc"))
            && platform.matches_distro(node.attr("distro"))
            && lang_matches(node.attr("lang"), self.options.lang.as_deref())
    }

    fn leaf(&self, node: OptionNode<'_>) -> Leaf {
        let dest = match node.attr("path") {
            Some(path) => self.options.install_root.join(path),
            None => self.options.install_root.clone(),
        };
        let cdrom = node.inherited_attr("cdromid").and_then(|id| {
            let mount = self.media.and_then(|m| m.mount_point(id));
            if mount.is_none() {
                log::warn!("Disc '{}' is not available, using the source root", id);
            }
            mount
        });
        Leaf {
            dest,
            base: cdrom.clone().unwrap_or_else(|| self.options.source_root.clone()),
            cdrom,
        }
    }

    fn script_env(&self, leaf: &Leaf) -> Vec<(&'static str, OsString)> {
        let options = self.options;
        let mut env = vec![
            ("SETUP_INSTALLPATH", options.install_root.clone().into_os_string()),
            (
                "SETUP_SYMLINKSPATH",
                options
                    .symlinks_dir
                    .clone()
                    .map(PathBuf::into_os_string)
                    .unwrap_or_default(),
            ),
            ("SETUP_PRODUCTNAME", OsString::from(&options.product_name)),
        ];
        if let Some(cdrom) = &leaf.cdrom {
            env.push(("SETUP_CDROMPATH", cdrom.clone().into_os_string()));
        }
        env
    }

    fn install_files(
        &self,
        node: OptionNode<'_>,
        leaf: &Leaf,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let label = option_label(node);
        let expansion = sources::expand(&leaf.base, node.text(), node.flag("keepdirs"))?;
        for missing in &expansion.missing {
            let message = format!("No source file matches '{}'", missing);
            log::warn!("{}", message);
            progress.on_warning(&message);
        }

        let mut written = 0u64;
        for source in &expansion.sources {
            if progress.should_cancel() {
                return Err(Error::Cancelled);
            }
            let target = leaf.dest.join(&source.rel);
            let mut ctx = CopyContext::new(label, Some(node), self.options, state, progress);

            if source.is_dir {
                metadata::create_dir(&target, None)?;
                ctx.record(InstalledFile::directory(&target));
                continue;
            }

            let Some(codec) = self.registry.find(&source.path) else {
                let mode = self.options.default_mode;
                written += sources::copy_verbatim(&mut ctx, &source.path, &target, mode)?.0;
                continue;
            };
            let into = target.parent().unwrap_or(leaf.dest.as_path());
            log::debug!(
                "Extracting '{}' with the {} codec into {}",
                source.path.display(),
                codec.info().name,
                into.display()
            );
            match codec.copy(&mut ctx, &source.path, into) {
                Ok(n) => written += n,
                Err(e) if !e.is_fatal() => {
                    ctx.warn(&format!("Skipping '{}': {}", source.path.display(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn install_binary(
        &self,
        node: OptionNode<'_>,
        leaf: &Leaf,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let name = node.text().trim();
        if name.is_empty() {
            log::warn!("Ignoring <binary> without a name");
            return Ok(0);
        }
        let options = self.options;
        let target = leaf.dest.join(name);
        let mut ctx = CopyContext::new(option_label(node), Some(node), options, state, progress);

        let (written, file) = if node.flag("inrpm") {
            let mode = ctx.mode_override().unwrap_or(options.binary_mode);
            metadata::apply_mode(&target, mode);
            (0, None)
        } else {
            let env = self.script_env(leaf);
            let source = binary::resolve(
                &leaf.base,
                name,
                node.attr("binpath"),
                &options.platform,
                &options.script_shell,
                &env,
            )?;
            let (written, file) =
                sources::copy_verbatim(&mut ctx, &source, &target, options.binary_mode)?;
            (written, Some(file))
        };

        let symlink = match (node.attr("symlink"), &options.symlinks_dir) {
            (Some(link), Some(dir)) => {
                let link_path = dir.join(link);
                let link_target = target.to_string_lossy().into_owned();
                metadata::create_symlink(&link_path, &link_target)?;
                ctx.report(&link_path, 0, 0)?;
                ctx.record(InstalledFile::symlink(&link_path, link_target));
                Some(link_path)
            }
            (Some(link), None) => {
                ctx.warn(&format!("No symlink directory for '{}'", link));
                None
            }
            _ => None,
        };

        let menu = MenuEntry {
            name: node.attr("name").map(str::to_string),
            icon: node.attr("icon").map(str::to_string),
            menu: node.attr("menu").map(str::to_string),
            args: node.attr("args").map(str::to_string),
        };
        let has_menu = menu != MenuEntry::default();
        ctx.state.add_binary(BinaryRecord {
            name: name.to_string(),
            path: target,
            file,
            symlink,
            menu: has_menu.then_some(menu),
        });
        Ok(written)
    }

    fn run_script(
        &self,
        node: OptionNode<'_>,
        leaf: &Leaf,
        state: &mut InstallState,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let body = node.text();
        if body.trim().is_empty() {
            return Ok(0);
        }
        let update = ProgressUpdate {
            state: &*state,
            path: Path::new(""),
            current: 0,
            total: 0,
            label: RUNNING_SCRIPT,
        };
        if !progress.on_progress(&update) {
            return Err(Error::Cancelled);
        }
        let label = option_label(node);
        let name = if label.is_empty() { "script" } else { label };
        script::run_shell(&self.options.script_shell, name, body, &self.script_env(leaf))?;
        Ok(0)
    }
}
