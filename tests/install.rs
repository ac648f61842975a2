//! End-to-end installation tests.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::*;
use installkit::install::{
    InstallOptions, InstallState, Installer, MediaResolver, OptionTree, Selection,
};
use installkit::progress::StatisticsProgress;
use installkit::{BooleanRegistry, CodecRegistry, Error, Platform, ResourceLimits};
use tempfile::TempDir;

fn platform() -> Platform {
    Platform::new("Linux", "x86_64", "glibc").with_distro("debian")
}

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    target: PathBuf,
    links: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("media");
        let target = dir.path().join("target");
        let links = dir.path().join("bin");
        fs::create_dir_all(&source).unwrap();
        Self {
            source,
            target,
            links,
            _dir: dir,
        }
    }

    fn options(&self) -> InstallOptions {
        InstallOptions::new(&self.target)
            .source_root(&self.source)
            .symlinks_dir(&self.links)
            .product_name("demo")
            .force_manual_rpm(true)
            .platform(platform())
    }

    fn add(&self, name: &str, data: &[u8]) -> PathBuf {
        write(&self.source, name, data)
    }
}

struct Outcome {
    result: installkit::Result<u64>,
    state: InstallState,
    progress: StatisticsProgress,
}

fn run(tree: &OptionTree, selection: &Selection, options: &InstallOptions) -> Outcome {
    run_with_progress(tree, selection, options, StatisticsProgress::new())
}

fn run_with_progress(
    tree: &OptionTree,
    selection: &Selection,
    options: &InstallOptions,
    mut progress: StatisticsProgress,
) -> Outcome {
    let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
    let mut state = InstallState::new();
    let result =
        Installer::new(&registry, options).install(tree, selection, &mut state, &mut progress);
    Outcome {
        result,
        state,
        progress,
    }
}

fn assert_accounting(outcome: &Outcome) {
    let written = *outcome.result.as_ref().expect("installation failed");
    assert_eq!(outcome.state.installed_bytes(), written);
    assert_eq!(outcome.progress.reported_bytes(), written);
}

#[test]
fn test_selected_options_are_installed() {
    let fx = Fixture::new();
    fx.add("data/a.pak", b"aaaa");
    fx.add("data/b.pak", b"bbbbbb");
    fx.add("docs/readme.txt", b"read me");
    fx.add("docs/manual/index.html", b"<html>");
    fx.add("maps.tar.gz", &gzip(&TarBuilder::new().file("dm1.map", b"map data").finish()));
    fx.add("extra.pak", b"extra");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
    tree.add(base, "files").text("data/*.pak docs");
    tree.add(base, "files").attr("path", "maps").text("maps.tar.gz");
    let extras = tree.add(tree.root(), "option").text("Extras").id();
    tree.add(extras, "files").text("extra.pak");

    let options = fx.options();
    let outcome = run(&tree, &Selection::new(), &options);
    assert_accounting(&outcome);

    let expected = 4 + 6 + 7 + 6 + 8;
    assert_eq!(outcome.result.as_ref().unwrap(), &expected);
    assert_eq!(outcome.progress.total_bytes, expected);

    assert_eq!(fs::read(fx.target.join("a.pak")).unwrap(), b"aaaa");
    assert_eq!(fs::read(fx.target.join("docs/manual/index.html")).unwrap(), b"<html>");
    assert_eq!(fs::read(fx.target.join("maps/dm1.map")).unwrap(), b"map data");
    assert!(!fx.target.join("extra.pak").exists());

    let records = outcome.state.options();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "Base");
    assert!(outcome.progress.labels.iter().all(|l| l == "Base"));
}

#[test]
fn test_estimate_matches_dry_run() {
    let fx = Fixture::new();
    fx.add("a.bin", &[1u8; 1000]);
    fx.add("b.zip", &ZipBuilder::new().deflated("inner", &[7u8; 5000]).finish(b""));

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files").text("a.bin b.zip");
    tree.add(base, "files").attr("size", "2K").text("missing-but-sized.bin");

    let options = fx.options();
    let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
    let installer = Installer::new(&registry, &options);
    assert_eq!(installer.estimate_size(&tree, &Selection::new()), 1000 + 5000 + 2048);
    assert!(!fx.target.exists());
}

#[test]
fn test_conditions_and_platform_filters() {
    let fx = Fixture::new();
    for name in ["linux.txt", "musl.txt", "ppc.txt", "fr.txt", "de.txt", "debian.txt", "cond.txt"] {
        fx.add(name, name.as_bytes());
    }

    let mut tree = OptionTree::new();
    let root = tree.root();
    let linux = tree.add(root, "option").attr("install", "true").attr("if", "+(Linux,x86_64)").id();
    tree.add(linux, "files").text("linux.txt");
    let musl = tree.add(root, "option").attr("install", "true").attr("if", "musl").id();
    tree.add(musl, "files").text("musl.txt");
    let filtered = tree.add(root, "option").attr("install", "true").id();
    tree.add(filtered, "files").attr("arch", "ppc").text("ppc.txt");
    tree.add(filtered, "files").attr("lang", "fr").text("fr.txt");
    tree.add(filtered, "files").attr("lang", "de").text("de.txt");
    tree.add(filtered, "files").attr("distro", "debian").text("debian.txt");
    let unless = tree
        .add(root, "option")
        .attr("install", "true")
        .attr("unless", "^(Linux,musl)")
        .id();
    tree.add(unless, "files").text("cond.txt");

    let options = fx.options().lang("de_DE.UTF-8");
    let booleans = BooleanRegistry::with_platform(&options.platform);
    let mut selection = Selection::new();
    assert_eq!(selection.apply_conditions(&tree, &booleans), 2);

    let outcome = run(&tree, &selection, &options);
    assert_accounting(&outcome);
    let exists = |name: &str| fx.target.join(name).exists();
    assert!(exists("linux.txt"));
    assert!(!exists("musl.txt"));
    assert!(!exists("ppc.txt"));
    assert!(!exists("fr.txt"));
    assert!(exists("de.txt"));
    assert!(exists("debian.txt"));
    assert!(!exists("cond.txt"));
}

#[test]
fn test_components_are_recorded() {
    let fx = Fixture::new();
    fx.add("addon.dat", b"addon");

    let mut tree = OptionTree::new();
    let component = tree
        .add(tree.root(), "component")
        .attr("name", "Addon")
        .attr("version", "1.1")
        .id();
    let option = tree.add(component, "option").attr("install", "true").text("Addon data").id();
    tree.add(option, "files").text("addon.dat");
    let skipped = tree
        .add(tree.root(), "component")
        .attr("name", "Sparc")
        .attr("arch", "sparc64")
        .id();
    let inner = tree.add(skipped, "option").attr("install", "true").id();
    tree.add(inner, "files").text("addon.dat");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
    let components = outcome.state.components();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].name, "Addon");
    assert_eq!(components[0].version.as_deref(), Some("1.1"));
    assert_eq!(components[0].first_option, 0);
    assert_eq!(outcome.state.options()[0].label, "Addon data");
}

#[cfg(unix)]
#[test]
fn test_binary_with_symlink_and_menu() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    fx.add("bin/Linux/x86_64/game", b"\x7fELF binary");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
    tree.add(base, "binary")
        .attr("symlink", "demo-game")
        .attr("name", "Demo Game")
        .attr("icon", "icon.png")
        .attr("menu", "Games")
        .text("game");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);

    let installed = fx.target.join("game");
    assert_eq!(fs::read(&installed).unwrap(), b"\x7fELF binary");
    let mode = fs::metadata(&installed).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    let link = fx.links.join("demo-game");
    assert_eq!(fs::read_link(&link).unwrap(), installed);

    let binaries = outcome.state.binaries();
    assert_eq!(binaries.len(), 1);
    assert_eq!(binaries[0].name, "game");
    assert_eq!(binaries[0].symlink.as_deref(), Some(link.as_path()));
    let menu = binaries[0].menu.as_ref().unwrap();
    assert_eq!(menu.name.as_deref(), Some("Demo Game"));
    assert_eq!(menu.menu.as_deref(), Some("Games"));
    let file = outcome.state.file(binaries[0].file.unwrap()).unwrap();
    assert_eq!(file.path, installed);
}

#[test]
fn test_missing_binary_aborts_and_runs_hook() {
    let fx = Fixture::new();
    fx.add("first.txt", b"written before the failure");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
    tree.add(base, "files").text("first.txt");
    tree.add(base, "binary").text("nonexistent");

    let options = fx.options();
    let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
    let mut state = InstallState::new();
    let mut progress = StatisticsProgress::new();
    let mut seen: Vec<(String, usize)> = Vec::new();

    let result = Installer::new(&registry, &options)
        .on_abort(|error, state| seen.push((error.to_string(), state.files().count())))
        .install(&tree, &Selection::new(), &mut state, &mut progress);

    assert!(matches!(result, Err(Error::MissingBinary { ref name, .. }) if name == "nonexistent"));
    assert!(state.is_aborted());
    assert_eq!(seen.len(), 1);
    assert!(seen[0].0.contains("nonexistent"));
    assert_eq!(seen[0].1, 1);
}

#[test]
fn test_cancellation_aborts() {
    let fx = Fixture::new();
    fx.add("a.txt", b"a");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files").text("a.txt");

    let progress = StatisticsProgress {
        cancelled: true,
        ..Default::default()
    };
    let outcome = run_with_progress(&tree, &Selection::new(), &fx.options(), progress);
    assert!(matches!(outcome.result, Err(Error::Cancelled)));
    assert!(outcome.state.is_aborted());
    assert!(!fx.target.join("a.txt").exists());
}

#[test]
fn test_missing_plain_file_is_a_warning() {
    let fx = Fixture::new();
    fx.add("present.txt", b"here");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files").text("absent-*.txt present.txt");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
    assert_eq!(outcome.result.as_ref().unwrap(), &4);
    assert_eq!(outcome.progress.warnings.len(), 1);
    assert!(outcome.progress.warnings[0].contains("absent-*.txt"));
}

#[test]
fn test_verbatim_checksum_mismatch_is_fatal() {
    let fx = Fixture::new();
    fx.add("data.bin", b"actual content");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files")
        .attr("md5sum", md5_hex(b"expected content"))
        .text("data.bin");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert!(matches!(outcome.result, Err(Error::ChecksumMismatch { .. })));
    assert!(outcome.state.find_file(&fx.target.join("data.bin")).is_some());
}

#[test]
fn test_verbatim_checksum_match() {
    let fx = Fixture::new();
    fx.add("data.bin", b"actual content");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files")
        .attr("md5sum", md5_hex(b"actual content").to_uppercase())
        .text("data.bin");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
}

#[test]
fn test_unsupported_archive_is_skipped() {
    let fx = Fixture::new();
    let mut zip = ZipBuilder::new().stored("x", b"x").finish(b"");
    let entries = zip.len() - 12;
    zip[entries..entries + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    fx.add("huge.zip", &zip);
    fx.add("after.txt", b"after");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files").text("huge.zip after.txt");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
    assert_eq!(outcome.progress.warnings.len(), 1);
    assert!(fx.target.join("after.txt").exists());
}

#[cfg(unix)]
#[test]
fn test_script_environment() {
    let fx = Fixture::new();

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
    tree.add(base, "script").text(
        "mkdir -p \"$SETUP_INSTALLPATH\" && echo \"$SETUP_PRODUCTNAME\" > \"$SETUP_INSTALLPATH/marker\"",
    );

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
    assert_eq!(fs::read_to_string(fx.target.join("marker")).unwrap(), "demo\n");
    assert!(outcome.progress.labels.iter().any(|l| l == installkit::install::RUNNING_SCRIPT));
}

#[cfg(unix)]
#[test]
fn test_failing_script_is_fatal() {
    let fx = Fixture::new();

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
    tree.add(base, "script").text("exit 7");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert!(matches!(outcome.result, Err(Error::ScriptFailed { status: 7, .. })));
    assert!(outcome.state.is_aborted());
}

struct Discs(PathBuf);

impl MediaResolver for Discs {
    fn mount_point(&self, cdromid: &str) -> Option<PathBuf> {
        (cdromid == "disc2").then(|| self.0.clone())
    }
}

#[test]
fn test_files_from_second_disc() {
    let fx = Fixture::new();
    let disc = fx.source.parent().unwrap().join("disc2");
    write(&disc, "music.ogg", b"ogg data");

    let mut tree = OptionTree::new();
    let base = tree
        .add(tree.root(), "option")
        .attr("install", "true")
        .attr("cdromid", "disc2")
        .id();
    tree.add(base, "files").text("music.ogg");

    let options = fx.options();
    let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
    let resolver = Discs(disc.clone());
    let mut state = InstallState::new();
    let mut progress = StatisticsProgress::new();
    let written = Installer::new(&registry, &options)
        .media(&resolver)
        .install(&tree, &Selection::new(), &mut state, &mut progress)
        .unwrap();
    assert_eq!(written, 8);
    assert_eq!(fs::read(fx.target.join("music.ogg")).unwrap(), b"ogg data");
}

#[test]
fn test_keepdirs_and_destination_path() {
    let fx = Fixture::new();
    fx.add("share/sounds/a.wav", b"wav");

    let mut tree = OptionTree::new();
    let base = tree.add(tree.root(), "option").attr("install", "true").id();
    tree.add(base, "files").attr("keepdirs", "true").attr("path", "lib").text("share/sounds/a.wav");

    let outcome = run(&tree, &Selection::new(), &fx.options());
    assert_accounting(&outcome);
    assert!(Path::new(&fx.target.join("lib/share/sounds/a.wav")).exists());
}
