//! Command implementations for the CLI tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use installkit::progress::format_bytes_iec;
use installkit::{
    BooleanRegistry, CodecRegistry, CopyContext, InstallOptions, InstallState, OptionTree,
    Platform, ProgressReporter, ResourceLimits,
};

use crate::exit_codes::{ExitCode, error_to_exit_code};
use crate::progress::CliProgress;

/// Configuration for the extract command.
pub struct ExtractConfig<'a> {
    pub archive_path: &'a Path,
    pub output_dir: &'a Path,
    pub md5sum: Option<String>,
    pub mode: Option<String>,
    pub relocate: bool,
    pub manual_rpm: bool,
    pub in_place: bool,
    pub quiet: bool,
    pub interrupted: Arc<AtomicBool>,
}

fn registry() -> CodecRegistry {
    CodecRegistry::with_builtin_codecs(ResourceLimits::default())
}

/// Extract command implementation
pub fn extract(config: &ExtractConfig<'_>) -> ExitCode {
    let registry = registry();
    let Some(codec) = registry.find(config.archive_path) else {
        eprintln!(
            "Error: no codec handles '{}'",
            config.archive_path.display()
        );
        return ExitCode::BadArgs;
    };

    // The flags travel as attributes of a one-node listing, like a `files`
    // element of an option tree.
    let mut tree = OptionTree::new();
    let mut node = tree.add(tree.root(), "files");
    if let Some(md5) = &config.md5sum {
        node = node.attr("md5sum", md5.as_str());
    }
    if let Some(mode) = &config.mode {
        node = node.attr("mode", mode.as_str());
    }
    if config.relocate {
        node = node.attr("relocate", "true");
    }
    let listing = node.id();

    let options = InstallOptions::new(config.output_dir)
        .force_manual_rpm(config.manual_rpm)
        .overwrite_in_place(config.in_place);

    if let Err(e) = std::fs::create_dir_all(config.output_dir) {
        eprintln!("Error creating output directory: {}", e);
        return ExitCode::IoError;
    }

    let mut progress = CliProgress::new(config.quiet, Arc::clone(&config.interrupted));
    match codec.size(config.archive_path) {
        Ok(total) => progress.on_total(total),
        Err(e) => log::warn!("Cannot size '{}': {}", config.archive_path.display(), e),
    }

    let mut state = InstallState::new();
    let label = config.archive_path.display().to_string();
    let result = {
        let mut ctx = CopyContext::new(
            &label,
            Some(tree.node(listing)),
            &options,
            &mut state,
            &mut progress,
        );
        codec.copy(&mut ctx, config.archive_path, config.output_dir)
    };

    match result {
        Ok(written) => {
            progress.finish_with_message("Done");
            if !config.quiet {
                println!(
                    "Extracted {} files ({}) with the {} codec",
                    state.files().count(),
                    format_bytes_iec(written),
                    codec.info().name
                );
            }
            if progress.warnings() > 0 {
                ExitCode::Warning
            } else {
                ExitCode::Success
            }
        }
        Err(e) => {
            progress.abandon();
            eprintln!("Error: {}", e);
            if state.files().next().is_some() {
                eprintln!(
                    "{} files were written before the failure",
                    state.files().count()
                );
            }
            error_to_exit_code(&e)
        }
    }
}

/// Size command implementation
pub fn size(archives: &[PathBuf]) -> ExitCode {
    let registry = registry();
    let mut code = ExitCode::Success;
    let mut total = 0u64;

    for archive in archives {
        let Some(codec) = registry.find(archive) else {
            eprintln!("{}: no codec", archive.display());
            code = ExitCode::Warning;
            continue;
        };
        match codec.size(archive) {
            Ok(bytes) => {
                total = total.saturating_add(bytes);
                println!("{:>12}  {}", format_bytes_iec(bytes), archive.display());
            }
            Err(e) => {
                eprintln!("{}: {}", archive.display(), e);
                code = error_to_exit_code(&e);
            }
        }
    }
    if archives.len() > 1 {
        println!("{:>12}  total", format_bytes_iec(total));
    }
    code
}

fn split_definition(definition: &str) -> Option<(&str, &str)> {
    let (name, value) = definition.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some((name, value))
}

/// Eval command implementation
///
/// Exits 0 when the expression is true and 1 when it is false.
pub fn eval(expr: &str, defines: &[String], scripts: &[String]) -> ExitCode {
    let platform = Platform::detect();
    let mut booleans = BooleanRegistry::with_platform(&platform);

    for definition in defines {
        let value = match split_definition(definition) {
            Some((name, "true" | "1" | "yes")) => (name, true),
            Some((name, "false" | "0" | "no")) => (name, false),
            _ => {
                eprintln!("Error: expected NAME=true or NAME=false, got '{}'", definition);
                return ExitCode::BadArgs;
            }
        };
        booleans.set(value.0, value.1);
    }
    for definition in scripts {
        let Some((name, script)) = split_definition(definition) else {
            eprintln!("Error: expected NAME=COMMAND, got '{}'", definition);
            return ExitCode::BadArgs;
        };
        booleans.register_script(name, script, true);
    }

    if let Err(e) = booleans.parse(expr) {
        eprintln!("Error: {}", e);
        return error_to_exit_code(&e);
    }
    if booleans.eval(expr) {
        println!("true");
        ExitCode::Success
    } else {
        println!("false");
        ExitCode::Warning
    }
}

/// Platform command implementation
pub fn platform() -> ExitCode {
    let platform = Platform::detect();
    println!("os:     {}", platform.os);
    println!("arch:   {}", platform.arch);
    println!("libc:   {}", platform.libc);
    println!("distro: {}", platform.distro.as_deref().unwrap_or("unknown"));
    ExitCode::Success
}

/// Codecs command implementation
pub fn codecs() -> ExitCode {
    let registry = registry();
    for codec in registry.codecs() {
        let info = codec.info();
        println!(
            "{:<6} {:<6} {}",
            info.name,
            info.version,
            info.suffixes.join(" ")
        );
    }
    ExitCode::Success
}
