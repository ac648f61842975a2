//! CLI tool for installkit codecs and conditions.

mod commands;
mod exit_codes;
mod progress;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Installer archive and condition tool
#[derive(Parser)]
#[command(name = "installkit")]
#[command(author, version, about = "Installer archive and condition tool", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress progress output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an archive with the codec matching its suffix (alias: x)
    #[command(alias = "x")]
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,

        /// Expected MD5 of the archive
        #[arg(long)]
        md5sum: Option<String>,

        /// Permission override for extracted files (octal)
        #[arg(long)]
        mode: Option<String>,

        /// Relocate package contents into the output directory
        #[arg(long)]
        relocate: bool,

        /// Never use the platform package tool
        #[arg(long)]
        manual_rpm: bool,

        /// Rewrite existing files in place
        #[arg(long)]
        in_place: bool,
    },

    /// Print the estimated uncompressed size of archives (alias: s)
    #[command(alias = "s")]
    Size {
        /// Archive files
        #[arg(required = true)]
        archives: Vec<PathBuf>,
    },

    /// Evaluate a condition expression (alias: e)
    #[command(alias = "e")]
    Eval {
        /// Expression such as `+(Linux,!musl)`
        expr: String,

        /// Define a boolean, `NAME=true` or `NAME=false`
        #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
        defines: Vec<String>,

        /// Define a boolean from a shell command's exit status
        #[arg(short = 's', long = "script", value_name = "NAME=COMMAND")]
        scripts: Vec<String>,
    },

    /// Show the detected platform
    Platform,

    /// List the registered codecs
    Codecs,
}

fn main() {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted");
            std::process::exit(exit_codes::USER_INTERRUPT);
        }
    })
    .ok();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Extract {
            archive,
            output,
            md5sum,
            mode,
            relocate,
            manual_rpm,
            in_place,
        } => commands::extract(&commands::ExtractConfig {
            archive_path: &archive,
            output_dir: &output,
            md5sum,
            mode,
            relocate,
            manual_rpm,
            in_place,
            quiet: cli.quiet,
            interrupted,
        }),

        Commands::Size { archives } => commands::size(&archives),

        Commands::Eval {
            expr,
            defines,
            scripts,
        } => commands::eval(&expr, &defines, &scripts),

        Commands::Platform => commands::platform(),

        Commands::Codecs => commands::codecs(),
    };

    std::process::exit(exit_code.code());
}
