//! # installkit
//!
//! The native core of a software installer: archive extraction plugins,
//! the copy/install orchestrator and the boolean condition engine that
//! decides which options apply to the host.
//!
//! ## Overview
//!
//! - [`codec`]: the [`Codec`](codec::Codec) contract and the built-in
//!   TAR, CPIO, ZIP, UZ2, RAR and RPM codecs, looked up by file-name suffix
//!   through a [`CodecRegistry`](codec::CodecRegistry).
//! - [`install`]: the [`Installer`](install::Installer) that walks an
//!   option tree, copies or extracts every selected source, installs
//!   binaries, runs scripts and records everything in an
//!   [`InstallState`](install::InstallState).
//! - [`condition`]: named booleans, script-backed booleans and the
//!   `+()` / `|()` / `^()` / `!` expression language used by `if` and
//!   `unless` attributes.
//!
//! ## Installing
//!
//! ```rust,no_run
//! use installkit::codec::CodecRegistry;
//! use installkit::condition::BooleanRegistry;
//! use installkit::install::{InstallOptions, InstallState, Installer, OptionTree, Selection};
//! use installkit::progress::StatisticsProgress;
//! use installkit::safety::ResourceLimits;
//!
//! fn main() -> installkit::Result<()> {
//!     let mut tree = OptionTree::new();
//!     let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
//!     tree.add(base, "files").text("data/*.tar.gz docs");
//!     tree.add(base, "binary").attr("symlink", "game").text("game");
//!
//!     let options = InstallOptions::new("/opt/game")
//!         .source_root("/media/cdrom")
//!         .symlinks_dir("/usr/local/bin");
//!     let booleans = BooleanRegistry::with_platform(&options.platform);
//!     let mut selection = Selection::new();
//!     selection.apply_conditions(&tree, &booleans);
//!
//!     let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
//!     let mut state = InstallState::new();
//!     let mut progress = StatisticsProgress::new();
//!     Installer::new(&registry, &options).install(&tree, &selection, &mut state, &mut progress)?;
//!     println!("installed {} bytes", state.installed_bytes());
//!     Ok(())
//! }
//! ```
//!
//! ## Safety
//!
//! Archive entry names are sanitized and resolved strictly inside the
//! destination, symlink targets are contained, and every size field read
//! from an archive is checked against [`ResourceLimits`](safety::ResourceLimits)
//! before it drives an allocation or a copy.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `bzip2` | Yes | bzip2 streams and package payloads |
//! | `xz` | No | xz package payloads |
//! | `zstd` | No | zstd package payloads |
//! | `cli` | No | The `installkit` command-line tool |

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod checksum;
pub mod codec;
pub mod condition;
pub mod error;
pub mod format;
pub mod install;
pub(crate) mod metadata;
pub mod platform;
pub mod progress;
pub mod safety;
pub mod stream;

pub use error::{Error, Result};

pub use codec::{Codec, CodecInfo, CodecRegistry, CopyContext};
pub use condition::BooleanRegistry;
pub use install::{InstallOptions, InstallState, Installer, OptionTree, Selection};
pub use platform::Platform;
pub use progress::{NoProgress, ProgressReporter, ProgressUpdate, StatisticsProgress};
pub use safety::ResourceLimits;

/// Buffer size for streaming checksum reads.
pub(crate) const READ_BUFFER_SIZE: usize = 64 * 1024;
