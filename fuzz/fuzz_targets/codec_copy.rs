//! Fuzz target feeding arbitrary bytes to every file-based codec.
//!
//! The first byte picks the codec; the rest is written to a scratch
//! archive and extracted into a scratch directory.
//!
//! Run with: cargo +nightly fuzz run codec_copy

#![no_main]

use installkit::install::{InstallOptions, InstallState};
use installkit::{CodecRegistry, CopyContext, NoProgress, ResourceLimits};
use libfuzzer_sys::fuzz_target;

const NAMES: &[&str] = &["f.tar", "f.tar.gz", "f.cpio", "f.zip", "f.uz2", "f.rpm"];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let archive = dir.path().join(NAMES[selector as usize % NAMES.len()]);
    if std::fs::write(&archive, body).is_err() {
        return;
    }
    let dest = dir.path().join("out");

    let limits = ResourceLimits::default()
        .max_entry_size(1 << 20)
        .max_header_size(1 << 20);
    let registry = CodecRegistry::with_builtin_codecs(limits);
    let Some(codec) = registry.find(&archive) else {
        return;
    };
    let _ = codec.size(&archive);

    let options = InstallOptions::new(&dest).force_manual_rpm(true);
    let mut state = InstallState::new();
    let mut progress = NoProgress;
    let mut ctx = CopyContext::new("fuzz", None, &options, &mut state, &mut progress);
    let _ = codec.copy(&mut ctx, &archive, &dest);
});
