//! Suffix-keyed codec registry.
//!
//! The registry owns every registered codec from registration until
//! [`CodecRegistry::teardown`]. Codecs registered later take precedence
//! over earlier ones with an overlapping suffix.
//!
//! ```rust
//! use installkit::codec::CodecRegistry;
//! use installkit::safety::ResourceLimits;
//! use std::path::Path;
//!
//! let registry = CodecRegistry::with_builtin_codecs(ResourceLimits::default());
//! assert_eq!(registry.find(Path::new("data.tar")).map(|c| c.info().name), Some("tar"));
//! assert!(registry.find(Path::new("DATA.TAR")).is_none());
//! assert_eq!(registry.teardown(), 6);
//! ```

use std::path::Path;

use super::Codec;
use super::cpio::CpioCodec;
use super::rar::RarCodec;
use super::rpm::RpmCodec;
use super::tar::TarCodec;
use super::uz2::Uz2Codec;
use super::zip::ZipCodec;
use crate::safety::ResourceLimits;

/// A handle to a dynamically loaded module that provided a codec.
///
/// The registry only releases it at teardown; loading is the caller's
/// business.
pub trait ModuleHandle {
    /// Module name or path, for logging.
    fn name(&self) -> &str;

    /// Releases the module. Returns false if unloading failed.
    fn close(self: Box<Self>) -> bool;
}

struct Entry {
    codec: Box<dyn Codec>,
    module: Option<Box<dyn ModuleHandle>>,
}

/// Registry of codecs keyed by file-name suffix.
#[derive(Default)]
pub struct CodecRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.codec.info().name))
            .finish()
    }
}

impl CodecRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in codec.
    pub fn with_builtin_codecs(limits: ResourceLimits) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RarCodec::new(limits)), None);
        registry.register(Box::new(RpmCodec::new(limits)), None);
        registry.register(Box::new(Uz2Codec::new(limits)), None);
        registry.register(Box::new(CpioCodec::new(limits)), None);
        registry.register(Box::new(TarCodec::new(limits)), None);
        registry.register(Box::new(ZipCodec::new(limits)), None);
        registry
    }

    /// Registers a codec ahead of every existing one and runs its `init`
    /// hook.
    ///
    /// A failed `init` is logged and the codec is still registered; the
    /// hook's result is returned.
    pub fn register(
        &mut self,
        mut codec: Box<dyn Codec>,
        module: Option<Box<dyn ModuleHandle>>,
    ) -> bool {
        let ok = codec.init();
        let info = codec.info();
        if ok {
            log::debug!(
                "Registered codec '{}' {} by {} for {:?}",
                info.name,
                info.version,
                info.author,
                info.suffixes
            );
        } else {
            log::warn!("Codec '{}' failed to initialize", info.name);
        }
        self.entries.insert(0, Entry { codec, module });
        ok
    }

    /// Returns the first codec with a suffix that ends `path`.
    ///
    /// Matching is byte-exact and case-sensitive.
    pub fn find(&self, path: &Path) -> Option<&dyn Codec> {
        let bytes = path.as_os_str().as_encoded_bytes();
        self.entries
            .iter()
            .find(|e| {
                e.codec
                    .info()
                    .suffixes
                    .iter()
                    .any(|s| bytes.ends_with(s.as_bytes()))
            })
            .map(|e| e.codec.as_ref())
    }

    /// Number of registered codecs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no codec is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over registered codecs, most recent first.
    pub fn codecs(&self) -> impl Iterator<Item = &dyn Codec> {
        self.entries.iter().map(|e| e.codec.as_ref())
    }

    /// Runs every codec's `free` hook and releases module handles.
    ///
    /// Returns the number of codecs that freed successfully.
    pub fn teardown(self) -> usize {
        let mut freed = 0;
        for Entry { mut codec, module } in self.entries {
            if codec.free() {
                freed += 1;
            } else {
                log::warn!("Codec '{}' failed to shut down", codec.info().name);
            }
            drop(codec);
            if let Some(module) = module {
                let name = module.name().to_string();
                if !module.close() {
                    log::warn!("Failed to unload codec module '{}'", name);
                }
            }
        }
        freed
    }
}
