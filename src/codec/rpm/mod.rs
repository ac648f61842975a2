//! RPM package codec.
//!
//! The package header supplies name, version, release, the declared
//! install size, relocation prefixes, the payload compressor and the
//! embedded scripts. Installation takes one of two paths:
//!
//! - **Tool**: when the package database under the rpm root is writable,
//!   an `rpm` executable is on `PATH` and manual extraction is not forced,
//!   the package is handed to `rpm -U` (see [`tool`]).
//! - **Manual**: the pre-install script runs, the CPIO payload is extracted
//!   through the CPIO codec, the post-install script runs, and the
//!   uninstall scripts are stashed in the install state.
//!
//! With the node's `relocate` flag the package's first relocation prefix
//! (else `/usr`) is mapped onto the destination directory. Without it,
//! files land under the configured rpm root.

pub(crate) mod header;
mod tool;

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::cpio::{CpioReader, extract_stream};
use super::{Codec, CodecInfo, CopyContext, verify_source_md5};
use crate::install::script::run_shell;
use crate::install::{PackageRecord, ScriptPhase, UninstallScript};
use crate::safety::ResourceLimits;
use crate::stream::InputStream;
use crate::{Error, Result};

use header::{
    Header, HeaderReader, TAG_LONGSIZE, TAG_NAME, TAG_PAYLOADCOMPRESSOR, TAG_POSTIN, TAG_POSTUN,
    TAG_PREFIXES, TAG_PREIN, TAG_PREUN, TAG_RELEASE, TAG_SIZE, TAG_VERSION,
};
use tool::{RpmTool, ToolFlags};

const INFO: CodecInfo = CodecInfo {
    name: "rpm",
    version: "1.0",
    author: "installkit",
    suffixes: &[".rpm"],
};

/// Relocation prefix used when a package declares none.
const DEFAULT_PREFIX: &str = "/usr";

/// Package metadata read from the main header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpmPackage {
    /// Package name.
    pub name: String,
    /// Version.
    pub version: String,
    /// Release.
    pub release: String,
    /// Declared installed size in bytes.
    pub size: u64,
    /// Relocation prefixes.
    pub prefixes: Vec<String>,
    /// Payload compressor name; gzip when absent.
    pub compressor: String,
    /// Pre-install script.
    pub prein: Option<String>,
    /// Post-install script.
    pub postin: Option<String>,
    /// Pre-uninstall script.
    pub preun: Option<String>,
    /// Post-uninstall script.
    pub postun: Option<String>,
}

impl RpmPackage {
    fn from_header(header: &Header) -> Self {
        let script = |tag| header.string(tag).filter(|s| !s.trim().is_empty());
        Self {
            name: header.string(TAG_NAME).unwrap_or_default(),
            version: header.string(TAG_VERSION).unwrap_or_default(),
            release: header.string(TAG_RELEASE).unwrap_or_default(),
            size: header
                .int(TAG_LONGSIZE)
                .or_else(|| header.int(TAG_SIZE))
                .unwrap_or(0),
            prefixes: header.strings(TAG_PREFIXES),
            compressor: header
                .string(TAG_PAYLOADCOMPRESSOR)
                .unwrap_or_else(|| "gzip".to_string()),
            prein: script(TAG_PREIN),
            postin: script(TAG_POSTIN),
            preun: script(TAG_PREUN),
            postun: script(TAG_POSTUN),
        }
    }

    /// Reads lead, signature and main header, leaving `reader` at the
    /// payload.
    pub(crate) fn read<R: Read>(
        reader: &mut R,
        archive: &Path,
        limits: &ResourceLimits,
    ) -> Result<Self> {
        let mut headers = HeaderReader::new(reader, archive, limits);
        headers.lead()?;
        headers.header(true)?;
        let main = headers.header(false)?;
        let package = Self::from_header(&main);
        log::debug!(
            "rpm {}-{}-{}: {} bytes, payload {}",
            package.name,
            package.version,
            package.release,
            package.size,
            package.compressor
        );
        Ok(package)
    }

    /// First relocation prefix, or `/usr`.
    pub fn relocation_prefix(&self) -> &str {
        self.prefixes
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_PREFIX)
    }
}

/// Wraps the payload in its decompressor.
fn payload_decoder<'r, R: Read + 'r>(compressor: &str, payload: R) -> Result<Box<dyn Read + 'r>> {
    match compressor {
        "gzip" => Ok(Box::new(flate2::read::MultiGzDecoder::new(payload))),
        #[cfg(feature = "bzip2")]
        "bzip2" => Ok(Box::new(bzip2::read::MultiBzDecoder::new(payload))),
        #[cfg(feature = "xz")]
        "xz" => Ok(Box::new(lzma_rust2::XzReader::new(payload, true))),
        #[cfg(feature = "zstd")]
        "zstd" => Ok(Box::new(zstd::stream::read::Decoder::new(payload)?)),
        other => Err(Error::UnsupportedMethod {
            method: format!("rpm payload compressor '{}'", other),
        }),
    }
}

/// Maps a payload path to its path under the extraction root.
///
/// Payload names look like `./usr/bin/tool`. When relocating, only names
/// under `prefix` are kept, with the prefix removed.
fn relocate_name(name: &str, prefix: Option<&str>) -> Option<String> {
    let name = name.trim_start_matches("./").trim_start_matches('/');
    let Some(prefix) = prefix else {
        return Some(name.to_string());
    };
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(name.to_string());
    }
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(String::new());
    }
    rest.strip_prefix('/').map(str::to_string)
}

/// RPM package codec.
#[derive(Debug, Clone)]
pub struct RpmCodec {
    limits: ResourceLimits,
}

impl RpmCodec {
    /// Creates the codec with the given sanity ceilings.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// Reads the package metadata of `path`.
    pub fn package(&self, path: &Path) -> Result<RpmPackage> {
        let mut stream = InputStream::open_raw(path)?;
        RpmPackage::read(&mut stream, path, &self.limits)
    }

    fn install_manually<R: Read>(
        &self,
        ctx: &mut CopyContext<'_>,
        path: &Path,
        package: &RpmPackage,
        payload: R,
        dest: &Path,
    ) -> Result<u64> {
        let relocate = ctx.flag("relocate");
        let (root, prefix) = if relocate {
            (dest.to_path_buf(), Some(package.relocation_prefix()))
        } else {
            (ctx.options.rpm_root.clone(), None)
        };
        let install_prefix: OsString = if relocate {
            dest.as_os_str().to_os_string()
        } else {
            OsString::from(package.relocation_prefix())
        };
        let env = [("RPM_INSTALL_PREFIX", install_prefix)];
        let shell = ctx.options.script_shell.clone();

        if let Some(script) = &package.prein {
            run_shell(&shell, &format!("{} %pre", package.name), script, &env)?;
        }

        let decoder = payload_decoder(&package.compressor, payload)?;
        let mut reader = CpioReader::new(decoder, path, &self.limits);
        let map = |name: &str| {
            let mapped = relocate_name(name, prefix);
            if mapped.is_none() {
                log::warn!("Skipping '{}' outside relocation prefix", name);
            }
            mapped
        };
        let written = extract_stream(ctx, &mut reader, &root, &map)?;

        if let Some(script) = &package.postin {
            run_shell(&shell, &format!("{} %post", package.name), script, &env)?;
        }
        for (phase, body) in [
            (ScriptPhase::PreUninstall, &package.preun),
            (ScriptPhase::PostUninstall, &package.postun),
        ] {
            if let Some(body) = body {
                ctx.state.add_uninstall_script(UninstallScript {
                    package: package.name.clone(),
                    phase,
                    body: body.clone(),
                });
            }
        }
        ctx.state.add_package(PackageRecord {
            name: package.name.clone(),
            version: package.version.clone(),
            release: package.release.clone(),
            via_tool: false,
            autoremove: ctx.flag("autoremove"),
        });
        Ok(written)
    }
}

impl Default for RpmCodec {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

impl Codec for RpmCodec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn size(&self, path: &Path) -> Result<u64> {
        Ok(self.package(path)?.size)
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let mut stream = InputStream::open_raw(path)?;
        let package = RpmPackage::read(&mut stream, path, &self.limits)?;
        self.limits.check_entry_size("package size", package.size)?;

        if let Some(tool) = RpmTool::locate(ctx.options) {
            let flags = ToolFlags {
                nodeps: ctx.flag("nodeps"),
                relocate: ctx
                    .flag("relocate")
                    .then(|| (package.relocation_prefix().to_string(), PathBuf::from(dest))),
            };
            return tool.install(ctx, path, &package, &flags);
        }
        self.install_manually(ctx, path, &package, stream, dest)
    }
}
