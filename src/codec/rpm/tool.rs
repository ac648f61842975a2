//! Delegation to the platform `rpm` tool.
//!
//! The tool runs `rpm -U --percent` and prints `%% <percent>` lines on
//! stdout; those drive the progress reporter. Cancelling kills the child,
//! the only way to stop a transaction the tool already owns.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command, Stdio};
use std::thread;

use super::RpmPackage;
use crate::codec::CopyContext;
use crate::install::{InstallOptions, PackageRecord};
use crate::metadata;
use crate::{Error, Result};

/// Package database directory under the rpm root.
const RPM_DB_DIR: &str = "var/lib/rpm";

/// Flags for one tool invocation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ToolFlags {
    /// Pass `--nodeps`.
    pub nodeps: bool,
    /// `--relocate <old>=<new>`.
    pub relocate: Option<(String, PathBuf)>,
}

/// A located `rpm` executable.
#[derive(Debug, Clone)]
pub(crate) struct RpmTool {
    program: PathBuf,
    root: PathBuf,
}

impl RpmTool {
    /// Returns the tool if the package database is writable and manual
    /// extraction was not forced.
    pub(crate) fn locate(options: &InstallOptions) -> Option<Self> {
        if options.force_manual_rpm {
            log::debug!("Manual rpm extraction forced");
            return None;
        }
        let db = options.rpm_root.join(RPM_DB_DIR);
        if !metadata::is_writable(&db) {
            log::warn!(
                "rpm database '{}' is not writable, extracting manually",
                db.display()
            );
            return None;
        }
        match which::which("rpm") {
            Ok(program) => Some(Self {
                program,
                root: options.rpm_root.clone(),
            }),
            Err(_) => {
                log::warn!("rpm tool not found, extracting manually");
                None
            }
        }
    }

    fn command(&self, path: &Path, flags: &ToolFlags) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-U", "--percent"]);
        if self.root != Path::new("/") {
            cmd.arg("--root").arg(&self.root);
        }
        if flags.nodeps {
            cmd.arg("--nodeps");
        }
        if let Some((old, new)) = &flags.relocate {
            let mut spec = std::ffi::OsString::from(format!("{}=", old));
            spec.push(new);
            cmd.arg("--relocate").arg(spec);
        }
        cmd.arg(path);
        cmd
    }

    /// Installs the package, returning its declared size.
    pub(crate) fn install(
        &self,
        ctx: &mut CopyContext<'_>,
        path: &Path,
        package: &RpmPackage,
        flags: &ToolFlags,
    ) -> Result<u64> {
        log::info!("Installing {} through {}", package.name, self.program.display());
        let total = package.size;
        let mut done = 0u64;
        ctx.report(path, 0, total)?;
        run_with_percent(self.command(path, flags), |percent| {
            done = ((total as f64) * percent / 100.0) as u64;
            ctx.check_cancel()?;
            ctx.report(path, done, total)
        })?;

        if done != total {
            ctx.report(path, total, total)?;
        }
        ctx.state.add_bytes(total);
        ctx.state.add_package(PackageRecord {
            name: package.name.clone(),
            version: package.version.clone(),
            release: package.release.clone(),
            via_tool: true,
            autoremove: ctx.flag("autoremove"),
        });
        Ok(total)
    }
}

/// Runs `cmd`, passing every `%%` progress line on stdout to `on_percent`.
///
/// Stderr is collected on its own thread while stdout is read, so a tool
/// writing more than a pipe buffer of diagnostics never blocks. An error
/// from `on_percent` kills the child and is returned.
fn run_with_percent(
    mut cmd: Command,
    mut on_percent: impl FnMut(f64) -> Result<()>,
) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::PackageTool(format!("{} output was not captured", program)));
    };
    let drain = thread::spawn(move || {
        let mut text = Vec::new();
        let _ = stderr.read_to_end(&mut text);
        String::from_utf8_lossy(&text).into_owned()
    });

    if let Err(err) = follow_stdout(stdout, &mut on_percent) {
        log::warn!("Killing {} after an interrupted transaction", program);
        let _ = child.kill();
        let _ = child.wait();
        // Grandchildren may still hold stderr open; the drain thread ends
        // when they do.
        return Err(err);
    }
    let status = child.wait()?;
    let stderr = drain.join().unwrap_or_default();

    if !status.success() {
        log::error!("{} failed: {}", program, stderr.trim());
        return Err(Error::PackageTool(format!(
            "{} exited with {}: {}",
            program,
            status,
            stderr.trim()
        )));
    }
    Ok(())
}

fn follow_stdout(
    stdout: ChildStdout,
    on_percent: &mut impl FnMut(f64) -> Result<()>,
) -> Result<()> {
    for line in BufReader::new(stdout).lines() {
        let line = line?;
        match parse_percent(&line) {
            Some(percent) => on_percent(percent)?,
            None => log::debug!("rpm: {}", line),
        }
    }
    Ok(())
}

/// Parses a `%% 42.000000` progress line.
fn parse_percent(line: &str) -> Option<f64> {
    let value: f64 = line.trim().strip_prefix("%%")?.trim().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("%% 42.500000"), Some(42.5));
        assert_eq!(parse_percent("  %% 100.000000 "), Some(100.0));
        assert_eq!(parse_percent("%% 250"), Some(100.0));
        assert_eq!(parse_percent("Preparing..."), None);
        assert_eq!(parse_percent("%% abc"), None);
    }

    #[test]
    fn test_command_line() {
        let tool = RpmTool {
            program: PathBuf::from("rpm"),
            root: PathBuf::from("/chroot"),
        };
        let flags = ToolFlags {
            nodeps: true,
            relocate: Some(("/usr".into(), PathBuf::from("/opt/app"))),
        };
        let cmd = tool.command(Path::new("pkg.rpm"), &flags);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-U",
                "--percent",
                "--root",
                "/chroot",
                "--nodeps",
                "--relocate",
                "/usr=/opt/app",
                "pkg.rpm"
            ]
        );
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn test_chatty_stderr_does_not_block() {
        // About 180 KiB of diagnostics before any progress line.
        let cmd = shell(
            "i=0; while [ $i -lt 4000 ]; do \
             echo 'warning: file /usr/lib/x conflicts with another package' >&2; \
             i=$((i+1)); done; echo '%% 50.0'; echo '%% 100.0'",
        );
        let mut seen = Vec::new();
        run_with_percent(cmd, |percent| {
            seen.push(percent);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![50.0, 100.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_carries_stderr() {
        let cmd = shell("echo 'error: db locked' >&2; exit 1");
        match run_with_percent(cmd, |_| Ok(())) {
            Err(Error::PackageTool(message)) => assert!(message.contains("db locked")),
            other => panic!("expected a package tool error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_the_tool() {
        let cmd = shell("echo '%% 10.0'; sleep 30 & wait; echo '%% 100.0'");
        let started = std::time::Instant::now();
        let result = run_with_percent(cmd, |_| Err(Error::Cancelled));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[test]
    fn test_forced_manual() {
        let options = InstallOptions::new("/tmp/x").force_manual_rpm(true);
        assert!(RpmTool::locate(&options).is_none());
    }
}
