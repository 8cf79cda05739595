//! External tool invocation
//!
//! Privileged volume operations shell out to system tools (`cryptsetup`, `mount`, ...).
//! All invocations go through a [`CommandRunner`] so the LUKS state machine can be
//! driven against a fake host in tests.
//!
//! The system runner never spawns helper threads: tool output is captured into
//! anonymous temp files and the child is polled until it exits, the deadline passes,
//! or the operation is cancelled (in which case the child is killed).

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// How often a running child is polled
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A program plus its arguments
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Invocation {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Arguments as UTF-8 (lossy), for matching and logging
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr and stdout joined for error reports
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{}\n{}", stderr, stdout),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (true, true) => "no output".to_string(),
        }
    }
}

/// Host interface used by volume strategies
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion (or until the deadline trips)
    ///
    /// A non-zero exit is not an error here; see [`run_checked`].
    fn run(&self, invocation: &Invocation, deadline: &Deadline) -> Result<CommandOutput>;

    /// Whether `program` resolves on PATH
    fn has_program(&self, program: &str) -> bool;

    /// Whether the device-mapper control node is usable
    fn device_mapper_accessible(&self) -> bool;
}

/// Run and turn a non-zero exit into `Error::Command` carrying the tool's output
pub fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    deadline: &Deadline,
) -> Result<CommandOutput> {
    let output = runner.run(invocation, deadline)?;
    if !output.success() {
        return Err(Error::Command {
            program: invocation.program().to_string(),
            code: output.code,
            output: output.diagnostics(),
        });
    }
    Ok(output)
}

/// Runs tools on the local host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn terminate(child: &mut Child) {
        if let Err(e) = child.kill() {
            warn!("Failed to kill child process {}: {}", child.id(), e);
        }
        let _ = child.wait();
    }

    fn read_capture(file: &mut File) -> Result<String> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation, deadline: &Deadline) -> Result<CommandOutput> {
        if deadline.is_cancelled() {
            return Err(Error::Cancelled(invocation.program().to_string()));
        }
        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded(invocation.program().to_string()));
        }

        debug!("Running {}", invocation);

        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut child = Command::new(invocation.program())
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .map_err(|e| Error::Command {
                program: invocation.program().to_string(),
                code: None,
                output: format!("failed to start: {}", e),
            })?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_cancelled() {
                Self::terminate(&mut child);
                return Err(Error::Cancelled(invocation.program().to_string()));
            }
            if deadline.is_expired() {
                Self::terminate(&mut child);
                return Err(Error::DeadlineExceeded(invocation.program().to_string()));
            }
            let pause = deadline
                .remaining()
                .map(|left| left.min(POLL_INTERVAL))
                .unwrap_or(POLL_INTERVAL);
            std::thread::sleep(pause);
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: Self::read_capture(&mut stdout)?,
            stderr: Self::read_capture(&mut stderr)?,
        })
    }

    fn has_program(&self, program: &str) -> bool {
        find_on_path(program).is_some()
    }

    fn device_mapper_accessible(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            use nix::unistd::{access, AccessFlags};
            access(
                Path::new("/dev/mapper/control"),
                AccessFlags::R_OK | AccessFlags::W_OK,
            )
            .is_ok()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

/// Locate an executable on PATH
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Key material written to a private temp file for a single tool invocation.
///
/// The file is created with mode 0600, overwritten with zeros and removed on drop.
pub struct KeyFile {
    file: NamedTempFile,
    len: usize,
}

impl KeyFile {
    pub fn create(key: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new().prefix(".bibd-key-").tempfile()?;
        file.write_all(key)?;
        file.as_file().sync_all()?;
        Ok(KeyFile {
            file,
            len: key.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Overwrite the key bytes with zeros
    fn wipe(&mut self) -> std::io::Result<()> {
        let f = self.file.as_file_mut();
        f.seek(SeekFrom::Start(0))?;
        f.write_all(&vec![0u8; self.len])?;
        f.sync_all()
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(e) = self.wipe() {
            warn!("Failed to wipe key file {:?}: {}", self.file.path(), e);
        }
    }
}

/// Run `f` with the key written to a temp file that is removed afterwards,
/// whether `f` succeeds or not
pub fn with_key_file<T>(key: &[u8], f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let key_file = KeyFile::create(key)?;
    let result = f(key_file.path());
    drop(key_file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let inv = Invocation::new("cryptsetup")
            .arg("close")
            .arg("bibd-1234");
        assert_eq!(inv.to_string(), "cryptsetup close bibd-1234");
        assert_eq!(inv.args_lossy(), vec!["close", "bibd-1234"]);
    }

    #[test]
    fn test_diagnostics() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "partial\n".to_string(),
            stderr: "device busy\n".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.diagnostics(), "device busy\npartial");
        assert_eq!(CommandOutput::default().diagnostics(), "no output");
    }

    #[test]
    fn test_key_file_removed_on_success_and_error() {
        let mut seen = PathBuf::new();
        let value = with_key_file(b"0123456789abcdef", |path| {
            assert_eq!(std::fs::read(path).unwrap(), b"0123456789abcdef");
            seen = path.to_path_buf();
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        assert!(!seen.exists());

        let result: Result<()> = with_key_file(b"key", |path| {
            seen = path.to_path_buf();
            Err(Error::MountFailed("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!seen.exists());
    }

    #[test]
    fn test_key_file_wipe_zeroes_contents() {
        let mut key_file = KeyFile::create(b"0123456789abcdef").unwrap();
        key_file.wipe().unwrap();
        assert_eq!(std::fs::read(key_file.path()).unwrap(), vec![0u8; 16]);

        let path = key_file.path().to_path_buf();
        drop(key_file);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let key_file = KeyFile::create(b"secret").unwrap();
        let mode = std::fs::metadata(key_file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner;
        let inv = Invocation::new("sh").arg("-c").arg("echo out; echo err >&2; exit 3");
        let out = runner.run(&inv, &Deadline::none()).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");

        let err = run_checked(&runner, &inv, &Deadline::none()).unwrap_err();
        assert!(matches!(err, Error::Command { code: Some(3), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_deadline_kills_child() {
        let runner = SystemRunner;
        let inv = Invocation::new("sleep").arg("5");
        let started = std::time::Instant::now();
        let result = runner.run(&inv, &Deadline::after(Duration::from_millis(50)));
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_cancellation() {
        let runner = SystemRunner;
        let deadline = Deadline::none();
        deadline.cancel_handle().cancel();
        let result = runner.run(&Invocation::new("true"), &deadline);
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_missing_program() {
        assert!(!SystemRunner.has_program("definitely-not-a-real-tool-bibd"));
    }
}
