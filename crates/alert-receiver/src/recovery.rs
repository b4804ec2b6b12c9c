//! Recovery script execution.
//!
//! A critical alert for a known service runs that service's pre-approved
//! script from the recovery directory. The service-to-script table is fixed
//! at startup and never built from request data. Every run passes these
//! gates in order:
//!
//! 1. The service must be in the table.
//! 2. The canonical script path must lie inside the canonical recovery directory.
//! 3. The script must be an executable regular file.
//! 4. The script runs without a shell, with captured output and a hard timeout.
//!
//! On unix each script leads its own process group, and a timeout kills the
//! whole group so nothing the script started outlives it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Default wall-clock limit for one script run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a recovery run did not succeed.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Service has no mapped script
    #[error("invalid service for recovery: {0}")]
    UnknownService(String),

    /// Mapped script does not exist
    #[error("recovery script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// Mapped script resolves outside the recovery directory
    #[error("path traversal detected for recovery script: {}", .0.display())]
    PathTraversal(PathBuf),

    /// Script exists but cannot be executed
    #[error("recovery script is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    /// Recovery directory cannot be resolved
    #[error("recovery directory unavailable: {}: {source}", .path.display())]
    Directory {
        /// Configured directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Process could not be started
    #[error("failed to run recovery script: {0}")]
    Spawn(#[source] std::io::Error),

    /// Script exited non-zero
    #[error("recovery script exited with {code:?}: {stderr}")]
    Failed {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// Script exceeded the timeout and was killed
    #[error("recovery script timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl RecoveryError {
    /// Whether the failure belongs in the per-alert error list.
    ///
    /// An alert for a service without a recovery script is not a failure of
    /// the request; everything else is.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        !matches!(self, Self::UnknownService(_))
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Service that was recovered
    pub service: String,
    /// Resolved script path
    pub script: PathBuf,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

/// Immutable service → script filename table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryScripts {
    scripts: BTreeMap<String, String>,
}

impl Default for RecoveryScripts {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RecoveryScripts {
    /// Scripts shipped with the service image.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_entries(
            ["ollama", "openwebui", "searxng"]
                .into_iter()
                .map(|service| (service.to_string(), format!("{service}-recovery.sh"))),
        )
    }

    /// Build a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            scripts: entries.into_iter().collect(),
        }
    }

    /// Services with a recovery script.
    pub fn allowed_services(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    /// Script filename for a service.
    #[must_use]
    pub fn script_for(&self, service: &str) -> Option<&str> {
        self.scripts.get(service).map(String::as_str)
    }
}

/// Runs recovery scripts from a restricted directory.
#[derive(Debug, Clone)]
pub struct RecoveryExecutor {
    dir: PathBuf,
    scripts: RecoveryScripts,
    timeout: Duration,
}

impl RecoveryExecutor {
    /// Create an executor for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, scripts: RecoveryScripts, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            scripts,
            timeout,
        }
    }

    /// Configured recovery directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run the recovery script for `service`.
    ///
    /// Every outcome is logged here; callers only decide whether to report it.
    pub async fn run(&self, service: &str) -> Result<RecoveryReport, RecoveryError> {
        let Some(filename) = self.scripts.script_for(service) else {
            error!(
                service = %service,
                allowed = ?self.scripts.allowed_services().collect::<Vec<_>>(),
                "Invalid service for recovery"
            );
            return Err(RecoveryError::UnknownService(service.to_string()));
        };

        let script = self.resolve(filename).inspect_err(|e| {
            error!(service = %service, error = %e, "Recovery script rejected");
        })?;

        info!(service = %service, script = %script.display(), "Executing recovery script");

        let mut command = Command::new(&script);
        command
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            error!(service = %service, error = %e, "Failed to start recovery script");
            RecoveryError::Spawn(e)
        })?;
        let pid = child.id();

        // Dropping the wait future on timeout kills the direct child.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(service = %service, error = %e, "Recovery script failed");
                return Err(RecoveryError::Spawn(e));
            }
            Err(_) => {
                error!(
                    service = %service,
                    timeout_secs = self.timeout.as_secs(),
                    "Recovery script timed out"
                );
                kill_process_group(pid);
                return Err(RecoveryError::TimedOut(self.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!(
                service = %service,
                code = ?output.status.code(),
                stderr = %stderr,
                "Recovery script failed"
            );
            return Err(RecoveryError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        info!(service = %service, output = %stdout, "Recovery script completed");
        if !stderr.is_empty() {
            warn!(service = %service, stderr = %stderr, "Recovery script wrote to stderr");
        }

        Ok(RecoveryReport {
            service: service.to_string(),
            script,
            stdout,
            stderr,
        })
    }

    /// Resolve a mapped filename to a canonical, contained, executable path.
    fn resolve(&self, filename: &str) -> Result<PathBuf, RecoveryError> {
        let candidate = self.dir.join(filename);

        // Only plain names may appear in a mapping entry.
        if !Path::new(filename)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(RecoveryError::PathTraversal(candidate));
        }

        let dir = self
            .dir
            .canonicalize()
            .map_err(|source| RecoveryError::Directory {
                path: self.dir.clone(),
                source,
            })?;

        let resolved = match candidate.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecoveryError::ScriptNotFound(candidate));
            }
            Err(_) => return Err(RecoveryError::NotExecutable(candidate)),
        };

        if !resolved.starts_with(&dir) {
            return Err(RecoveryError::PathTraversal(resolved));
        }

        if !is_executable(&resolved) {
            return Err(RecoveryError::NotExecutable(resolved));
        }

        Ok(resolved)
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };

    // SAFETY: killpg only sends a signal; the group was created for this script.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let e = std::io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %e, "Failed to kill recovery process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn scripts(entries: &[(&str, &str)]) -> RecoveryScripts {
        RecoveryScripts::from_entries(
            entries
                .iter()
                .map(|(s, f)| ((*s).to_string(), (*f).to_string())),
        )
    }

    #[test]
    fn test_builtin_mapping() {
        let scripts = RecoveryScripts::builtin();
        assert_eq!(
            scripts.allowed_services().collect::<Vec<_>>(),
            vec!["ollama", "openwebui", "searxng"]
        );
        assert_eq!(scripts.script_for("ollama"), Some("ollama-recovery.sh"));
        assert_eq!(scripts.script_for("postgres"), None);
    }

    #[tokio::test]
    async fn test_runs_mapped_script() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "ollama-recovery.sh", "echo restarted\necho careful >&2");

        let executor = RecoveryExecutor::new(dir.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let report = executor.run("ollama").await.unwrap();

        assert_eq!(report.stdout, "restarted");
        assert_eq!(report.stderr, "careful");
        assert!(report.script.ends_with("ollama-recovery.sh"));
    }

    #[tokio::test]
    async fn test_unknown_service_never_spawns() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        write_script(
            dir.path(),
            "unmapped-service-recovery.sh",
            &format!("touch {}", marker.display()),
        );

        let executor = RecoveryExecutor::new(dir.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let err = executor.run("unmapped-service").await.unwrap_err();

        assert!(matches!(err, RecoveryError::UnknownService(_)));
        assert!(!err.is_reportable());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_rejects_parent_dir_mapping() {
        let root = TempDir::new().unwrap();
        let recovery = root.path().join("recovery");
        fs::create_dir(&recovery).unwrap();
        write_script(root.path(), "evil.sh", "exit 0");

        let executor = RecoveryExecutor::new(
            &recovery,
            scripts(&[("ollama", "../evil.sh")]),
            DEFAULT_TIMEOUT,
        );
        let err = executor.run("ollama").await.unwrap_err();

        assert!(matches!(err, RecoveryError::PathTraversal(_)));
        assert!(err.is_reportable());
    }

    #[tokio::test]
    async fn test_rejects_symlink_escape() {
        let root = TempDir::new().unwrap();
        let recovery = root.path().join("recovery");
        fs::create_dir(&recovery).unwrap();
        let outside = write_script(root.path(), "outside.sh", "exit 0");
        std::os::unix::fs::symlink(&outside, recovery.join("ollama-recovery.sh")).unwrap();

        let executor = RecoveryExecutor::new(&recovery, RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let err = executor.run("ollama").await.unwrap_err();

        assert!(matches!(err, RecoveryError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn test_rejects_sibling_directory_prefix() {
        let root = TempDir::new().unwrap();
        let recovery = root.path().join("recovery");
        let sibling = root.path().join("recovery-evil");
        fs::create_dir(&recovery).unwrap();
        fs::create_dir(&sibling).unwrap();
        let outside = write_script(&sibling, "ollama-recovery.sh", "exit 0");
        std::os::unix::fs::symlink(&outside, recovery.join("ollama-recovery.sh")).unwrap();

        let executor = RecoveryExecutor::new(&recovery, RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let err = executor.run("ollama").await.unwrap_err();

        assert!(matches!(err, RecoveryError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn test_missing_script() {
        let dir = TempDir::new().unwrap();
        let executor = RecoveryExecutor::new(dir.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT);

        let err = executor.run("searxng").await.unwrap_err();
        assert!(matches!(err, RecoveryError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn test_not_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openwebui-recovery.sh");
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let executor = RecoveryExecutor::new(dir.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let err = executor.run("openwebui").await.unwrap_err();

        assert!(matches!(err, RecoveryError::NotExecutable(_)));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "ollama-recovery.sh", "echo broken >&2\nexit 3");

        let executor = RecoveryExecutor::new(dir.path(), RecoveryScripts::builtin(), DEFAULT_TIMEOUT);
        let err = executor.run("ollama").await.unwrap_err();

        match err {
            RecoveryError::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        write_script(
            dir.path(),
            "ollama-recovery.sh",
            &format!("sleep 2\ntouch {}", marker.display()),
        );

        let executor = RecoveryExecutor::new(
            dir.path(),
            RecoveryScripts::builtin(),
            Duration::from_millis(200),
        );
        let err = executor.run("ollama").await.unwrap_err();
        assert!(matches!(err, RecoveryError::TimedOut(_)));

        // The killed script must never reach its last line.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_script_descendants() {
        let dir = TempDir::new().unwrap();
        let subshell_marker = dir.path().join("subshell");
        let background_marker = dir.path().join("background");
        write_script(
            dir.path(),
            "ollama-recovery.sh",
            &format!(
                "(sleep 2; touch {}) &\n(sleep 2; touch {})",
                background_marker.display(),
                subshell_marker.display()
            ),
        );

        let executor = RecoveryExecutor::new(
            dir.path(),
            RecoveryScripts::builtin(),
            Duration::from_millis(200),
        );
        let started = std::time::Instant::now();
        let err = executor.run("ollama").await.unwrap_err();
        assert!(matches!(err, RecoveryError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(2));

        // Subshells and background jobs die with the script.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!subshell_marker.exists());
        assert!(!background_marker.exists());
    }
}
