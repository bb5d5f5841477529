//! Tunnel script invocation
//!
//! The tunnel itself is an external script (autossh/expect based) invoked as
//! `<script> <action> -h <host> -l <local> -r <remote> -u <user> [-c <password>]`.
//! Arguments are passed as argv, never spliced into a shell command string,
//! and every run is bounded by a timeout that kills a hung process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::status::TunnelAction;
use crate::config::{Configuration, PASSWORD_MASK};

/// Script invocation errors
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Tunnel script not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to spawn tunnel script: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Tunnel script '{action}' timed out after {}s", timeout.as_secs())]
    TimedOut {
        action: TunnelAction,
        timeout: Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flag-encoded tunnel parameters
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelParams {
    pub host: String,
    pub local_port: String,
    pub remote_port: String,
    pub username: String,
    pub password: String,
}

impl TunnelParams {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            host: config.host.clone(),
            local_port: config.local_port.clone(),
            remote_port: config.remote_port.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Replace the password, e.g. with one freshly recovered from the keychain
    pub fn with_password(mut self, password: String) -> Self {
        self.password = password;
        self
    }

    /// Script arguments following the action token
    pub fn args(&self, action: TunnelAction) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            self.host.clone(),
            "-l".to_string(),
            self.local_port.clone(),
            "-r".to_string(),
            self.remote_port.clone(),
            "-u".to_string(),
            self.username.clone(),
        ];
        if action.sends_password() {
            args.push("-c".to_string());
            args.push(self.password.clone());
        }
        args
    }

    /// Printable form with the password masked, for logs
    pub fn masked(&self, action: TunnelAction) -> String {
        let mut line = format!(
            "-h {} -l {} -r {} -u {}",
            self.host, self.local_port, self.remote_port, self.username
        );
        if action.sends_password() {
            line.push_str(" -c ");
            line.push_str(PASSWORD_MASK);
        }
        line
    }
}

impl std::fmt::Debug for TunnelParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked(TunnelAction::Start))
    }
}

/// Outcome of one script invocation
///
/// `success` reflects the exit code only. `output` is stdout followed by
/// stderr, trimmed, or an explanation when the script could not be run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Trimmed stdout alone, which carries the status code
    pub stdout: String,
    /// Stdout then stderr; the two streams are captured separately, not interleaved
    pub output: String,
}

impl ScriptOutput {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            output: message.into(),
        }
    }
}

/// Runs the external tunnel script
#[async_trait]
pub trait TunnelScript: Send + Sync {
    /// Run `action` to completion. Never fails: problems are reported
    /// through `ScriptOutput::success` and `ScriptOutput::output`.
    async fn run(&self, action: TunnelAction, params: &TunnelParams) -> ScriptOutput;
}

/// Runs the script through a shell interpreter as a child process
#[derive(Debug, Clone)]
pub struct ShellScript {
    shell: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ShellScript {
    pub fn new(shell: impl Into<PathBuf>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
            timeout,
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script
    }

    async fn execute(
        &self,
        action: TunnelAction,
        params: &TunnelParams,
    ) -> Result<ScriptOutput, ScriptError> {
        if tokio::fs::metadata(&self.script).await.is_err() {
            return Err(ScriptError::NotFound(self.script.clone()));
        }

        tracing::info!(
            "Running tunnel script: {} {}",
            action,
            params.masked(action)
        );

        let child = Command::new(&self.shell)
            .arg(&self.script)
            .arg(action.as_str())
            .args(params.args(action))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ScriptError::Spawn)?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScriptError::TimedOut {
                    action,
                    timeout: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        let result = ScriptOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: stdout.trim().to_string(),
            output: combined.trim().to_string(),
        };

        tracing::debug!(
            "Tunnel script '{}' exited with {:?}: {}",
            action,
            result.exit_code,
            result.output
        );
        Ok(result)
    }
}

#[async_trait]
impl TunnelScript for ShellScript {
    async fn run(&self, action: TunnelAction, params: &TunnelParams) -> ScriptOutput {
        match self.execute(action, params).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Tunnel script '{}' failed: {}", action, e);
                ScriptOutput::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TunnelParams {
        TunnelParams::from_config(&Configuration::new("h", "1080", "2222", "u", "secret"))
    }

    #[test]
    fn test_args_per_action() {
        let p = params();
        assert_eq!(
            p.args(TunnelAction::Start),
            vec!["-h", "h", "-l", "1080", "-r", "2222", "-u", "u", "-c", "secret"]
        );
        assert_eq!(
            p.args(TunnelAction::Stop),
            vec!["-h", "h", "-l", "1080", "-r", "2222", "-u", "u"]
        );
    }

    #[test]
    fn test_masked_hides_password() {
        let p = params();
        assert_eq!(
            p.masked(TunnelAction::Status),
            "-h h -l 1080 -r 2222 -u u -c [OCULTA]"
        );
        assert!(!format!("{:?}", p).contains("secret"));
    }

    #[tokio::test]
    async fn test_missing_script_reports_failure() {
        let script = ShellScript::new("/bin/sh", "/nonexistent/flexocks.sh", Duration::from_secs(5));
        let output = script.run(TunnelAction::Status, &params()).await;
        assert!(!output.success);
        assert!(output.output.contains("not found"));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use tempfile::TempDir;

        fn write_script(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("flexocks.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_status_output_and_exit_code() {
            let dir = TempDir::new().unwrap();
            let path = write_script(&dir, "echo '  0 '\nexit 0");
            let script = ShellScript::new("/bin/sh", path, Duration::from_secs(5));

            let output = script.run(TunnelAction::Status, &params()).await;
            assert!(output.success);
            assert_eq!(output.exit_code, Some(0));
            assert_eq!(output.stdout, "0");
        }

        #[tokio::test]
        async fn test_receives_argv() {
            let dir = TempDir::new().unwrap();
            let path = write_script(&dir, "echo \"$@\"");
            let script = ShellScript::new("/bin/sh", path, Duration::from_secs(5));

            let p = params().with_password("p w;$(rm -rf x)".into());
            let output = script.run(TunnelAction::Start, &p).await;
            assert_eq!(
                output.stdout,
                "start -h h -l 1080 -r 2222 -u u -c p w;$(rm -rf x)"
            );
        }

        #[tokio::test]
        async fn test_nonzero_exit_appends_stderr() {
            let dir = TempDir::new().unwrap();
            let path = write_script(&dir, "echo out\necho err >&2\nexit 3");
            let script = ShellScript::new("/bin/sh", path, Duration::from_secs(5));

            let output = script.run(TunnelAction::Stop, &params()).await;
            assert!(!output.success);
            assert_eq!(output.exit_code, Some(3));
            assert_eq!(output.stdout, "out");
            assert_eq!(output.output, "out\nerr");
        }

        #[tokio::test]
        async fn test_hung_script_is_killed() {
            let dir = TempDir::new().unwrap();
            let path = write_script(&dir, "sleep 30");
            let script = ShellScript::new("/bin/sh", path, Duration::from_millis(200));

            let started = std::time::Instant::now();
            let output = script.run(TunnelAction::Status, &params()).await;
            assert!(!output.success);
            assert!(output.output.contains("timed out"));
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
