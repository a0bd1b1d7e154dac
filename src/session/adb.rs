use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::DeviceConfig;
use crate::error::{AdbFsError, Result};
use crate::path::shell_quote;

use super::batch;
use super::{RemoteFailure, Reply, Session};

/// Session backed by the `adb` executable
///
/// Every call spawns a fresh `adb` process; nothing is kept open between
/// calls. Each process is bounded by `timeout` and killed if it overruns.
#[derive(Debug, Clone)]
pub struct AdbSession {
    adb_path: PathBuf,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbSession {
    pub fn new(adb_path: impl Into<PathBuf>, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
            timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.adb_path.clone(),
            config.serial.clone(),
            config.command_timeout,
        )
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    /// Spawn adb, feed it `stdin` and collect its output within the deadline
    async fn execute(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        let label = format!("adb {}", args.join(" "));
        trace!("exec: {}", label);

        let mut child = self
            .command(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AdbFsError::DeviceUnavailable(format!(
                    "failed to start {}: {}",
                    self.adb_path.display(),
                    e
                ))
            })?;

        let run = async move {
            if let (Some(data), Some(mut handle)) = (stdin, child.stdin.take()) {
                // adb exits early when no device is attached; its stderr says why
                if let Err(e) = handle.write_all(data).await {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                // Closing stdin signals EOF to the remote shell
                drop(handle);
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(AdbFsError::Timeout {
                command: label,
                after: self.timeout,
            }),
        }
    }

    /// Reject outputs where adb itself failed, classifying against `path`
    fn check(output: &Output, path: &str) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        if text.trim().is_empty() {
            text = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        match RemoteFailure::classify(&text) {
            RemoteFailure::Other(msg) if msg.is_empty() => Err(AdbFsError::Remote(format!(
                "{}: adb exited with {}",
                path, output.status
            ))),
            failure => Err(failure.into_error(path)),
        }
    }
}

#[async_trait]
impl Session for AdbSession {
    async fn run_batch(&self, commands: &[String]) -> Result<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        for command in commands {
            debug!("adb shell: {}", command);
        }
        let script = batch::render_script(commands);
        let output = self.execute(&["shell"], Some(script.as_bytes())).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && !stdout.contains(batch::END_OF_COMMAND) {
            Self::check(&output, "adb shell")?;
        }
        batch::parse_framed(commands, &stdout)
    }

    async fn read_raw(&self, path: &str) -> Result<Bytes> {
        debug!("adb exec-out cat {}", path);
        let command = format!("cat {}", shell_quote(path));
        let output = self.execute(&["exec-out", &command], None).await?;
        Self::check(&output, path)?;
        Ok(Bytes::from(output.stdout))
    }

    async fn write_raw(&self, path: &str, data: Bytes) -> Result<()> {
        debug!("adb shell cat > {} ({} bytes)", path, data.len());
        let command = format!("cat > {}", shell_quote(path));
        let output = self.execute(&["shell", &command], Some(&data)).await?;
        Self::check(&output, path)
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
        debug!("adb pull {} {}", remote, local.display());
        let local = local.to_string_lossy();
        let output = self.execute(&["pull", remote, &local], None).await?;
        Self::check(&output, remote)
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("adb push {} {}", local.display(), remote);
        let local = local.to_string_lossy();
        let output = self.execute(&["push", &local, remote], None).await?;
        Self::check(&output, remote)
    }

    async fn wait_for_device(&self) -> Result<()> {
        debug!("adb wait-for-device");
        let output = self.execute(&["wait-for-device"], None).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AdbFsError::DeviceUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn description(&self) -> String {
        match self.serial() {
            Some(serial) => format!("adb device {}", serial),
            None => "adb default device".to_string(),
        }
    }
}
