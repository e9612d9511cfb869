use crate::core::{
    connector::{ConnectorKind, ConnectorSpec},
    error::{NotifierError, NotifierResult},
    notification::NotificationData,
};
use chrono::SecondsFormat;
use log::debug;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Interpreter used for a script, chosen by file extension. `None` means the
/// file is executed directly and must carry its own shebang.
pub fn interpreter_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str())? {
        "sh" | "bash" => Some("bash"),
        "py" => Some("python3"),
        "js" => Some("node"),
        "rb" => Some("ruby"),
        "pl" => Some("perl"),
        _ => None,
    }
}

/// `F2B_*` variables describing the event, in the order connectors have
/// always received them.
pub fn notification_env(data: &NotificationData) -> Vec<(&'static str, String)> {
    vec![
        ("F2B_IP", data.ip.clone()),
        ("F2B_JAIL", data.jail.clone()),
        ("F2B_ACTION", data.action.to_string()),
        ("F2B_TIME", data.time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("F2B_TIMESTAMP", data.time.timestamp().to_string()),
        ("F2B_COUNTRY", data.country.clone()),
        ("F2B_REGION", data.region.clone()),
        ("F2B_CITY", data.city.clone()),
        ("F2B_ISP", data.isp.clone()),
        ("F2B_HOSTNAME", data.hostname.clone()),
        ("F2B_FAILURES", data.failures.to_string()),
    ]
}

/// How a script or executable connector is launched.
#[derive(Debug, Clone)]
pub struct ProcessTarget {
    program: OsString,
    args: Vec<OsString>,
    path: PathBuf,
}

impl ProcessTarget {
    pub fn for_connector(spec: &ConnectorSpec) -> NotifierResult<Self> {
        let path = spec.path.clone();
        if !path.is_absolute() {
            return Err(NotifierError::PathNotAbsolute(path));
        }

        let interpreter = match spec.kind {
            ConnectorKind::Script => interpreter_for(&path),
            _ => None,
        };

        Ok(match interpreter {
            Some(interpreter) => Self {
                program: interpreter.into(),
                args: vec![path.clone().into_os_string()],
                path,
            },
            None => Self {
                program: path.clone().into_os_string(),
                args: Vec::new(),
                path,
            },
        })
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Runs the connector once. The child sees the inherited environment,
    /// the `F2B_*` variables and the connector settings (which win on
    /// conflicts), and reads `payload` from stdin. It is killed when the
    /// connector timeout expires.
    pub async fn run(
        &self,
        spec: &ConnectorSpec,
        data: &NotificationData,
        payload: &[u8],
    ) -> NotifierResult<()> {
        if !self.path.exists() {
            return Err(NotifierError::PathNotFound(self.path.clone()));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(notification_env(data))
            .envs(&spec.settings)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let execution = async {
            let mut child = cmd.spawn().map_err(|e| NotifierError::ProcessExecutionFailed {
                connector: spec.name.clone(),
                message: format!("failed to start {}: {}", self.program.to_string_lossy(), e),
            })?;

            if let Some(mut stdin) = child.stdin.take() {
                // A connector that ignores stdin may exit before we finish writing.
                if let Err(e) = stdin.write_all(payload).await {
                    if e.kind() != ErrorKind::BrokenPipe {
                        return Err(NotifierError::ProcessExecutionFailed {
                            connector: spec.name.clone(),
                            message: format!("failed to write stdin: {}", e),
                        });
                    }
                }
            }

            child
                .wait_with_output()
                .await
                .map_err(|e| NotifierError::ProcessExecutionFailed {
                    connector: spec.name.clone(),
                    message: format!("failed to wait for process: {}", e),
                })
        };

        let output = match tokio::time::timeout(spec.timeout(), execution).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(NotifierError::Timeout {
                    connector: spec.name.clone(),
                    timeout: spec.timeout(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("Connector {} stdout: {}", spec.name, stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!("Connector {} stderr: {}", spec.name, stderr.trim_end());
        }

        if !output.status.success() {
            return Err(NotifierError::ProcessExecutionFailed {
                connector: spec.name.clone(),
                message: format!("{}, stderr: {}", output.status, stderr.trim()),
            });
        }

        Ok(())
    }
}
