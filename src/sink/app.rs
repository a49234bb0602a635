//! Target desktop application control (focus, liveness, launch).
//!
//! Every call shells out to an OS tool. Failures come back as
//! [`DeliveryError`] for the caller to log; none of them stop the monitor.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::DeliveryError;

/// Host platform, resolved once when sinks are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            _ => Self::Other,
        }
    }
}

/// Captured output of a finished helper command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` to completion, capturing output.
pub async fn run_command(program: &str, args: &[&str]) -> Result<CommandOutput, DeliveryError> {
    debug!(program, "Running helper command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| DeliveryError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Quote a string for an AppleScript string literal.
pub fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quote a string for a single-quoted PowerShell literal.
pub fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Operations on the application codes are typed into.
#[async_trait]
pub trait AppControl: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the application to the foreground.
    async fn activate(&self) -> Result<(), DeliveryError>;

    async fn is_running(&self) -> Result<bool, DeliveryError>;

    async fn launch(&self) -> Result<(), DeliveryError>;
}

/// A desktop application addressed by name.
#[derive(Debug, Clone)]
pub struct TargetApp {
    name: String,
    platform: Platform,
}

impl TargetApp {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn unsupported(&self, action: &str) -> DeliveryError {
        DeliveryError::StrategyFailed {
            strategy: action.to_string(),
            reason: format!("not supported on {:?}", self.platform),
        }
    }

    async fn app_activate_windows(&self, title: &str) -> Result<bool, DeliveryError> {
        let script = format!(
            "(New-Object -ComObject WScript.Shell).AppActivate({})",
            powershell_quote(title)
        );
        let out = run_command("powershell", &["-NoProfile", "-Command", &script]).await?;
        Ok(out.stdout.contains("True"))
    }
}

#[async_trait]
impl AppControl for TargetApp {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&self) -> Result<(), DeliveryError> {
        match self.platform {
            Platform::MacOs => {
                let script = format!("tell application {} to activate", applescript_quote(&self.name));
                let out = run_command("osascript", &["-e", &script]).await?;
                if out.success {
                    Ok(())
                } else {
                    Err(DeliveryError::StrategyFailed {
                        strategy: "activate".into(),
                        reason: out.stderr,
                    })
                }
            }
            Platform::Windows => {
                if self.app_activate_windows(&self.name).await? {
                    return Ok(());
                }
                // Window titles often carry a suffix; retry with the first word.
                let short = self.name.split_whitespace().next().unwrap_or(&self.name);
                if short != self.name && self.app_activate_windows(short).await? {
                    return Ok(());
                }
                Err(DeliveryError::StrategyFailed {
                    strategy: "activate".into(),
                    reason: format!("no window titled {}", self.name),
                })
            }
            Platform::Linux => {
                let out = run_command(
                    "xdotool",
                    &["search", "--onlyvisible", "--name", &self.name, "windowactivate"],
                )
                .await?;
                if out.success {
                    Ok(())
                } else {
                    Err(DeliveryError::StrategyFailed {
                        strategy: "activate".into(),
                        reason: out.stderr,
                    })
                }
            }
            Platform::Other => Err(self.unsupported("activate")),
        }
    }

    async fn is_running(&self) -> Result<bool, DeliveryError> {
        match self.platform {
            Platform::MacOs => {
                let script = format!(
                    "tell application \"System Events\" to count processes whose name is {}",
                    applescript_quote(&self.name)
                );
                let out = run_command("osascript", &["-e", &script]).await?;
                Ok(out.success && !out.stdout.is_empty() && out.stdout != "0")
            }
            Platform::Windows => {
                let by_name = format!(
                    "Get-Process -Name {} -ErrorAction SilentlyContinue",
                    powershell_quote(&self.name)
                );
                let out = run_command("powershell", &["-NoProfile", "-Command", &by_name]).await?;
                if out.stdout.contains(&self.name) {
                    return Ok(true);
                }
                let by_title = format!(
                    "Get-Process | Where-Object {{ $_.MainWindowTitle -like {} }}",
                    powershell_quote(&format!("*{}*", self.name))
                );
                let out = run_command("powershell", &["-NoProfile", "-Command", &by_title]).await?;
                Ok(!out.stdout.is_empty())
            }
            Platform::Linux => {
                let out = run_command("pgrep", &["-f", &self.name]).await?;
                Ok(out.success)
            }
            Platform::Other => Err(self.unsupported("is_running")),
        }
    }

    async fn launch(&self) -> Result<(), DeliveryError> {
        let out = match self.platform {
            Platform::MacOs => run_command("open", &["-a", &self.name]).await?,
            Platform::Windows => {
                run_command("cmd", &["/C", "start", "", &self.name]).await?
            }
            Platform::Linux => {
                let program = self.name.to_lowercase();
                Command::new(&program)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| DeliveryError::Spawn {
                        program,
                        reason: e.to_string(),
                    })?;
                return Ok(());
            }
            Platform::Other => return Err(self.unsupported("launch")),
        };

        if out.success {
            Ok(())
        } else {
            Err(DeliveryError::StrategyFailed {
                strategy: "launch".into(),
                reason: out.stderr,
            })
        }
    }
}
