//! Keystroke injection — types a code into the focused target app.
//!
//! A key sequence is described once as [`KeyStep`]s and rendered per
//! backend (AppleScript, PowerShell SendKeys, xdotool). The sink walks a
//! ranked list of strategies and stops at the first one that reports
//! success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::app::{AppControl, Platform, applescript_quote, powershell_quote, run_command};
use super::{CodeSink, Delivery, print_manual_instructions};
use crate::error::DeliveryError;

/// Pause between keystrokes.
const STEP_PAUSE: Duration = Duration::from_millis(500);

/// Delay after focusing the app before typing.
const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// One keyboard action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStep {
    Tab,
    Space,
    Return,
    AltTab,
    Text(String),
    Pause(Duration),
}

impl KeyStep {
    /// Tab into the input, type, tab twice to the submit button, press it,
    /// then tab focus off the button.
    pub fn submit_form(code: &str) -> Vec<Self> {
        vec![
            Self::Tab,
            Self::Pause(STEP_PAUSE),
            Self::Text(code.to_string()),
            Self::Pause(STEP_PAUSE),
            Self::Tab,
            Self::Pause(STEP_PAUSE),
            Self::Tab,
            Self::Pause(STEP_PAUSE),
            Self::Space,
            Self::Pause(STEP_PAUSE),
            Self::Tab,
        ]
    }

    /// Type into whatever has focus and press Return.
    pub fn type_and_return(code: &str) -> Vec<Self> {
        vec![
            Self::Text(code.to_string()),
            Self::Pause(STEP_PAUSE),
            Self::Return,
        ]
    }

    /// Alt-Tab back to the app, tab into the input, type, press Return.
    pub fn alt_tab_and_enter(code: &str) -> Vec<Self> {
        vec![
            Self::AltTab,
            Self::Pause(STEP_PAUSE),
            Self::Tab,
            Self::Pause(STEP_PAUSE),
            Self::Text(code.to_string()),
            Self::Pause(STEP_PAUSE),
            Self::Return,
        ]
    }
}

/// One way of getting a code into the target app.
#[async_trait]
pub trait InjectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn inject(&self, code: &str) -> Result<(), DeliveryError>;
}

/// Keystroke sequence shape used by a strategy.
pub type SequenceFn = fn(&str) -> Vec<KeyStep>;

// ── AppleScript (macOS) ─────────────────────────────────────────────

/// Sends keystrokes through System Events.
pub struct AppleScriptStrategy {
    name: String,
    app: String,
    sequence: SequenceFn,
}

impl AppleScriptStrategy {
    pub fn new(name: &str, app: &str, sequence: SequenceFn) -> Self {
        Self {
            name: name.to_string(),
            app: app.to_string(),
            sequence,
        }
    }

    pub fn render(&self, code: &str) -> String {
        let mut lines = vec![
            format!("tell application {} to activate", applescript_quote(&self.app)),
            "delay 1".to_string(),
            "tell application \"System Events\"".to_string(),
        ];
        for step in (self.sequence)(code) {
            lines.push(match step {
                KeyStep::Tab => "key code 48".to_string(),
                KeyStep::Space => "key code 49".to_string(),
                KeyStep::Return => "keystroke return".to_string(),
                KeyStep::AltTab => "keystroke tab using command down".to_string(),
                KeyStep::Text(text) => format!("keystroke {}", applescript_quote(&text)),
                KeyStep::Pause(d) => format!("delay {}", d.as_secs_f32()),
            });
        }
        lines.push("end tell".to_string());
        lines.join("\n")
    }
}

/// Whether osascript stderr means the terminal lacks Accessibility access.
pub fn is_permission_error(stderr: &str) -> bool {
    stderr.contains("not permitted") || stderr.contains("not allowed") || stderr.contains("1002")
}

#[async_trait]
impl InjectionStrategy for AppleScriptStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn inject(&self, code: &str) -> Result<(), DeliveryError> {
        let script = self.render(code);
        let out = run_command("osascript", &["-e", &script]).await?;
        if !out.stdout.is_empty() {
            info!(strategy = %self.name, "AppleScript result: {}", out.stdout);
        }
        if out.stderr.is_empty() && out.success {
            return Ok(());
        }
        if is_permission_error(&out.stderr) {
            return Err(DeliveryError::PermissionDenied {
                strategy: self.name.clone(),
                reason: out.stderr,
            });
        }
        Err(DeliveryError::StrategyFailed {
            strategy: self.name.clone(),
            reason: out.stderr,
        })
    }
}

// ── PowerShell SendKeys (Windows) ───────────────────────────────────

/// Escape SendKeys metacharacters so text is typed literally.
pub fn sendkeys_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '+' | '^' | '%' | '~' | '(' | ')' | '{' | '}' | '[' | ']' => {
                out.push('{');
                out.push(c);
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Sends keystrokes through `WScript.Shell.SendKeys`.
pub struct SendKeysStrategy {
    name: String,
    sequence: SequenceFn,
}

impl SendKeysStrategy {
    pub fn new(name: &str, sequence: SequenceFn) -> Self {
        Self {
            name: name.to_string(),
            sequence,
        }
    }

    pub fn render(&self, code: &str) -> String {
        let mut parts = vec!["$ws = New-Object -ComObject WScript.Shell".to_string()];
        for step in (self.sequence)(code) {
            parts.push(match step {
                KeyStep::Tab => "$ws.SendKeys('{TAB}')".to_string(),
                KeyStep::Space => "$ws.SendKeys(' ')".to_string(),
                KeyStep::Return => "$ws.SendKeys('{ENTER}')".to_string(),
                KeyStep::AltTab => "$ws.SendKeys('%{TAB}')".to_string(),
                KeyStep::Text(text) => {
                    format!("$ws.SendKeys({})", powershell_quote(&sendkeys_escape(&text)))
                }
                KeyStep::Pause(d) => format!("Start-Sleep -Milliseconds {}", d.as_millis()),
            });
        }
        parts.join("; ")
    }
}

#[async_trait]
impl InjectionStrategy for SendKeysStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn inject(&self, code: &str) -> Result<(), DeliveryError> {
        let script = self.render(code);
        let out = run_command("powershell", &["-NoProfile", "-Command", &script]).await?;
        if out.success && out.stderr.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::StrategyFailed {
                strategy: self.name.clone(),
                reason: out.stderr,
            })
        }
    }
}

// ── xdotool (Linux/X11) ─────────────────────────────────────────────

/// Sends keystrokes with `xdotool`, one invocation per step.
pub struct XdotoolStrategy {
    name: String,
    sequence: SequenceFn,
}

impl XdotoolStrategy {
    pub fn new(name: &str, sequence: SequenceFn) -> Self {
        Self {
            name: name.to_string(),
            sequence,
        }
    }

    /// Arguments for each step; `None` for pauses.
    pub fn render(&self, code: &str) -> Vec<(Option<Vec<String>>, Duration)> {
        (self.sequence)(code)
            .into_iter()
            .map(|step| {
                let args = |a: &[&str]| -> Option<Vec<String>> {
                    Some(a.iter().map(|s| s.to_string()).collect())
                };
                match step {
                    KeyStep::Tab => (args(&["key", "Tab"]), Duration::ZERO),
                    KeyStep::Space => (args(&["key", "space"]), Duration::ZERO),
                    KeyStep::Return => (args(&["key", "Return"]), Duration::ZERO),
                    KeyStep::AltTab => (args(&["key", "alt+Tab"]), Duration::ZERO),
                    KeyStep::Text(text) => (
                        args(&["type", "--delay", "50", "--", text.as_str()]),
                        Duration::ZERO,
                    ),
                    KeyStep::Pause(d) => (None, d),
                }
            })
            .collect()
    }
}

#[async_trait]
impl InjectionStrategy for XdotoolStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn inject(&self, code: &str) -> Result<(), DeliveryError> {
        for (args, pause) in self.render(code) {
            let Some(args) = args else {
                tokio::time::sleep(pause).await;
                continue;
            };
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = run_command("xdotool", &argv).await?;
            if !out.success {
                return Err(DeliveryError::StrategyFailed {
                    strategy: self.name.clone(),
                    reason: out.stderr,
                });
            }
        }
        Ok(())
    }
}

/// Ranked injection strategies for `platform`. Empty when unsupported.
pub fn platform_strategies(platform: Platform, app: &str) -> Vec<Box<dyn InjectionStrategy>> {
    match platform {
        Platform::MacOs => vec![
            Box::new(AppleScriptStrategy::new(
                "applescript-keycodes",
                app,
                KeyStep::submit_form,
            )),
            Box::new(AppleScriptStrategy::new(
                "applescript-keystroke",
                app,
                KeyStep::type_and_return,
            )),
        ],
        Platform::Windows => vec![
            Box::new(SendKeysStrategy::new("sendkeys-tab", KeyStep::submit_form)),
            Box::new(SendKeysStrategy::new(
                "sendkeys-alt-tab",
                KeyStep::alt_tab_and_enter,
            )),
        ],
        Platform::Linux => vec![
            Box::new(XdotoolStrategy::new("xdotool-tab", KeyStep::submit_form)),
            Box::new(XdotoolStrategy::new("xdotool-type", KeyStep::type_and_return)),
        ],
        Platform::Other => Vec::new(),
    }
}

fn print_permission_help() {
    println!("\nPERMISSION ERROR DETECTED");
    println!("You need to allow your terminal app to control your computer:");
    println!("1. Open System Settings > Privacy & Security > Accessibility");
    println!("2. Add your terminal app (Terminal/iTerm) to the list");
    println!("3. Restart your terminal and try again");
}

// ── Sink ────────────────────────────────────────────────────────────

/// Types codes into the target app, falling back to manual instructions.
pub struct AutoTypeSink {
    app: Arc<dyn AppControl>,
    strategies: Vec<Box<dyn InjectionStrategy>>,
    settle: Duration,
}

impl AutoTypeSink {
    pub fn new(app: Arc<dyn AppControl>, strategies: Vec<Box<dyn InjectionStrategy>>) -> Self {
        Self {
            app,
            strategies,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Sink with the default strategy list for `platform`.
    pub fn for_platform(app: Arc<dyn AppControl>, platform: Platform) -> Self {
        let strategies = platform_strategies(platform, app.name());
        Self::new(app, strategies)
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[async_trait]
impl CodeSink for AutoTypeSink {
    async fn deliver(&mut self, code: &str) -> Delivery {
        info!(code, app = self.app.name(), "Attempting to input code");

        if self.strategies.is_empty() {
            warn!("No keystroke strategy available on this platform");
            print_manual_instructions(self.app.name(), code);
            return Delivery::Declined;
        }

        if let Err(e) = self.app.activate().await {
            warn!("Could not activate {}: {e}", self.app.name());
        }
        tokio::time::sleep(self.settle).await;

        let mut permission_hint = false;
        for strategy in &self.strategies {
            match strategy.inject(code).await {
                Ok(()) => {
                    info!(code, strategy = strategy.name(), "Code entered");
                    return Delivery::Accepted;
                }
                Err(e @ DeliveryError::PermissionDenied { .. }) => {
                    warn!("{e}");
                    permission_hint = true;
                }
                Err(e) => warn!("{e}"),
            }
        }

        if permission_hint {
            print_permission_help();
        }
        print_manual_instructions(self.app.name(), code);
        Delivery::Declined
    }
}
