//! `--test` mode: type a sample code into the target app once.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::DeliveryError;
use crate::prompt::Prompt;
use crate::sink::{AppControl, CodeSink, Delivery, Platform};

pub const DEFAULT_TEST_CODE: &str = "TEST123";

/// Knobs for a self-test run.
#[derive(Debug, Clone)]
pub struct SelfTestOptions {
    /// Code to type; prompts the operator when `None`.
    pub code: Option<String>,
    /// Seconds counted down before typing.
    pub countdown: u32,
    /// Pause between countdown steps.
    pub step: Duration,
    /// Wait after launching the app.
    pub launch_wait: Duration,
}

impl Default for SelfTestOptions {
    fn default() -> Self {
        Self {
            code: None,
            countdown: 3,
            step: Duration::from_secs(1),
            launch_wait: Duration::from_secs(5),
        }
    }
}

/// What happened during a self-test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestReport {
    pub code: String,
    pub delivery: Delivery,
    /// Operator said the code arrived.
    pub confirmed: bool,
}

/// Run the self-test.
///
/// Returns `Ok(None)` when the app is not running and the operator chose
/// not to launch it.
pub async fn run_self_test(
    app: &dyn AppControl,
    sink: &mut dyn CodeSink,
    prompt: &dyn Prompt,
    platform: Platform,
    options: &SelfTestOptions,
) -> Result<Option<SelfTestReport>, DeliveryError> {
    println!("\n=== {} Input Test Mode ===", app.name());

    let running = app.is_running().await.unwrap_or_else(|e| {
        warn!("Could not check whether {} is running: {e}", app.name());
        false
    });
    if !running {
        println!("{} is not running.", app.name());
        let launch = prompt
            .confirm(&format!("Would you like to launch {}? (y/n): ", app.name()))
            .map_err(DeliveryError::Prompt)?;
        if !launch {
            println!("Test cancelled. Please launch {} manually and try again.", app.name());
            return Ok(None);
        }
        app.launch().await?;
        println!("Waiting for {} to start...", app.name());
        tokio::time::sleep(options.launch_wait).await;
    }

    let code = match &options.code {
        Some(code) => code.clone(),
        None => {
            let answer = prompt
                .ask(&format!(
                    "Enter a test code (or press Enter for default '{DEFAULT_TEST_CODE}'): "
                ))
                .map_err(DeliveryError::Prompt)?;
            let answer = answer.trim();
            if answer.is_empty() {
                DEFAULT_TEST_CODE.to_string()
            } else {
                answer.to_string()
            }
        }
    };

    println!("\nTesting input of code: {code}");
    println!("Please make sure {} is visible on screen.", app.name());
    for remaining in (1..=options.countdown).rev() {
        println!("Typing in {remaining}...");
        tokio::time::sleep(options.step).await;
    }

    let delivery = sink.deliver(&code).await;
    info!(code = %code, ?delivery, "Test delivery finished");

    let confirmed = prompt
        .confirm("\nDid the code input work correctly? (y/n): ")
        .map_err(DeliveryError::Prompt)?;
    if confirmed {
        println!("Test passed. The monitor is ready to use.");
    } else {
        print_troubleshooting(platform, app.name());
    }

    Ok(Some(SelfTestReport {
        code,
        delivery,
        confirmed,
    }))
}

fn print_troubleshooting(platform: Platform, app_name: &str) {
    println!("\nTroubleshooting tips:");
    match platform {
        Platform::MacOs => {
            println!("1. Open System Settings > Privacy & Security > Accessibility");
            println!("2. Add and enable your terminal application");
            println!("3. Restart the terminal and run the test again");
        }
        Platform::Windows => {
            println!("1. Run the terminal as Administrator");
            println!("2. Make sure {app_name} is not minimized");
        }
        Platform::Linux => {
            println!("1. Install xdotool and make sure an X11 session is active");
            println!("2. Make sure {app_name} is not minimized");
        }
        Platform::Other => {
            println!("1. Automatic typing is not supported here; use --manual");
        }
    }
    println!("- Check the input field in {app_name} has focus before the countdown ends");
    println!("- Try --manual to confirm each code yourself");
}
