//! Code sinks — where a freshly found code goes.
//!
//! - [`AutoTypeSink`] types the code into the target app, trying a ranked
//!   list of keystroke strategies.
//! - [`ManualSink`] shows the code and waits for the operator to enter it.

pub mod app;
pub mod keystroke;
pub mod manual;

pub use app::{AppControl, Platform, TargetApp};
pub use keystroke::{AutoTypeSink, InjectionStrategy, KeyStep, platform_strategies};
pub use manual::ManualSink;

use async_trait::async_trait;

/// Outcome of handing a code to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The code was typed in, or the operator confirmed entering it.
    Accepted,
    /// The code was skipped or could not be entered automatically.
    Declined,
}

/// Delivery target for codes.
///
/// Implementations must not fail: problems are reported to the operator
/// and folded into [`Delivery::Declined`].
#[async_trait]
pub trait CodeSink: Send {
    async fn deliver(&mut self, code: &str) -> Delivery;
}

/// Print the manual-entry fallback for a code.
pub(crate) fn print_manual_instructions(app_name: &str, code: &str) {
    println!("\nIf automatic input failed, you can manually:");
    println!("1. Switch to the {app_name} app window");
    println!("2. Enter this code: {code}");
    println!("3. Press Enter to submit");
}
