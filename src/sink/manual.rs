//! Human-confirmation sink: show the code, wait for the operator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::app::AppControl;
use super::{CodeSink, Delivery};
use crate::prompt::Prompt;

/// Surfaces each code to the operator and blocks until they answer.
///
/// Answering `skip` declines the code; anything else confirms it.
pub struct ManualSink {
    app: Arc<dyn AppControl>,
    prompt: Arc<dyn Prompt>,
}

impl ManualSink {
    pub fn new(app: Arc<dyn AppControl>, prompt: Arc<dyn Prompt>) -> Self {
        Self { app, prompt }
    }

    fn announce(&self, code: &str) {
        let rule = "=".repeat(60);
        println!("\n{rule}");
        println!("\x1b[1;32m!!! NEW CODE FOUND: {code} !!!\x1b[0m");
        println!("Please enter this code in {} now!", self.app.name());
        println!("{rule}\n");
        print!("\x07");
    }
}

#[async_trait]
impl CodeSink for ManualSink {
    async fn deliver(&mut self, code: &str) -> Delivery {
        self.announce(code);

        match self.app.activate().await {
            Ok(()) => println!(
                "Switched focus to {}. Please enter the code manually.",
                self.app.name()
            ),
            Err(_) => println!(
                "Please manually switch to {} and enter the code.",
                self.app.name()
            ),
        }

        let answer = self.prompt.ask(
            "Press Enter after you've entered the code (or type 'skip' to ignore this code): ",
        );
        match answer {
            Ok(answer) if answer.trim().eq_ignore_ascii_case("skip") => {
                info!(code, "Code skipped by operator");
                Delivery::Declined
            }
            Ok(_) => {
                info!(code, "Operator confirmed code");
                Delivery::Accepted
            }
            Err(e) => {
                warn!("Confirmation prompt failed: {e}");
                println!("IMPORTANT! New code found: {code}");
                Delivery::Declined
            }
        }
    }
}
