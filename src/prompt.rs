//! Operator prompts as an injectable capability.
//!
//! Login, two-factor entry and manual code confirmation all ask the
//! operator a question and block for the answer. Routing that through
//! [`Prompt`] keeps the poll loop free of direct console I/O.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

/// Ask the operator a question and wait for a line of input.
pub trait Prompt: Send + Sync {
    /// Show `text` and return the answer with the trailing newline removed.
    fn ask(&self, text: &str) -> io::Result<String>;

    /// Ask for a secret. Implementations may suppress echo.
    fn ask_secret(&self, text: &str) -> io::Result<String> {
        self.ask(text)
    }

    /// Ask a yes/no question; anything starting with `y` is yes.
    fn confirm(&self, text: &str) -> io::Result<bool> {
        let answer = self.ask(text)?;
        Ok(answer.trim().to_ascii_lowercase().starts_with('y'))
    }
}

/// Prompt on the controlling terminal.
pub struct StdinPrompt;

impl StdinPrompt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for StdinPrompt {
    fn ask(&self, text: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{text}")?;
        stdout.flush()?;
        drop(stdout);

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Prompt that replays canned answers in order, for unattended runs.
///
/// Also records every question it was asked.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, text: &str) -> io::Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(text.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| io::Error::other("prompt script poisoned"))?
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "prompt script exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_answers_in_order() {
        let prompt = ScriptedPrompt::new(["a", "b"]);
        assert_eq!(prompt.ask("1?").unwrap(), "a");
        assert_eq!(prompt.ask_secret("2?").unwrap(), "b");
        assert_eq!(prompt.asked(), vec!["1?", "2?"]);
    }

    #[test]
    fn exhausted_script_is_eof() {
        let prompt = ScriptedPrompt::new(Vec::<String>::new());
        let err = prompt.ask("anything?").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn confirm_accepts_y_prefix() {
        let prompt = ScriptedPrompt::new(["y", "Yes", "n", "", " y "]);
        assert!(prompt.confirm("?").unwrap());
        assert!(prompt.confirm("?").unwrap());
        assert!(!prompt.confirm("?").unwrap());
        assert!(!prompt.confirm("?").unwrap());
        assert!(prompt.confirm("?").unwrap());
    }
}
