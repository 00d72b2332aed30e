//! Interactive questions on the terminal.
//!
//! Prompts go to stderr so stdout stays clean for `status --json`.

use std::io::{self, BufRead, IsTerminal, Write};

use crate::error::{Result, SetupError};

pub trait Prompter: Send + Sync {
    /// Whether questions can be asked at all
    fn is_interactive(&self) -> bool;

    /// Yes/no question; an empty answer picks `default`.
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;

    /// Free-form answer; an empty answer picks `default` when one is given.
    fn input(&self, question: &str, default: Option<&str>) -> Result<String>;
}

/// Reads answers from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }

    /// Stdin is attached to a terminal
    pub fn available() -> bool {
        io::stdin().is_terminal()
    }

    fn read_line(prompt: &str) -> Result<String> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{}", prompt).map_err(|e| SetupError::prompt(e.to_string()))?;
        stderr.flush().map_err(|e| SetupError::prompt(e.to_string()))?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| SetupError::prompt(e.to_string()))?;
        if read == 0 {
            return Err(SetupError::prompt("end of input while waiting for an answer"));
        }
        Ok(line.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = Self::read_line(&format!("{} {} ", question, hint))?;
            if let Some(value) = parse_yes_no(&answer, default) {
                return Ok(value);
            }
            eprintln!("Please answer yes or no.");
        }
    }

    fn input(&self, question: &str, default: Option<&str>) -> Result<String> {
        let prompt = match default {
            Some(d) => format!("{} [{}]: ", question, d),
            None => format!("{}: ", question),
        };
        loop {
            let answer = Self::read_line(&prompt)?;
            match (answer.is_empty(), default) {
                (false, _) => return Ok(answer),
                (true, Some(d)) => return Ok(d.to_string()),
                (true, None) => eprintln!("A value is required."),
            }
        }
    }
}

/// Never asks; used for `--non-interactive` and when stdin is not a terminal.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    fn confirm(&self, _question: &str, default: bool) -> Result<bool> {
        Ok(default)
    }

    fn input(&self, question: &str, default: Option<&str>) -> Result<String> {
        default
            .map(str::to_string)
            .ok_or_else(|| SetupError::prompt(format!("cannot ask '{}' in non-interactive mode", question)))
    }
}

/// `None` for anything that is not a recognizable yes/no
pub fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("", true), Some(true));
        assert_eq!(parse_yes_no("", false), Some(false));
        assert_eq!(parse_yes_no(" YES ", false), Some(true));
        assert_eq!(parse_yes_no("n", true), Some(false));
        assert_eq!(parse_yes_no("maybe", true), None);
    }

    #[test]
    fn test_non_interactive_uses_defaults() {
        let p = NonInteractive;
        assert!(!p.is_interactive());
        assert!(!p.confirm("Run again?", false).expect("confirm"));
        assert_eq!(p.input("Timezone", Some("UTC")).expect("input"), "UTC");
        assert!(matches!(p.input("NFS server", None), Err(SetupError::Prompt(_))));
    }
}
