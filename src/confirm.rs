use std::io::{BufRead, Write};

use crate::error::{Result, StatsError};
use crate::mail::Message;

/// How ambiguous threads are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    #[default]
    Interactive,
    /// Answer yes without asking
    CountAll,
    /// Answer no without asking
    CountNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmReason {
    ToAndFromSupport,
    Internal,
}

impl std::fmt::Display for ConfirmReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmReason::ToAndFromSupport => write!(f, "to and from Support"),
            ConfirmReason::Internal => write!(f, "Internal"),
        }
    }
}

/// What the operator is shown
#[derive(Debug, Clone, Copy)]
pub struct ConfirmRequest<'a> {
    pub reason: ConfirmReason,
    pub message: &'a Message,
}

impl ConfirmRequest<'_> {
    pub fn render(&self) -> String {
        let m = self.message;
        format!(
            "\nFound {} email. Should the following message be counted?\n\
             From: {}\nTo: {}\nSubject: {}\nDate: {}\nLabels: {}\n",
            self.reason,
            m.from_address,
            m.to_address,
            m.subject,
            m.timestamp,
            m.labels.join(", ")
        )
    }
}

/// Capability to ask an operator a yes/no question
pub trait ConfirmationPort {
    fn ask(&mut self, request: &ConfirmRequest<'_>) -> Result<bool>;
}

/// Line-based yes/no prompt; unrecognised answers are asked again.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl TerminalPrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfirmationPort for TerminalPrompt<R, W> {
    fn ask(&mut self, request: &ConfirmRequest<'_>) -> Result<bool> {
        write!(self.output, "{}", request.render())?;
        loop {
            write!(self.output, "Y/N?    ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(StatsError::PromptClosed);
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => {
                    writeln!(self.output, "Thread will be counted.")?;
                    return Ok(true);
                }
                "n" | "no" => {
                    writeln!(self.output, "Thread won't be counted.")?;
                    return Ok(false);
                }
                _ => writeln!(self.output, "Answer not recognized.")?,
            }
        }
    }
}

struct NoOperator;

impl ConfirmationPort for NoOperator {
    fn ask(&mut self, _request: &ConfirmRequest<'_>) -> Result<bool> {
        Err(StatsError::PromptClosed)
    }
}

/// Applies the run's `CountMode`, only reaching the port in interactive mode
pub struct Confirmer {
    mode: CountMode,
    port: Box<dyn ConfirmationPort>,
}

impl Confirmer {
    pub fn new(mode: CountMode, port: Box<dyn ConfirmationPort>) -> Self {
        Self { mode, port }
    }

    pub fn terminal(mode: CountMode) -> Self {
        Self::new(mode, Box::new(TerminalPrompt::stdio()))
    }

    /// A confirmer with nobody to ask. Interactive questions fail with
    /// `PromptClosed`, so use an override mode.
    pub fn unattended(mode: CountMode) -> Self {
        Self::new(mode, Box::new(NoOperator))
    }

    pub fn mode(&self) -> CountMode {
        self.mode
    }

    pub fn resolve(&mut self, request: &ConfirmRequest<'_>) -> Result<bool> {
        match self.mode {
            CountMode::CountAll => Ok(true),
            CountMode::CountNone => Ok(false),
            CountMode::Interactive => self.port.ask(request),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPort;
    use super::*;
    use crate::config::OrgConfig;
    use crate::mail::{Normalizer, RawMessage};

    fn message() -> Message {
        Normalizer::new(&OrgConfig::default()).normalize(
            &RawMessage::new()
                .with("From", "pat@irbnet.org")
                .with("To", "support@irbnet.org")
                .with("Subject", "Test"),
        )
    }

    #[test]
    fn test_terminal_prompt_reprompts() {
        let msg = message();
        let request = ConfirmRequest {
            reason: ConfirmReason::Internal,
            message: &msg,
        };
        let mut out = Vec::new();
        let answer = TerminalPrompt::new(&b"maybe\n\nY\n"[..], &mut out)
            .ask(&request)
            .unwrap();
        assert!(answer);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Answer not recognized.").count(), 2);
        assert!(text.contains("Found Internal email"));
    }

    #[test]
    fn test_terminal_prompt_eof() {
        let msg = message();
        let request = ConfirmRequest {
            reason: ConfirmReason::ToAndFromSupport,
            message: &msg,
        };
        let result = TerminalPrompt::new(&b"x\n"[..], Vec::new()).ask(&request);
        assert!(matches!(result, Err(StatsError::PromptClosed)));
    }

    #[test]
    fn test_override_modes_never_prompt() {
        let msg = message();
        let request = ConfirmRequest {
            reason: ConfirmReason::Internal,
            message: &msg,
        };
        let port = ScriptedPort::answering(&[]);
        assert!(port.confirmer(CountMode::CountAll).resolve(&request).unwrap());
        assert!(!port.confirmer(CountMode::CountNone).resolve(&request).unwrap());
        assert!(port.asked.borrow().is_empty());
    }
}
