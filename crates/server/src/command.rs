//! Operator commands and console input parsing.

use std::fmt;

/// Operator command dispatched against the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Synthesize a new curve and send it to the peer.
    Generate,
    /// Tell the peer to start recording.
    Start,
    /// Tell the peer to stop recording.
    Stop,
    /// Hand the last curve and samples to the visualizer.
    Compare,
}

impl Command {
    pub const ALL: [Command; 4] = [Self::Generate, Self::Start, Self::Stop, Self::Compare];

    /// Console key bound to this command.
    pub fn key(&self) -> char {
        match self {
            Self::Generate => '1',
            Self::Start => '2',
            Self::Stop => '3',
            Self::Compare => '4',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Compare => "compare",
        }
    }

    /// One-line usage summary for the console.
    pub fn usage() -> String {
        let mut parts: Vec<String> = Self::ALL
            .iter()
            .map(|c| format!("{}={}", c.key(), c.as_str()))
            .collect();
        parts.push("q=quit".to_string());
        parts.join(" ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(Command),
    Quit,
    Unknown(String),
}

/// Parse a console line; surrounding whitespace is ignored.
pub fn parse_line(line: &str) -> ConsoleInput {
    match line.trim() {
        "1" => ConsoleInput::Command(Command::Generate),
        "2" => ConsoleInput::Command(Command::Start),
        "3" => ConsoleInput::Command(Command::Stop),
        "4" => ConsoleInput::Command(Command::Compare),
        "q" | "quit" => ConsoleInput::Quit,
        other => ConsoleInput::Unknown(other.to_string()),
    }
}
