//! Operator console command grammar

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Command list shown on startup and after invalid input
pub const USAGE: &str = "\
Commands:
  watch add <path>
  watch remove <path>
  watch list
  backend send <command> / bs <command>
  backend status
  backend reload-config / brc
  help
  exit / quit";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    WatchAdd(PathBuf),
    WatchRemove(PathBuf),
    WatchList,
    /// Forward a raw line to the server's input
    BackendSend(String),
    BackendStatus,
    ReloadConfig,
    Help,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,

    #[error("missing argument, usage: {usage}")]
    MissingArgument { usage: &'static str },

    #[error("unknown command: {0}")]
    Unknown(String),
}

impl FromStr for ConsoleCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (head, rest) = split_word(line);
        match head.to_ascii_lowercase().as_str() {
            "exit" | "quit" if rest.is_empty() => Ok(Self::Exit),
            "help" | "?" if rest.is_empty() => Ok(Self::Help),
            "brc" if rest.is_empty() => Ok(Self::ReloadConfig),
            "bs" => payload(rest, "bs <command>").map(Self::BackendSend),
            "watch" => parse_watch(rest),
            "backend" => parse_backend(rest),
            _ => Err(ParseError::Unknown(line.to_string())),
        }
    }
}

fn parse_watch(rest: &str) -> Result<ConsoleCommand, ParseError> {
    let (sub, arg) = split_word(rest);
    match sub.to_ascii_lowercase().as_str() {
        "add" => payload(arg, "watch add <path>").map(|p| ConsoleCommand::WatchAdd(PathBuf::from(p))),
        "remove" => {
            payload(arg, "watch remove <path>").map(|p| ConsoleCommand::WatchRemove(PathBuf::from(p)))
        }
        "list" if arg.is_empty() => Ok(ConsoleCommand::WatchList),
        _ => Err(ParseError::Unknown(format!("watch {}", rest).trim_end().to_string())),
    }
}

fn parse_backend(rest: &str) -> Result<ConsoleCommand, ParseError> {
    let (sub, arg) = split_word(rest);
    match sub.to_ascii_lowercase().as_str() {
        "send" => payload(arg, "backend send <command>").map(ConsoleCommand::BackendSend),
        "status" if arg.is_empty() => Ok(ConsoleCommand::BackendStatus),
        "reload-config" if arg.is_empty() => Ok(ConsoleCommand::ReloadConfig),
        _ => Err(ParseError::Unknown(format!("backend {}", rest).trim_end().to_string())),
    }
}

/// First whitespace-delimited word and the trimmed remainder
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(at) => (&input[..at], input[at..].trim()),
        None => (input, ""),
    }
}

fn payload(arg: &str, usage: &'static str) -> Result<String, ParseError> {
    if arg.is_empty() {
        Err(ParseError::MissingArgument { usage })
    } else {
        Ok(arg.to_string())
    }
}
