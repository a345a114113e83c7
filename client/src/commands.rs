//! Console commands typed by the local player

use shared::ParticipantId;
use std::str::FromStr;
use thiserror::Error;

pub const HELP: &str = "commands: start | score <id> <delta> | roster | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the authority to begin the next round
    Start,
    /// Award points to a participant (negative deltas allowed)
    Score { id: ParticipantId, delta: i32 },
    /// Print the lobby roster
    Roster,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("unexpected argument '{0}'")]
    TrailingArgument(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "score" => {
                let id = number(words.next(), "id")?;
                let delta = number(words.next(), "delta")?;
                Command::Score { id, delta }
            }
            "roster" | "who" => Command::Roster,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        match words.next() {
            Some(extra) => Err(CommandError::TrailingArgument(extra.to_string())),
            None => Ok(command),
        }
    }
}

fn number<T: FromStr>(word: Option<&str>, name: &'static str) -> Result<T, CommandError> {
    let word = word.ok_or(CommandError::MissingArgument(name))?;
    word.parse()
        .map_err(|_| CommandError::InvalidNumber(word.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("start".parse(), Ok(Command::Start));
        assert_eq!("  ROSTER ".parse(), Ok(Command::Roster));
        assert_eq!("who".parse(), Ok(Command::Roster));
        assert_eq!("exit".parse(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(
            "score 2 5".parse(),
            Ok(Command::Score { id: 2, delta: 5 })
        );
        assert_eq!(
            "score 1 -3".parse(),
            Ok(Command::Score { id: 1, delta: -3 })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "jump".parse::<Command>(),
            Err(CommandError::Unknown("jump".to_string()))
        );
        assert_eq!(
            "score 2".parse::<Command>(),
            Err(CommandError::MissingArgument("delta"))
        );
        assert_eq!(
            "score two 1".parse::<Command>(),
            Err(CommandError::InvalidNumber("two".to_string()))
        );
        assert_eq!(
            "start now".parse::<Command>(),
            Err(CommandError::TrailingArgument("now".to_string()))
        );
    }

    #[test]
    fn test_negative_id_is_rejected() {
        assert_eq!(
            "score -1 4".parse::<Command>(),
            Err(CommandError::InvalidNumber("-1".to_string()))
        );
    }
}
