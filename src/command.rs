use crate::error::{ClientError, Result};

/// One line of user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play { song_id: i32 },
    Info { song_id: i32 },
    List,
    Stop,
    Exit,
}

impl Command {
    /// Parse a command line. Blank input yields `None`.
    ///
    /// `play` and `info` take an optional song id that defaults to 0.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();
        if words.next().is_some() {
            return Err(ClientError::UnknownCommand(line.trim().to_string()));
        }

        let command = match (name, argument) {
            ("play", id) => Command::Play {
                song_id: parse_song_id(id)?,
            },
            ("info", id) => Command::Info {
                song_id: parse_song_id(id)?,
            },
            ("list", None) => Command::List,
            ("stop", None) => Command::Stop,
            ("exit", None) => Command::Exit,
            _ => return Err(ClientError::UnknownCommand(line.trim().to_string())),
        };

        Ok(Some(command))
    }
}

fn parse_song_id(argument: Option<&str>) -> Result<i32> {
    match argument {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| ClientError::InvalidSongId(raw.to_string())),
    }
}
