use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::Command;

/// An ordered list of executed commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLog {
    commands: Vec<Command>,
}

fn json_error(e: serde_json::Error) -> Error {
    if e.is_io() {
        Error::Io(io::Error::from(e))
    } else {
        Error::format("malformed command log", e)
    }
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(json_error)
    }

    /// Parses a log. An entry that matches no command fails the whole log
    /// and the error names the entry's position.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(json_error)?;
        let Value::Array(entries) = value else {
            return Err(Error::format("command log must be an array", "non-array"));
        };
        let commands = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Command::from_json(entry).map_err(|e| Error::Replay {
                    index,
                    op: "parse",
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { commands })
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self).map_err(json_error)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_json(&text)
    }
}

impl From<Vec<Command>> for CommandLog {
    fn from(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

impl<'a> IntoIterator for &'a CommandLog {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ClearParams;

    #[test]
    fn log_is_an_array_of_entries() {
        let log = CommandLog::from(vec![
            Command::Clear(ClearParams::back([0.0, 0.0, 0.0, 1.0])),
            Command::Flush,
        ]);
        let text = log.to_json().unwrap();
        assert!(text.starts_with(r#"[["clear","#), "{text}");
        assert!(text.ends_with(r#"["flush"]]"#), "{text}");
        assert_eq!(CommandLog::from_json(&text).unwrap(), log);
    }

    #[test]
    fn bad_entry_reports_its_index() {
        let err = CommandLog::from_json(r#"[["flush"], ["bogus"]]"#).unwrap_err();
        assert!(matches!(err, Error::Replay { index: 1, .. }), "{err}");
        assert!(matches!(err.root(), Error::Format { .. }));
    }

    #[test]
    fn reader_and_writer_agree() {
        let log = CommandLog::from(vec![Command::CheckStatus]);
        let mut buf = Vec::new();
        log.write_to(&mut buf).unwrap();
        assert_eq!(CommandLog::read_from(buf.as_slice()).unwrap(), log);
    }

    #[test]
    fn non_array_is_a_format_error() {
        assert!(matches!(
            CommandLog::from_json(r#"{"commands": []}"#),
            Err(Error::Format { .. })
        ));
    }
}
