//! Tokenizer for `COMMAND [--key=value ...]` lines.

use std::collections::BTreeMap;

use crate::error::{ControlError, ControlResult};

/// One parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub params: BTreeMap<String, String>,
    /// Tokens that did not split into exactly one key and one value.
    pub malformed: Vec<String>,
}

impl Request {
    /// Parses a line received from a client.
    ///
    /// The command ends at the first space. The rest is split on spaces and
    /// every token on `=`; the first two characters of a key (the `--`
    /// marker) are dropped. A later duplicate key overwrites an earlier one.
    pub fn parse(line: &str) -> Self {
        let line: String = line.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        let (command, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));

        let mut request = Request {
            command: command.to_string(),
            ..Request::default()
        };

        for token in rest.split(' ').filter(|chunk| !chunk.is_empty()) {
            let parts: Vec<&str> = token.split('=').collect();
            let [key, value] = parts.as_slice() else {
                request.malformed.push(token.to_string());
                continue;
            };
            let key: String = key.chars().skip(2).collect();
            request.params.insert(key, value.to_string());
        }

        request
    }

    /// Value of a required key. An empty value counts as missing.
    pub fn require(&self, key: &str) -> ControlResult<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ControlError::MissingParameter(key.to_string()))
    }

    pub fn syntax_errors(&self) -> impl Iterator<Item = ControlError> + '_ {
        self.malformed
            .iter()
            .map(|token| ControlError::ProtocolSyntax(token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn command_without_arguments() {
        let request = Request::parse("list\r\n");
        assert_eq!(request.command, "list");
        assert!(request.params.is_empty());
        assert!(request.malformed.is_empty());
    }

    #[test]
    fn key_value_pairs_drop_marker() {
        let request = Request::parse("add-ffu --bus=1 --id=42");
        assert_eq!(request.command, "add-ffu");
        assert_eq!(request.params, params(&[("bus", "1"), ("id", "42")]));
    }

    #[test]
    fn repeated_spaces_are_skipped() {
        let request = Request::parse("broadcast   --bus=0    --speed=300 ");
        assert_eq!(request.params, params(&[("bus", "0"), ("speed", "300")]));
        assert!(request.malformed.is_empty());
    }

    #[test]
    fn malformed_tokens_are_collected_and_skipped() {
        let request = Request::parse("set --id=3 --flag --a=b=c --rpm=900");

        assert_eq!(request.params, params(&[("id", "3"), ("rpm", "900")]));
        assert_eq!(request.malformed, vec!["--flag", "--a=b=c"]);
        assert_eq!(request.syntax_errors().count(), 2);
    }

    #[test]
    fn later_duplicate_overwrites() {
        let request = Request::parse("get --id=1 --id=2");
        assert_eq!(request.params, params(&[("id", "2")]));
    }

    #[test]
    fn short_keys_become_empty() {
        let request = Request::parse("raw-set x=1");
        assert_eq!(request.params, params(&[("", "1")]));
    }

    #[test]
    fn require_treats_empty_value_as_missing() {
        let request = Request::parse("add-ffu --bus= --id=4");

        assert_eq!(request.require("id").unwrap(), "4");
        assert!(matches!(
            request.require("bus"),
            Err(ControlError::MissingParameter(key)) if key == "bus"
        ));
        assert!(request.require("speed").is_err());
    }

    #[test]
    fn empty_line_has_empty_command() {
        let request = Request::parse("");
        assert_eq!(request.command, "");
    }
}
