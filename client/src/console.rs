//! Line commands read from stdin by the console client

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Leave,
    Name(String),
    /// Hold the fire button down until `Release`.
    Fire,
    Release,
    /// Take one beam hit.
    Hit,
    Status,
    Quit,
}

impl Command {
    pub const HELP: &'static str =
        "Commands: connect | leave | name <value> | fire | release | hit | status | quit";

    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "connect" | "play" => Some(Command::Connect),
            "leave" => Some(Command::Leave),
            // An empty name still parses so the session can reject it.
            "name" => Some(Command::Name(rest.to_string())),
            "fire" => Some(Command::Fire),
            "release" => Some(Command::Release),
            "hit" => Some(Command::Hit),
            "status" => Some(Command::Status),
            "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("connect"), Some(Command::Connect));
        assert_eq!(Command::parse("  LEAVE "), Some(Command::Leave));
        assert_eq!(Command::parse("fire"), Some(Command::Fire));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
        assert_eq!(Command::parse("dance"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_parse_name_keeps_inner_spaces() {
        assert_eq!(
            Command::parse("name Ada Lovelace"),
            Some(Command::Name("Ada Lovelace".to_string()))
        );
        assert_eq!(Command::parse("name"), Some(Command::Name(String::new())));
    }
}
