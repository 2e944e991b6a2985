//! In-job command normalization and shell quoting
//!
//! A command arrives either as one string (`"echo foo"`) or as an argument
//! list (`["echo", "foo"]`). Both are normalized once into a flat argument
//! list; every element is quoted individually (`shell_words`) when rendered
//! into the startup script.

use serde::{Deserialize, Serialize};

/// Command to run inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// A single string, tokenized on whitespace
    Raw(String),
    /// An argument list, used as-is
    Args(Vec<String>),
}

impl Default for Command {
    fn default() -> Self {
        Command::Args(Vec::new())
    }
}

impl Command {
    /// Canonical argument list.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Command::Raw(s) => s.split_whitespace().map(str::to_string).collect(),
            Command::Args(args) => args.clone(),
        }
    }

    /// Arguments quoted and joined for a shell command line.
    pub fn to_shell(&self) -> String {
        shell_words::join(self.to_args())
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        Command::Raw(s.to_string())
    }
}

impl From<Vec<String>> for Command {
    fn from(args: Vec<String>) -> Self {
        Command::Args(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_and_args_normalize_identically() {
        let raw = Command::from("echo foo");
        let args = Command::from(vec!["echo".to_string(), "foo".to_string()]);
        assert_eq!(raw.to_args(), args.to_args());
        assert_eq!(raw.to_shell(), args.to_shell());
        assert_eq!(raw.to_shell(), "echo foo");
    }

    #[test]
    fn test_raw_collapses_whitespace() {
        let raw = Command::from("  python   run.py\t--fast ");
        assert_eq!(raw.to_args(), vec!["python", "run.py", "--fast"]);
    }

    #[test]
    fn test_args_keep_embedded_spaces() {
        let args = Command::Args(vec!["sh".into(), "-c".into(), "echo hi > out".into()]);
        assert_eq!(args.to_shell(), "sh -c 'echo hi > out'");
    }

    #[test]
    fn test_single_quotes_and_empty_args() {
        let args = Command::Args(vec!["echo".into(), "it's".into(), "".into(), "$HOME".into()]);
        assert_eq!(args.to_shell(), r"echo 'it'\''s' '' '$HOME'");
    }

    #[test]
    fn test_default_is_no_args() {
        assert!(Command::default().to_args().is_empty());
        assert!(Command::from("   ").to_args().is_empty());
    }

    #[test]
    fn test_untagged_deserialize() {
        let raw: Command = serde_json::from_str(r#""echo foo""#).unwrap();
        let list: Command = serde_json::from_str(r#"["echo","foo"]"#).unwrap();
        assert_eq!(raw.to_args(), list.to_args());
    }
}
