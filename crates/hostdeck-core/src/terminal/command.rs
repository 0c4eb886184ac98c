//! Parsing of terminal input lines and shell selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A terminal input line, classified once at the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    /// `cd` or `cd <target>`; handled in-process so the directory persists.
    ChangeDirectory { target: Option<String> },
    /// Anything else, handed to the session's shell.
    Shell { line: String },
}

impl TerminalCommand {
    /// Classify a line. Blank input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line == "cd" {
            return Some(Self::ChangeDirectory { target: None });
        }
        if let Some(rest) = line.strip_prefix("cd ") {
            let target = rest.trim();
            return Some(Self::ChangeDirectory {
                target: (!target.is_empty()).then(|| target.to_string()),
            });
        }

        Some(Self::Shell {
            line: line.to_string(),
        })
    }
}

/// Shell used to run non-`cd` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Sh,
    Powershell,
    Cmd,
}

impl ShellKind {
    pub const ALL: [ShellKind; 4] = [Self::Bash, Self::Sh, Self::Powershell, Self::Cmd];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Powershell => "powershell",
            Self::Cmd => "cmd",
        }
    }

    /// Argument vector running `line` in this shell.
    pub fn argv(self, line: &str) -> Vec<String> {
        let mut argv: Vec<String> = match self {
            Self::Bash | Self::Sh => vec![self.as_str().to_string(), "-c".to_string()],
            Self::Powershell => ["powershell", "-NoProfile", "-NonInteractive", "-Command"]
                .map(str::to_string)
                .to_vec(),
            Self::Cmd => vec!["cmd".to_string(), "/c".to_string()],
        };
        argv.push(line.to_string());
        argv
    }
}

impl Default for ShellKind {
    fn default() -> Self {
        if cfg!(windows) {
            Self::Powershell
        } else {
            Self::Bash
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        // Accept full paths like /bin/bash
        let name = name.rsplit(['/', '\\']).next().unwrap_or_default();
        let name = name.strip_suffix(".exe").unwrap_or(name);
        match name {
            "bash" => Ok(Self::Bash),
            "sh" => Ok(Self::Sh),
            "powershell" | "pwsh" => Ok(Self::Powershell),
            "cmd" => Ok(Self::Cmd),
            other => Err(format!("unknown shell: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blank() {
        assert_eq!(TerminalCommand::parse(""), None);
        assert_eq!(TerminalCommand::parse("   \t "), None);
    }

    #[test]
    fn test_parse_cd() {
        assert_eq!(
            TerminalCommand::parse("cd"),
            Some(TerminalCommand::ChangeDirectory { target: None })
        );
        assert_eq!(
            TerminalCommand::parse("  cd   logs  "),
            Some(TerminalCommand::ChangeDirectory {
                target: Some("logs".to_string())
            })
        );
        assert_eq!(
            TerminalCommand::parse("cd ../.."),
            Some(TerminalCommand::ChangeDirectory {
                target: Some("../..".to_string())
            })
        );
    }

    #[test]
    fn test_parse_cd_lookalikes_are_shell() {
        for line in ["cd..", "cdrecord -v", "echo cd foo", "cd\tlogs"] {
            assert!(
                matches!(TerminalCommand::parse(line), Some(TerminalCommand::Shell { .. })),
                "{line:?}"
            );
        }
    }

    #[test]
    fn test_shell_argv() {
        assert_eq!(ShellKind::Bash.argv("ls -la"), ["bash", "-c", "ls -la"]);
        assert_eq!(ShellKind::Cmd.argv("dir"), ["cmd", "/c", "dir"]);
        assert_eq!(
            ShellKind::Powershell.argv("Get-Date"),
            ["powershell", "-NoProfile", "-NonInteractive", "-Command", "Get-Date"]
        );
    }

    #[test]
    fn test_shell_from_str() {
        assert_eq!("bash".parse::<ShellKind>().unwrap(), ShellKind::Bash);
        assert_eq!("/bin/bash".parse::<ShellKind>().unwrap(), ShellKind::Bash);
        assert_eq!("PowerShell.exe".parse::<ShellKind>().unwrap(), ShellKind::Powershell);
        assert!("zsh".parse::<ShellKind>().is_err());
    }
}
