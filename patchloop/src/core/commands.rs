//! Command execution guard and the closed command vocabulary.
//!
//! Model-requested commands pass two gates before anything is spawned:
//!
//! 1. [`CommandGuard::permits`]: a plain prefix match against the configured
//!    allow-list. `"ls && rm -rf /"` passes it.
//! 2. [`RepoCommand::parse`]: the string is split into shell words and mapped
//!    onto a fixed set of operations. Bare shell operators are rejected and the
//!    result is run as argv without a shell, so chaining cannot happen. Options
//!    that make `git` or `find` spawn programs or write files are rejected too,
//!    so every admitted command is read-only.

use thiserror::Error;

/// Prefixes allowed when no configuration overrides them.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &[
    "grep",
    "ls",
    "cat",
    "npm run test",
    "npm run lint",
    "git",
    "tail",
    "head",
    "find",
];

const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", "&", ">", ">>", "<", "<<"];

/// `find` primaries that execute programs or write files.
const FIND_FORBIDDEN: &[&str] = &[
    "-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprint0", "-fprintf", "-fls",
];

/// Long git options that spawn programs or write files. Git accepts any
/// unambiguous prefix of a long option, so prefixes are matched too.
const GIT_FORBIDDEN_LONG: &[&str] = &["open-files-in-pager", "output", "ext-diff", "textconv"];

/// Complete option names that merely share a prefix with a forbidden one.
const GIT_SAFE_LONG: &[&str] = &["text"];

/// Short git option that spawns a pager (`grep -O<cmd>`).
const GIT_FORBIDDEN_SHORT: char = 'O';

/// Why a requested command will not run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejection {
    #[error("empty command")]
    Empty,
    #[error("'{0}' does not start with an allowed prefix")]
    NotAllowListed(String),
    #[error("cannot split '{0}' into words")]
    Unparsable(String),
    #[error("'{0}' is not a supported program")]
    UnknownProgram(String),
    #[error("shell operator '{0}' is not allowed")]
    ShellOperator(String),
    #[error("git subcommand '{0}' is not allowed")]
    DisallowedGitSubcommand(String),
    #[error("option '{0}' is not allowed")]
    DisallowedOption(String),
}

/// Prefix allow-list applied to raw command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGuard {
    prefixes: Vec<String>,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_PREFIXES.iter().map(|p| p.to_string()))
    }
}

impl CommandGuard {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
        }
    }

    /// True iff `command` begins with one of the allowed prefixes.
    ///
    /// No grammar is applied here: anything after the prefix is accepted.
    pub fn permits(&self, command: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && command.starts_with(prefix.as_str()))
    }

    /// Run both gates and return the structured command.
    pub fn admit(&self, command: &str) -> Result<RepoCommand, CommandRejection> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(CommandRejection::Empty);
        }
        if !self.permits(trimmed) {
            return Err(CommandRejection::NotAllowListed(trimmed.to_string()));
        }
        RepoCommand::parse(trimmed)
    }
}

/// Read-only git subcommands the model may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitQuery {
    Status,
    Diff,
    Log,
    Show,
    LsFiles,
    Grep,
    Blame,
}

impl GitQuery {
    fn from_subcommand(sub: &str) -> Option<Self> {
        Some(match sub {
            "status" => Self::Status,
            "diff" => Self::Diff,
            "log" => Self::Log,
            "show" => Self::Show,
            "ls-files" => Self::LsFiles,
            "grep" => Self::Grep,
            "blame" => Self::Blame,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Diff => "diff",
            Self::Log => "log",
            Self::Show => "show",
            Self::LsFiles => "ls-files",
            Self::Grep => "grep",
            Self::Blame => "blame",
        }
    }
}

/// The complete set of operations a model can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCommand {
    Grep(Vec<String>),
    Ls(Vec<String>),
    Cat(Vec<String>),
    Head(Vec<String>),
    Tail(Vec<String>),
    Find(Vec<String>),
    RunTests(Vec<String>),
    RunLint(Vec<String>),
    Git(GitQuery, Vec<String>),
}

impl RepoCommand {
    /// Map a command string onto the vocabulary.
    pub fn parse(command: &str) -> Result<Self, CommandRejection> {
        let words = shlex::split(command)
            .ok_or_else(|| CommandRejection::Unparsable(command.to_string()))?;
        if let Some(op) = words.iter().find(|w| SHELL_OPERATORS.contains(&w.as_str())) {
            return Err(CommandRejection::ShellOperator(op.clone()));
        }
        let Some((program, rest)) = words.split_first() else {
            return Err(CommandRejection::Empty);
        };
        let rest = rest.to_vec();
        match program.as_str() {
            "grep" => Ok(Self::Grep(rest)),
            "ls" => Ok(Self::Ls(rest)),
            "cat" => Ok(Self::Cat(rest)),
            "head" => Ok(Self::Head(rest)),
            "tail" => Ok(Self::Tail(rest)),
            "find" => Self::parse_find(rest),
            "npm" => Self::parse_npm(command, &rest),
            "git" => Self::parse_git(&rest),
            other => Err(CommandRejection::UnknownProgram(other.to_string())),
        }
    }

    fn parse_find(args: Vec<String>) -> Result<Self, CommandRejection> {
        if let Some(flag) = args.iter().find(|a| FIND_FORBIDDEN.contains(&a.as_str())) {
            return Err(CommandRejection::DisallowedOption(flag.clone()));
        }
        Ok(Self::Find(args))
    }

    fn parse_npm(command: &str, args: &[String]) -> Result<Self, CommandRejection> {
        match args {
            [run, script, extra @ ..] if run == "run" && script == "test" => {
                Ok(Self::RunTests(extra.to_vec()))
            }
            [run, script, extra @ ..] if run == "run" && script == "lint" => {
                Ok(Self::RunLint(extra.to_vec()))
            }
            _ => Err(CommandRejection::UnknownProgram(command.to_string())),
        }
    }

    fn parse_git(args: &[String]) -> Result<Self, CommandRejection> {
        let Some((sub, rest)) = args.split_first() else {
            return Err(CommandRejection::DisallowedGitSubcommand(String::new()));
        };
        let query = GitQuery::from_subcommand(sub)
            .ok_or_else(|| CommandRejection::DisallowedGitSubcommand(sub.clone()))?;
        if let Some(arg) = rest.iter().find(|a| is_forbidden_git_option(a)) {
            return Err(CommandRejection::DisallowedOption(arg.clone()));
        }
        Ok(Self::Git(query, rest.to_vec()))
    }

    /// Program and argv to spawn.
    pub fn argv(&self) -> (&'static str, Vec<String>) {
        match self {
            Self::Grep(args) => ("grep", args.clone()),
            Self::Ls(args) => ("ls", args.clone()),
            Self::Cat(args) => ("cat", args.clone()),
            Self::Head(args) => ("head", args.clone()),
            Self::Tail(args) => ("tail", args.clone()),
            Self::Find(args) => ("find", args.clone()),
            Self::RunTests(extra) => ("npm", prepend(&["run", "test"], extra)),
            Self::RunLint(extra) => ("npm", prepend(&["run", "lint"], extra)),
            Self::Git(query, args) => ("git", prepend(&[query.as_str()], args)),
        }
    }
}

/// Checks `--name`, `--name=value` and abbreviated names, plus short-option
/// clusters such as `-O`, `-Ocmd` and `-nO`.
fn is_forbidden_git_option(arg: &str) -> bool {
    if let Some(long) = arg.strip_prefix("--") {
        let name = long.split_once('=').map_or(long, |(name, _)| name);
        return !name.is_empty()
            && !GIT_SAFE_LONG.contains(&name)
            && GIT_FORBIDDEN_LONG
                .iter()
                .any(|forbidden| forbidden.starts_with(name));
    }
    match arg.strip_prefix('-') {
        Some(cluster) => cluster.contains(GIT_FORBIDDEN_SHORT),
        None => false,
    }
}

fn prepend(head: &[&str], tail: &[String]) -> Vec<String> {
    head.iter()
        .map(|s| s.to_string())
        .chain(tail.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_accepts_allow_listed_prefix() {
        let guard = CommandGuard::default();
        assert!(guard.permits("git status"));
        assert!(guard.permits("npm run test -- --watch=false"));
    }

    #[test]
    fn guard_rejects_unlisted_command() {
        let guard = CommandGuard::default();
        assert!(!guard.permits("rm -rf /"));
        assert!(!guard.permits("npm install left-pad"));
        assert_eq!(
            guard.admit("rm -rf /"),
            Err(CommandRejection::NotAllowListed("rm -rf /".to_string()))
        );
    }

    /// Known gap: the prefix check alone lets chained commands through.
    #[test]
    fn guard_prefix_match_accepts_chained_command() {
        let guard = CommandGuard::default();
        assert!(guard.permits("ls && rm -rf /"));
    }

    #[test]
    fn vocabulary_rejects_chained_command_the_guard_lets_through() {
        let guard = CommandGuard::default();
        assert_eq!(
            guard.admit("ls && rm -rf /"),
            Err(CommandRejection::ShellOperator("&&".to_string()))
        );
    }

    #[test]
    fn prefix_without_matching_program_is_unknown() {
        let guard = CommandGuard::default();
        assert!(guard.permits("catapult --launch"));
        assert_eq!(
            guard.admit("catapult --launch"),
            Err(CommandRejection::UnknownProgram("catapult".to_string()))
        );
    }

    #[test]
    fn git_is_limited_to_read_only_subcommands() {
        let guard = CommandGuard::default();
        assert_eq!(
            guard.admit("git log --oneline -5"),
            Ok(RepoCommand::Git(
                GitQuery::Log,
                vec!["--oneline".to_string(), "-5".to_string()]
            ))
        );
        assert_eq!(
            guard.admit("git push origin main"),
            Err(CommandRejection::DisallowedGitSubcommand("push".to_string()))
        );
    }

    #[test]
    fn quoted_arguments_stay_single_words() {
        let cmd = RepoCommand::parse("grep -rn \"fn main\" src").expect("parse");
        assert_eq!(
            cmd.argv(),
            (
                "grep",
                vec!["-rn".to_string(), "fn main".to_string(), "src".to_string()]
            )
        );
    }

    #[test]
    fn npm_scripts_map_to_fixed_operations() {
        assert_eq!(
            RepoCommand::parse("npm run test").expect("parse"),
            RepoCommand::RunTests(Vec::new())
        );
        let lint = RepoCommand::parse("npm run lint -- --fix").expect("parse");
        assert_eq!(
            lint.argv(),
            (
                "npm",
                vec![
                    "run".to_string(),
                    "lint".to_string(),
                    "--".to_string(),
                    "--fix".to_string()
                ]
            )
        );
    }

    #[test]
    fn find_exec_is_rejected() {
        assert!(RepoCommand::parse("find . -name '*.rs' -exec rm {} ;").is_err());
        assert!(RepoCommand::parse("find . -name '*.rs'").is_ok());
    }

    #[test]
    fn find_file_writing_primaries_are_rejected() {
        for flag in ["-fprint", "-fprint0", "-fprintf", "-fls"] {
            let command = format!("find . -maxdepth 1 -name README.md {flag} README.md");
            assert_eq!(
                RepoCommand::parse(&command),
                Err(CommandRejection::DisallowedOption(flag.to_string())),
                "{command}"
            );
        }
    }

    #[test]
    fn git_pager_option_is_rejected_in_every_spelling() {
        for command in [
            "git grep -O hi",
            "git grep -Otouch hi",
            "git grep -nO hi",
            "git grep --open-files-in-pager=touch hi",
            "git grep --open-files-in-pager touch hi",
            "git grep --open-files=touch hi",
        ] {
            assert!(
                matches!(
                    RepoCommand::parse(command),
                    Err(CommandRejection::DisallowedOption(_))
                ),
                "{command}"
            );
        }
    }

    #[test]
    fn git_output_and_external_tool_options_are_rejected() {
        for command in [
            "git diff --output=README.md HEAD",
            "git log --output README.md",
            "git show --out=README.md",
            "git diff --ext-diff",
            "git log -p --textconv",
            "git log -p --textc",
        ] {
            assert!(
                matches!(
                    RepoCommand::parse(command),
                    Err(CommandRejection::DisallowedOption(_))
                ),
                "{command}"
            );
        }
    }

    #[test]
    fn ordinary_git_options_still_pass() {
        for command in [
            "git diff --stat HEAD~1",
            "git log --oneline -n 5",
            "git grep -n hello",
            "git diff --no-ext-diff",
            "git show --name-only HEAD",
            "git show --text HEAD",
        ] {
            assert!(RepoCommand::parse(command).is_ok(), "{command}");
        }
    }

    #[test]
    fn configured_prefixes_replace_defaults() {
        let guard = CommandGuard::new(vec!["git".to_string()]);
        assert!(guard.permits("git diff"));
        assert!(!guard.permits("ls -la"));
    }
}
