//! Loop state threaded through each iteration.
//!
//! [`IterationState`] is a plain value: every iteration consumes the previous
//! state and returns the next one. Nothing about the run lives in globals.

use std::path::PathBuf;

use crate::core::types::NextIteration;

/// Strategy used when the planner returns no plan of its own.
pub const DEFAULT_GAMEPLAN: &str = "Explore the repository to understand how it is structured, \
then make the smallest change that moves it toward the goal.";

/// Outputs of the commands run for one iteration, in request order.
///
/// Rebuilt every iteration; never merged with the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutputs {
    entries: Vec<(String, String)>,
}

impl CommandOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record output for `command`. A repeated command keeps its first
    /// position and takes the latest output.
    pub fn insert(&mut self, command: impl Into<String>, output: impl Into<String>) {
        let command = command.into();
        let output = output.into();
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == command) {
            entry.1 = output;
            return;
        }
        self.entries.push((command, output));
    }

    pub fn get(&self, command: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == command)
            .map(|(_, o)| o.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, o)| (c.as_str(), o.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `$ command` headers followed by output, the form fed back to the model.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for (command, output) in self.iter() {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(&format!("$ {command}\n"));
            let body = output.trim_end();
            if body.is_empty() {
                buf.push_str("(no output)\n");
            } else {
                buf.push_str(body);
                buf.push('\n');
            }
        }
        buf
    }
}

/// Everything the next iteration needs from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationState {
    /// Zero-based index of the iteration about to run.
    pub iter: u32,
    pub gameplan: String,
    pub outputs: CommandOutputs,
    pub working_file: Option<PathBuf>,
}

impl IterationState {
    pub fn initial(gameplan: Option<String>, working_file: Option<PathBuf>) -> Self {
        Self {
            iter: 0,
            gameplan: gameplan.unwrap_or_else(|| DEFAULT_GAMEPLAN.to_string()),
            outputs: CommandOutputs::new(),
            working_file,
        }
    }

    /// Move to the next iteration with the model's new gameplan and the
    /// freshly captured outputs. Previous outputs are dropped.
    pub fn advance(self, next: &NextIteration, outputs: CommandOutputs) -> Self {
        Self {
            iter: self.iter + 1,
            gameplan: next.gameplan.clone(),
            outputs,
            working_file: next.working_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_uses_seed_gameplan() {
        let state = IterationState::initial(None, None);
        assert_eq!(state.iter, 0);
        assert_eq!(state.gameplan, DEFAULT_GAMEPLAN);
        assert!(state.outputs.is_empty());
    }

    #[test]
    fn advance_replaces_outputs_instead_of_merging() {
        let mut first = CommandOutputs::new();
        first.insert("ls", "a\nb\n");
        let state = IterationState {
            outputs: first,
            ..IterationState::initial(Some("look around".to_string()), None)
        };

        let mut second = CommandOutputs::new();
        second.insert("cat a", "contents");
        let next = NextIteration {
            gameplan: "edit a".to_string(),
            commands: vec!["cat a".to_string()],
            working_file: Some(PathBuf::from("a")),
        };
        let advanced = state.advance(&next, second);

        assert_eq!(advanced.iter, 1);
        assert_eq!(advanced.gameplan, "edit a");
        assert_eq!(advanced.outputs.len(), 1);
        assert_eq!(advanced.outputs.get("ls"), None);
        assert_eq!(advanced.outputs.get("cat a"), Some("contents"));
        assert_eq!(advanced.working_file, Some(PathBuf::from("a")));
    }

    #[test]
    fn repeated_command_keeps_position_and_latest_output() {
        let mut outputs = CommandOutputs::new();
        outputs.insert("ls", "old");
        outputs.insert("git status", "clean");
        outputs.insert("ls", "new");

        let commands: Vec<&str> = outputs.iter().map(|(c, _)| c).collect();
        assert_eq!(commands, vec!["ls", "git status"]);
        assert_eq!(outputs.get("ls"), Some("new"));
    }

    #[test]
    fn render_marks_empty_output() {
        let mut outputs = CommandOutputs::new();
        outputs.insert("git status --short", "");
        assert_eq!(outputs.render(), "$ git status --short\n(no output)\n");
    }
}
