//! Prompt builder for planner, iteration and finalize calls.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed per-prompt order and the last remaining section is
//! truncated as a final resort.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::io::context::ContextBundle;

const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");
const FINALIZE_TEMPLATE: &str = include_str!("prompts/finalize.md");

const PLANNER_DROP_ORDER: &[&str] = &["tree"];
const ITERATION_DROP_ORDER: &[&str] = &["tree", "readme", "status", "command_output", "working_file"];
const FINALIZE_DROP_ORDER: &[&str] = &["gameplan"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

#[derive(Debug, Clone, Serialize)]
struct WorkingFileContext {
    path: String,
    contents: String,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without its marker.
    content: String,
}

/// Per-iteration inputs that do not come from the repository snapshot.
#[derive(Debug, Clone, Copy)]
pub struct IterationPromptInputs<'a> {
    pub goal: &'a str,
    pub gameplan: &'a str,
    pub iter: u32,
    pub max_iterations: u32,
    pub allowed_prefixes: &'a [String],
}

/// Renders prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    budget_bytes: usize,
    env: Environment<'static>,
    section_re: Regex,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("iteration", ITERATION_TEMPLATE)
            .context("load iteration template")?;
        env.add_template("finalize", FINALIZE_TEMPLATE)
            .context("load finalize template")?;
        let section_re = Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .context("compile section marker regex")?;
        Ok(Self {
            budget_bytes,
            env,
            section_re,
        })
    }

    /// The system prompt shared by every call.
    pub fn system(&self) -> &'static str {
        SYSTEM_PROMPT.trim()
    }

    pub fn build_planner(&self, goal: &str, tree: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("planner")?
            .render(context! {
                goal => goal.trim(),
                tree => tree.trim(),
            })
            .context("render planner prompt")?;
        Ok(self.fit(&rendered, PLANNER_DROP_ORDER))
    }

    pub fn build_iteration(
        &self,
        inputs: &IterationPromptInputs<'_>,
        bundle: &ContextBundle,
    ) -> Result<String> {
        let working_file = bundle.working_file.as_ref().map(|w| WorkingFileContext {
            path: w.path.display().to_string(),
            contents: w.contents.trim_end().to_string(),
        });
        let rendered = self
            .env
            .get_template("iteration")?
            .render(context! {
                iter => inputs.iter,
                max_iterations => inputs.max_iterations,
                allowed_prefixes => inputs.allowed_prefixes,
                goal => inputs.goal.trim(),
                gameplan => inputs.gameplan.trim(),
                working_file => working_file,
                command_output => bundle.command_output.trim(),
                status => bundle.status.trim(),
                readme => bundle.readme.trim(),
                tree => bundle.tree.trim(),
            })
            .context("render iteration prompt")?;
        Ok(self.fit(&rendered, ITERATION_DROP_ORDER))
    }

    pub fn build_finalize(&self, goal: &str, gameplan: &str, diff: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("finalize")?
            .render(context! {
                goal => goal.trim(),
                gameplan => gameplan.trim(),
                diff => diff.trim_end(),
            })
            .context("render finalize prompt")?;
        Ok(self.fit(&rendered, FINALIZE_DROP_ORDER))
    }

    fn fit(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = self.parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes, drop_order);
        render_sections(&sections)
    }

    fn parse_sections(&self, rendered: &str) -> Vec<ParsedSection> {
        let markers: Vec<(usize, usize, String, bool)> = self
            .section_re
            .captures_iter(rendered)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let key = caps.get(1)?.as_str().to_string();
                let required = caps.get(2)?.as_str() == "required";
                Some((whole.start(), whole.end(), key, required))
            })
            .collect();

        let mut sections = Vec::new();
        for (i, (_, end, key, required)) in markers.iter().enumerate() {
            let next_start = markers
                .get(i + 1)
                .map(|(start, ..)| *start)
                .unwrap_or(rendered.len());
            let content = rendered[*end..next_start].trim().to_string();
            if !content.is_empty() || *required {
                sections.push(ParsedSection {
                    key: key.clone(),
                    required: *required,
                    content,
                });
            }
        }
        sections
    }
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in drop_order {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = *key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, others)) = sections.split_last_mut() else {
        return;
    };
    let other_len: usize = others.iter().map(|s| s.content.len()).sum();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::io::context::WorkingFile;

    fn bundle() -> ContextBundle {
        ContextBundle {
            readme: "# Demo\n\nA tiny web service.\n".to_string(),
            status: String::new(),
            tree: "README.md\nsrc/server.js\n".to_string(),
            command_output: "$ ls\nREADME.md\nsrc\n".to_string(),
            working_file: Some(WorkingFile {
                path: PathBuf::from("src/server.js"),
                contents: "const routes = {};\n".to_string(),
            }),
        }
    }

    fn inputs(prefixes: &[String]) -> IterationPromptInputs<'_> {
        IterationPromptInputs {
            goal: "add a /health endpoint",
            gameplan: "add the route",
            iter: 0,
            max_iterations: 20,
            allowed_prefixes: prefixes,
        }
    }

    /// Required sections lead; droppable repository context follows.
    #[test]
    fn iteration_prompt_ordering_is_stable() {
        let prefixes = vec!["ls".to_string(), "git".to_string()];
        let prompt = PromptBuilder::new(100_000)
            .expect("builder")
            .build_iteration(&inputs(&prefixes), &bundle())
            .expect("render");

        let contract = prompt.find("### Iteration Contract").expect("contract");
        let goal = prompt.find("### Goal").expect("goal");
        let gameplan = prompt.find("### Gameplan").expect("gameplan");
        let working = prompt.find("### Working File").expect("working file");
        let output = prompt.find("### Command Output").expect("command output");
        let readme = prompt.find("### README").expect("readme");
        let tree = prompt.find("### Tracked Files").expect("tree");

        assert!(contract < goal && goal < gameplan);
        assert!(gameplan < working && working < output);
        assert!(output < readme && readme < tree);
        assert!(prompt.contains("<working_file path=\"src/server.js\">"));
        assert!(prompt.contains("start with one of: ls, git."));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let mut b = bundle();
        b.working_file = None;
        b.command_output = String::new();
        let prompt = PromptBuilder::new(100_000)
            .expect("builder")
            .build_iteration(&inputs(&[]), &b)
            .expect("render");
        assert!(!prompt.contains("### Working File"));
        assert!(!prompt.contains("### Command Output"));
        assert!(!prompt.contains("### Git Status"));
    }

    #[test]
    fn budget_drops_tree_and_readme_first() {
        let mut b = bundle();
        b.tree = "src/file.rs\n".repeat(400);
        b.readme = "readme line\n".repeat(400);
        let prompt = PromptBuilder::new(3_000)
            .expect("builder")
            .build_iteration(&inputs(&[]), &b)
            .expect("render");

        assert!(!prompt.contains("### Tracked Files"));
        assert!(!prompt.contains("### README"));
        assert!(prompt.contains("### Iteration Contract"));
        assert!(prompt.contains("### Gameplan"));
        assert!(prompt.contains("### Working File"));
    }

    #[test]
    fn finalize_truncates_large_diff_but_keeps_it() {
        let diff = "+ added line ✓\n".repeat(2_000);
        let prompt = PromptBuilder::new(4_000)
            .expect("builder")
            .build_finalize("add a /health endpoint", "done", &diff)
            .expect("render");

        assert!(prompt.len() <= 4_000 + 2 * 4);
        assert!(prompt.ends_with("[truncated]"));
        assert!(prompt.contains("### Staged Diff"));
        assert!(!prompt.contains("### Final Gameplan"));
    }

    #[test]
    fn planner_prompt_contains_goal_and_tree() {
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_planner("add a /health endpoint", "README.md\nsrc/server.js")
            .expect("render");
        assert!(prompt.contains("<goal>\nadd a /health endpoint\n</goal>"));
        assert!(prompt.contains("src/server.js"));
    }
}
