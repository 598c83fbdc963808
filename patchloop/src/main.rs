//! patchloop CLI.
//!
//! Drives a chat model through plan → iterate → finalize against the git
//! repository in the current directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use patchloop::exit_codes;
use patchloop::io::chat::OpenAiChat;
use patchloop::io::config::{Credentials, LoopConfig, Settings, load_config};
use patchloop::io::git::Git;
use patchloop::io::iteration_log::PatchStatus;
use patchloop::io::layout::{InitOptions, PatchloopPaths, init};
use patchloop::io::prompt::PromptBuilder;
use patchloop::io::pull_request::{GitHubPullRequests, PullRequestHost};
use patchloop::iterate::{IterationSummary, LoopStop};
use patchloop::plan::{choose_branch, request_plan};
use patchloop::run::{Collaborators, run};

#[derive(Parser)]
#[command(
    name = "patchloop",
    version,
    about = "Iterate on a git repository with model-proposed patches"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.patchloop/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan, iterate until complete or the ceiling, then commit.
    Run {
        /// What the change should achieve.
        goal: String,
        /// Override `loop.max_iterations`.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Push the branch and open a pull request after committing.
        #[arg(long)]
        pr: bool,
        /// Config file (default: `.patchloop/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Ask the planner only and print its reply. Changes nothing.
    Plan {
        goal: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show whether a command string would be allowed to run.
    Check {
        command: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    patchloop::logging::init();
    match run_cli() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            goal,
            max_iterations,
            pr,
            config,
        } => cmd_run(&root, &goal, max_iterations, pr, config.as_deref()),
        Command::Plan { goal, config } => cmd_plan(&root, &goal, config.as_deref()),
        Command::Check { command, config } => cmd_check(&root, &command, config.as_deref()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    root: &Path,
    goal: &str,
    max_iterations: Option<u32>,
    pr: bool,
    config_path: Option<&Path>,
) -> Result<i32> {
    let mut config = read_config(root, config_path)?;
    if let Some(max) = max_iterations {
        config.iteration.max_iterations = max;
    }
    if pr {
        config.pull_request.enabled = true;
    }
    config.validate()?;
    let settings = settings_from_env(config)?;

    let chat = OpenAiChat::new(&settings.config.model, settings.credentials.api_key.clone())?;
    let github = if settings.config.pull_request.enabled {
        let token = settings
            .credentials
            .github_token
            .clone()
            .ok_or_else(|| anyhow!("missing {}", settings.config.pull_request.token_env))?;
        Some(GitHubPullRequests::new(&settings.config.pull_request.api_url, token)?)
    } else {
        None
    };
    let collaborators = Collaborators {
        chat: &chat,
        pull_requests: github.as_ref().map(|g| g as &dyn PullRequestHost),
    };

    let mut rng = rand::thread_rng();
    let outcome = run(
        root,
        &settings.config,
        &collaborators,
        goal,
        &mut rng,
        print_progress,
    )?;

    println!("branch: {}", outcome.branch);
    match outcome.iterations.stop {
        LoopStop::Complete { iter } => println!("complete after iteration {iter}"),
        LoopStop::CeilingReached { max_iterations } => {
            println!("stopped at the ceiling of {max_iterations} iterations")
        }
    }
    if outcome.finalize.committed {
        println!("commit: {}", outcome.finalize.commit_message);
    } else {
        println!("commit: none (nothing to commit)");
    }
    if let Some(path) = &outcome.finalize.change_log_path {
        println!("change log: {}", path.display());
    }
    if let Some(url) = &outcome.finalize.pull_request_url {
        println!("pull request: {url}");
    }
    for failure in &outcome.finalize.failures {
        eprintln!("finalize: {failure}");
    }
    Ok(outcome.exit_code())
}

fn cmd_plan(root: &Path, goal: &str, config_path: Option<&Path>) -> Result<i32> {
    let settings = settings_from_env(read_config(root, config_path)?)?;
    let chat = OpenAiChat::new(&settings.config.model, settings.credentials.api_key.clone())?;
    let prompts = PromptBuilder::new(settings.config.iteration.prompt_budget_bytes)?;
    let git = Git::new(root);

    let reply = request_plan(&git, &chat, &settings.config.model, &prompts, goal)?;
    let (branch, source) = choose_branch(&git, goal, &reply.branch, &mut rand::thread_rng())?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    println!("branch: {branch} ({source:?})");
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path, command: &str, config_path: Option<&Path>) -> Result<i32> {
    let config = read_config(root, config_path)?;
    let guard = config.commands.guard();
    println!("prefix allow-list: {}", if guard.permits(command) { "match" } else { "no match" });
    match guard.admit(command) {
        Ok(admitted) => {
            let (program, args) = admitted.argv();
            println!("allowed: {program} {args:?}");
            Ok(exit_codes::OK)
        }
        Err(reason) => {
            println!("rejected: {reason}");
            Ok(exit_codes::REJECTED)
        }
    }
}

fn read_config(root: &Path, explicit: Option<&Path>) -> Result<LoopConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => PatchloopPaths::new(root).config_path,
    };
    load_config(&path)
}

fn settings_from_env(config: LoopConfig) -> Result<Settings> {
    let credentials = Credentials::from_env(&config)?;
    Ok(Settings {
        config,
        credentials,
    })
}

fn print_progress(summary: &IterationSummary) {
    let patch = match summary.patch {
        PatchStatus::None => "no patch",
        PatchStatus::Applied => "patch applied",
        PatchStatus::Rejected => "patch rejected",
    };
    let mut line = format!(
        "iter {}: {patch}, {} command(s) run",
        summary.iter, summary.commands_run
    );
    if summary.commands_rejected > 0 {
        line.push_str(&format!(", {} rejected", summary.commands_rejected));
    }
    if summary.complete {
        line.push_str(", complete");
    }
    if !summary.description.is_empty() {
        line.push_str(&format!(" ({})", summary.description));
    }
    println!("{line}");
}
