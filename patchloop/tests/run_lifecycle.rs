//! End-to-end runs against a scratch repository with a scripted model.
//!
//! Each test drives `run` through plan → loop → finalize and checks the
//! repository, the iteration log and the number of model calls.

use std::fs;

use rand::SeedableRng;
use rand::rngs::StdRng;

use patchloop::core::reply::ReplyError;
use patchloop::exit_codes;
use patchloop::io::config::LoopConfig;
use patchloop::io::git::Git;
use patchloop::io::iteration_log::IterationPaths;
use patchloop::io::layout::PatchloopPaths;
use patchloop::iterate::LoopStop;
use patchloop::plan::BranchSource;
use patchloop::run::{Collaborators, run};
use patchloop::test_support::{
    RecordingPullRequests, ScriptedChat, TestRepo, complete_reply, continue_reply,
};

const SERVER_JS: &str = "const routes = {\n  \"/\": () => \"ok\",\n};\nmodule.exports = routes;\n";

const HEALTH_PATCH: &str = "\
--- a/src/server.js
+++ b/src/server.js
@@ -1,4 +1,5 @@
 const routes = {
   \"/\": () => \"ok\",
+  \"/health\": () => \"healthy\",
 };
 module.exports = routes;
";

const PLAN_REPLY: &str = r#"{
  "branch": "feat/health-endpoint",
  "plan": "Add a /health route to the routes table in src/server.js.",
  "filesToRead": ["src/server.js"],
  "filesToWrite": ["src/server.js"],
  "changes": ["register GET /health"]
}"#;

const FINALIZE_REPLY: &str = r#"{
  "commitMessage": "Add /health endpoint",
  "changeLog": {"breakingChanges": [], "newFeatures": ["GET /health returns healthy"], "bugFixes": []}
}"#;

fn server_repo() -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    fs::create_dir_all(repo.path().join("src")).expect("mkdir");
    fs::write(repo.path().join("src/server.js"), SERVER_JS).expect("write server");
    repo.git(&["add", "-A"]).expect("add");
    repo.git(&["commit", "--quiet", "-m", "chore: add server"]).expect("commit");
    repo
}

#[test]
fn health_endpoint_completes_at_first_iteration_with_one_commit() {
    let repo = server_repo();
    let commits_before = repo.commit_count().expect("count");
    let chat = ScriptedChat::new([
        PLAN_REPLY.to_string(),
        complete_reply(HEALTH_PATCH, "register the /health route"),
        FINALIZE_REPLY.to_string(),
    ]);
    let mut rng = StdRng::seed_from_u64(42);
    let mut progress = Vec::new();

    let outcome = run(
        repo.path(),
        &LoopConfig::default(),
        &Collaborators {
            chat: &chat,
            pull_requests: None,
        },
        "add a /health endpoint",
        &mut rng,
        |summary| progress.push(summary.clone()),
    )
    .expect("run");

    assert_eq!(outcome.branch, "feat/health-endpoint");
    assert_eq!(outcome.branch_source, BranchSource::Model);
    assert_eq!(outcome.iterations.stop, LoopStop::Complete { iter: 0 });
    assert_eq!(outcome.iterations.iterations, 1);
    assert_eq!(progress.len(), 1);
    assert!(progress[0].complete);
    assert_eq!(outcome.exit_code(), exit_codes::OK);

    // plan + one iteration + finalize
    assert_eq!(chat.requests().len(), 3);

    assert_eq!(repo.commit_count().expect("count"), commits_before + 1);
    assert_eq!(repo.head_subject().expect("subject"), "Add /health endpoint");
    let server = fs::read_to_string(repo.path().join("src/server.js")).expect("read");
    assert!(server.contains("\"/health\": () => \"healthy\""));
    Git::new(repo.path()).ensure_clean().expect("everything committed");

    let iter0 = IterationPaths::new(repo.path(), &outcome.branch, 0);
    assert!(iter0.prompt_path.is_file());
    assert!(iter0.response_path.is_file());
    assert!(iter0.patch_path.is_file());
    assert!(iter0.complete_path.is_file());
    assert!(iter0.meta_path.is_file());
    assert!(!iter0.apply_log_path.exists());
    assert!(!iter0.out_log_path.exists());
    assert!(!iter0.next_gameplan_path.exists());
    assert!(!IterationPaths::new(repo.path(), &outcome.branch, 1).dir.exists());

    let prompt = fs::read_to_string(&iter0.prompt_path).expect("prompt");
    assert!(prompt.contains("<working_file path=\"src/server.js\">"));
    assert!(prompt.contains("Add a /health route"));

    let change_log = PatchloopPaths::new(repo.path()).change_log_path(&outcome.branch);
    let change_log = fs::read_to_string(change_log).expect("change log");
    assert!(change_log.contains("- GET /health returns healthy"));
}

#[test]
fn unparsable_reply_fails_without_commit_or_finalize() {
    let repo = server_repo();
    let commits_before = repo.commit_count().expect("count");
    let chat = ScriptedChat::new([
        PLAN_REPLY.to_string(),
        "Here is what I would change: add a route.".to_string(),
        FINALIZE_REPLY.to_string(),
    ]);
    let mut rng = StdRng::seed_from_u64(42);

    let err = run(
        repo.path(),
        &LoopConfig::default(),
        &Collaborators {
            chat: &chat,
            pull_requests: None,
        },
        "add a /health endpoint",
        &mut rng,
        |_| {},
    )
    .unwrap_err();

    assert!(err.downcast_ref::<ReplyError>().is_some());
    // plan + failed iteration; the finalizer was never asked
    assert_eq!(chat.requests().len(), 2);
    assert_eq!(repo.commit_count().expect("count"), commits_before);

    let iter0 = IterationPaths::new(repo.path(), "feat/health-endpoint", 0);
    assert!(iter0.response_path.is_file());
    assert!(!iter0.meta_path.exists());
    assert!(
        !PatchloopPaths::new(repo.path())
            .change_log_path("feat/health-endpoint")
            .exists()
    );
}

#[test]
fn multi_iteration_run_opens_pull_request() {
    let repo = server_repo();
    repo.add_bare_origin().expect("origin");
    let start = Git::new(repo.path()).current_branch().expect("branch");

    let mut config = LoopConfig::default();
    config.pull_request.enabled = true;
    config.pull_request.owner = Some("acme".to_string());
    config.pull_request.repo = Some("server".to_string());

    let chat = ScriptedChat::new([
        PLAN_REPLY.to_string(),
        continue_reply("Patch the routes table.", &["cat src/server.js", "git status"]),
        complete_reply(HEALTH_PATCH, "register the /health route"),
        FINALIZE_REPLY.to_string(),
    ]);
    let host = RecordingPullRequests::new(Some("https://github.com/acme/server/pull/1"));
    let mut rng = StdRng::seed_from_u64(7);

    let outcome = run(
        repo.path(),
        &config,
        &Collaborators {
            chat: &chat,
            pull_requests: Some(&host),
        },
        "add a /health endpoint",
        &mut rng,
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.iterations.stop, LoopStop::Complete { iter: 1 });
    assert_eq!(outcome.exit_code(), exit_codes::OK);
    assert_eq!(
        outcome.finalize.pull_request_url.as_deref(),
        Some("https://github.com/acme/server/pull/1")
    );

    let sent = host.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].head, "feat/health-endpoint");
    assert_eq!(sent[0].base, start);
    assert_eq!(sent[0].body, "Patch the routes table.");

    let second_prompt = chat.requests()[2]
        .user_prompt()
        .expect("user prompt")
        .to_string();
    assert!(second_prompt.contains("$ cat src/server.js"));
    assert!(second_prompt.contains("Patch the routes table."));

    let iter0 = IterationPaths::new(repo.path(), &outcome.branch, 0);
    assert!(iter0.out_log_path.is_file());
    assert!(iter0.next_gameplan_path.is_file());
    assert!(!iter0.complete_path.exists());
}
