//! End-to-end runs against a local bare remote.
//!
//! The generator, build tool and PR host are scripted; git is real.

use std::fs;
use std::path::{Path, PathBuf};

use forge::error::{ConfigError, PipelineError, RunPhase, failed_phase};
use forge::io::git::Git;
use forge::io::state::{RecordedOutcome, load_last_srs, load_run_record};
use forge::run::{BUILD_FAILED_PREFIX, RunDeps, RunOutcome, run_once};
use forge::test_support::{
    RecordingPullRequests, ScriptedBuildVerifier, ScriptedGenerator, TestRemote,
};

const BODY: &str = "An Item has a single field `name`. Clients can create an item and read it by id.";

const REQUIREMENTS: &str = "Commit-Message: feat: item service\nItem { id: Long, name: String }. POST /items creates, GET /items/{id} reads.";
const NO_DEPENDENCIES: &str = "---END-DEPS---\nItem { id: Long, name: String }.";
const CODE: &str = "Here is the code.\n```java\n// File: src/main/java/com/example/Item.java\npackage com.example;\n\npublic class Item {}\n```\n// File: src/main/java/com/example/ItemController.java\npackage com.example;\n\npublic class ItemController {}\n";
const TEST: &str = "// File: src/test/java/com/example/ItemControllerTest.java\n```java\npackage com.example;\n\nclass ItemControllerTest {}\n```\n";

fn generation_steps() -> Vec<&'static str> {
    vec![REQUIREMENTS, NO_DEPENDENCIES, CODE, TEST]
}

fn first_run_script() -> Vec<&'static str> {
    let mut steps = vec!["- Adds items with create and read endpoints."];
    steps.extend(generation_steps());
    steps
}

fn feature_branches(remote: &TestRemote) -> Vec<String> {
    remote
        .branches()
        .expect("branches")
        .into_iter()
        .filter(|b| b.starts_with("forge/srs-"))
        .collect()
}

/// Scenario A: valid SRS, pipeline output with file markers, build passes.
#[test]
fn generates_materializes_and_opens_pull_request() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::new(first_run_script());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();
    let deps = RunDeps {
        generator: &generator,
        build: &build,
        pull_requests: &prs,
    };

    let outcome = run_once(&srs, &cfg, &deps).expect("run");

    let RunOutcome::Published {
        branch,
        pull_request,
    } = outcome
    else {
        panic!("expected published outcome, got {outcome:?}");
    };
    assert!(branch.starts_with("forge/srs-"));
    assert_eq!(
        pull_request.as_deref(),
        Some("https://git.example.invalid/pulls/1")
    );
    assert_eq!(generator.remaining(), 0);

    let checkout = cfg.workspace_dir.join("inventory");
    let item = fs::read_to_string(checkout.join("src/main/java/com/example/Item.java"))
        .expect("materialized file");
    assert_eq!(item, "package com.example;\n\npublic class Item {}\n");

    let built = build.last_files();
    for path in [
        "pom.xml",
        "src/main/java/com/example/Item.java",
        "src/main/java/com/example/ItemController.java",
        "src/test/java/com/example/ItemControllerTest.java",
        "src/main/resources/application.properties",
        ".github/workflows/ci.yml",
    ] {
        assert!(built.iter().any(|f| f == path), "{path} missing at build time");
    }

    let pom = remote.show(&branch, "pom.xml").expect("pom on remote");
    for artifact in [
        "spring-boot-starter-web",
        "spring-boot-starter-data-jpa",
        "<artifactId>h2</artifactId>",
        "spring-boot-starter-test",
        "spring-boot-starter-logging",
    ] {
        assert!(pom.contains(artifact), "pom lacks {artifact}");
    }
    assert!(pom.contains("<java.version>17</java.version>"));
    assert!(pom.contains("<version>3.2.5</version>"));

    assert_eq!(remote.subject(&branch).expect("subject"), "feat: item service");
    let tree = remote.tree(&branch).expect("tree");
    assert!(tree.iter().any(|f| f == "CHANGELOG.md"));
    assert!(!tree.iter().any(|f| f.starts_with(".forge/")));
    assert!(!tree.iter().any(|f| f == "BUILD_FAILURE_ANALYSIS.md"));

    let readme = remote.show(&branch, "README.md").expect("readme");
    assert!(readme.contains("Hand-written notes."));
    assert!(readme.contains("<!-- forge:summary:start -->"));
    assert!(readme.contains("POST /items creates"));

    let changelog = remote.show(&branch, "CHANGELOG.md").expect("changelog");
    assert!(changelog.starts_with("# Changelog\n\n## "));
    assert!(changelog.contains("- Adds items with create and read endpoints."));

    let opened = prs.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].base, "main");
    assert_eq!(opened[0].head, branch);
    assert_eq!(opened[0].title, "feat: item service");

    assert_eq!(
        load_last_srs(&checkout).expect("state").as_deref(),
        Some(srs.as_str())
    );
    let record = load_run_record(&checkout).expect("record");
    assert_eq!(record.outcome, RecordedOutcome::Published);
    assert_eq!(record.feature_branch.as_deref(), Some(branch.as_str()));
    assert_eq!(record.written_files.len(), 3);
}

/// Scenario B: a second run with the same SRS is a no-op after fast-forwarding.
#[test]
fn identical_srs_second_run_is_a_no_op() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let first = ScriptedGenerator::new(first_run_script());
    run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &first,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("first run");
    let branches_after_first = feature_branches(&remote);
    assert_eq!(branches_after_first.len(), 1);

    remote
        .push_upstream_change("NOTES.md", "upstream\n")
        .expect("upstream change");

    let second = ScriptedGenerator::new(Vec::<String>::new());
    let outcome = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &second,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("second run");

    assert_eq!(outcome, RunOutcome::NoChange);
    assert!(second.prompts().is_empty(), "pipeline must not run");
    assert_eq!(build.runs(), 1);
    assert_eq!(prs.opened().len(), 1);
    assert_eq!(feature_branches(&remote), branches_after_first);

    let checkout = cfg.workspace_dir.join("inventory");
    let git = Git::new(&checkout);
    assert_eq!(git.current_branch().expect("branch"), "main");
    assert_eq!(git.local_branches().expect("local").len(), 2);
    assert!(checkout.join("NOTES.md").exists(), "base was not fast-forwarded");
    assert!(!checkout.join("CHANGELOG.md").exists());
    assert_eq!(
        load_run_record(&checkout).expect("record").outcome,
        RecordedOutcome::NoChange
    );
}

#[test]
fn cosmetic_change_confirmed_by_backend_is_a_no_op() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let first = ScriptedGenerator::new(first_run_script());
    run_once(
        &remote.srs("inventory", BODY),
        &cfg,
        &RunDeps {
            generator: &first,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("first run");

    let reworded = remote.srs("inventory", &format!("{BODY}\n\n(Typo fixes only.)"));
    let second = ScriptedGenerator::new(["NO_FUNCTIONAL_CHANGE"]);
    let outcome = run_once(
        &reworded,
        &cfg,
        &RunDeps {
            generator: &second,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("second run");

    assert_eq!(outcome, RunOutcome::NoChange);
    let prompts = second.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Previous version:"));
    assert_eq!(feature_branches(&remote).len(), 1);
}

/// Scenario C: failing build publishes the failure report without a PR.
#[test]
fn failing_build_takes_the_failure_path() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let mut script = first_run_script();
    script.push("ItemControllerTest references a missing ItemService class.");
    let generator = ScriptedGenerator::new(script);
    let build = ScriptedBuildVerifier::failing(
        "[ERROR] ItemControllerTest.java:[3,5] cannot find symbol\n[INFO] BUILD FAILURE",
    );
    let prs = RecordingPullRequests::new();
    let deps = RunDeps {
        generator: &generator,
        build: &build,
        pull_requests: &prs,
    };

    let outcome = run_once(&srs, &cfg, &deps).expect("run");

    let RunOutcome::BuildFailed { branch } = &outcome else {
        panic!("expected build failure, got {outcome:?}");
    };
    assert_eq!(outcome.exit_code(), forge::exit_codes::BUILD_FAILED);
    assert!(prs.opened().is_empty());

    let subject = remote.subject(branch).expect("subject");
    assert!(subject.starts_with(BUILD_FAILED_PREFIX));
    assert_eq!(subject, "[BUILD FAILED] feat: item service");

    let analysis = remote
        .show(branch, "BUILD_FAILURE_ANALYSIS.md")
        .expect("analysis file");
    assert!(analysis.contains("missing ItemService class"));
    assert!(analysis.contains("cannot find symbol"));

    let review_prompt = generator.prompts().pop().expect("review prompt");
    assert!(review_prompt.contains("[INFO] BUILD FAILURE"));

    let checkout = cfg.workspace_dir.join("inventory");
    assert!(checkout.join("BUILD_FAILURE_ANALYSIS.md").exists());
    assert_eq!(
        load_run_record(&checkout).expect("record").outcome,
        RecordedOutcome::BuildFailed
    );
}

#[test]
fn missing_directive_aborts_before_side_effects() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = format!("checkout_branch: main\nRepository-Name: inventory\n\n{BODY}\n");
    let generator = ScriptedGenerator::new(first_run_script());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let err = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .unwrap_err();

    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingDirective("GitHub-URL"))
    );
    assert_eq!(failed_phase(&err), Some(RunPhase::Config));
    assert!(format!("{err:#}").starts_with("config phase failed: "));
    assert!(!cfg.workspace_dir.exists());
    assert!(generator.prompts().is_empty());
    assert_eq!(build.runs(), 0);
}

#[test]
fn repository_path_cannot_escape_the_workspace() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("../outside", BODY);
    let generator = ScriptedGenerator::new(Vec::<String>::new());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let err = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnsafeRepoPath(_))
    ));
    assert!(!cfg.workspace_dir.exists());
}

/// `path` spelled relative to the current directory.
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().expect("cwd");
    let mut rel = PathBuf::new();
    for _ in cwd.components().skip(1) {
        rel.push("..");
    }
    rel.push(path.strip_prefix("/").expect("absolute path"));
    rel
}

#[test]
fn relative_workspace_dir_clones_into_the_workspace() {
    let remote = TestRemote::new().expect("remote");
    let mut cfg = remote.config();
    let workspace = cfg.workspace_dir.clone();
    cfg.workspace_dir = relative_to_cwd(&workspace);
    assert!(cfg.workspace_dir.is_relative());
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::new(first_run_script());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let outcome = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("run");

    assert!(matches!(outcome, RunOutcome::Published { .. }));
    assert!(workspace.join("inventory").join(".git").exists());
    assert!(!workspace.join("inventory").join("inventory").exists());
    assert_eq!(feature_branches(&remote).len(), 1);
}

#[test]
fn transient_stage_failure_restarts_the_whole_attempt() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let mut steps = vec![
        Ok("- Adds items.".to_string()),
        Ok(REQUIREMENTS.to_string()),
        Ok(NO_DEPENDENCIES.to_string()),
        ScriptedGenerator::transient("503 overloaded"),
    ];
    steps.extend(generation_steps().into_iter().map(|s| Ok(s.to_string())));
    let generator = ScriptedGenerator::from_steps(steps);
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let outcome = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("run");

    assert!(matches!(outcome, RunOutcome::Published { .. }));
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 8);
    assert_eq!(prompts[1], prompts[4], "second attempt starts at requirements");
}

#[test]
fn exhausted_retries_abort_without_publishing() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::from_steps(vec![
        Ok("- Adds items.".to_string()),
        ScriptedGenerator::transient("429"),
        ScriptedGenerator::transient("429"),
        ScriptedGenerator::transient("429"),
    ]);
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let err = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .unwrap_err();

    assert_eq!(failed_phase(&err), Some(RunPhase::Generation));
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(generator.prompts().len(), 4);
    assert_eq!(build.runs(), 0);
    assert!(feature_branches(&remote).is_empty());

    let checkout = cfg.workspace_dir.join("inventory");
    assert_eq!(load_last_srs(&checkout).expect("state"), None);
}

#[test]
fn terminal_stage_failure_is_not_retried() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::from_steps(vec![
        Ok("- Adds items.".to_string()),
        ScriptedGenerator::terminal("invalid api key"),
    ]);
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let err = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::NonRetryable { .. })
    ));
    assert!(format!("{err:#}").contains("invalid api key"));
    assert_eq!(generator.prompts().len(), 2);
}

#[test]
fn push_failure_is_logged_and_skips_the_pull_request() {
    let remote = TestRemote::new().expect("remote");
    let mut cfg = remote.config();
    cfg.git.remote = "no-such-remote".to_string();
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::new(first_run_script());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::new();

    let outcome = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("run");

    let RunOutcome::Published {
        branch,
        pull_request,
    } = outcome
    else {
        panic!("expected published outcome");
    };
    assert_eq!(pull_request, None);
    assert!(prs.opened().is_empty());
    assert!(feature_branches(&remote).is_empty());

    let git = Git::new(cfg.workspace_dir.join("inventory"));
    assert_eq!(git.current_branch().expect("branch"), branch);
    assert_eq!(git.head_subject().expect("subject"), "feat: item service");
}

#[test]
fn pull_request_failure_does_not_fail_the_run() {
    let remote = TestRemote::new().expect("remote");
    let cfg = remote.config();
    let srs = remote.srs("inventory", BODY);
    let generator = ScriptedGenerator::new(first_run_script());
    let build = ScriptedBuildVerifier::passing();
    let prs = RecordingPullRequests::failing();

    let outcome = run_once(
        &srs,
        &cfg,
        &RunDeps {
            generator: &generator,
            build: &build,
            pull_requests: &prs,
        },
    )
    .expect("run");

    assert!(matches!(
        outcome,
        RunOutcome::Published {
            pull_request: None,
            ..
        }
    ));
    assert_eq!(prs.opened().len(), 1);
    assert_eq!(feature_branches(&remote).len(), 1);
}
