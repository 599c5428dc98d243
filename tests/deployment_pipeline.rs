// ABOUTME: Integration tests for the deployment pipeline engine.
// ABOUTME: Happy path, retries, skips, pre-flight rejections, mutual exclusion, and the feature gate.

mod support;

use nonempty::nonempty;
use rollout::deploy::{DeployError, DeployErrorKind};
use rollout::events::DeploymentEvent;
use rollout::notify::NotificationKind;
use rollout::project::{Project, ProjectStore, StepConfig, WorkDir};
use rollout::state::{DeploymentStatus, Slot, StateStore, StepStatus};
use rollout::types::StepId;
use std::path::PathBuf;
use support::{CWD, Harness, Script, milestones, slug, three_step_project};
use tokio::time::Instant;

mod happy_path {
    use super::*;

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner.on("npm_install", [Script::Succeed(vec!["added 42 packages\n"])]);

        let handle = h.deployer.start(&slug("backend"), "alice").await.unwrap();
        assert_eq!(handle.deployment().status, DeploymentStatus::Running);
        assert_eq!(handle.deployment().current_step.step.as_str(), "git_pull");

        let (events, state) = handle.collect().await.unwrap();

        assert_eq!(
            milestones(&events),
            vec![
                "start git_pull #1",
                "complete git_pull success",
                "start npm_install #1",
                "complete npm_install success",
                "start build #1",
                "complete build success",
                "deployment success",
            ]
        );
        assert_eq!(state.status, DeploymentStatus::Success);
        assert_eq!(state.completed_steps.len(), 3);
        assert!(state.finished_at.is_some());
        assert_eq!(state.triggered_by, "alice");
        assert_eq!(h.runner.steps_run(), vec!["git_pull", "npm_install", "build"]);
    }

    #[tokio::test]
    async fn final_snapshot_lands_in_both_slots() {
        let h = Harness::new([three_step_project("backend")]);
        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let current = h.states.get(Slot::Current).await.unwrap().unwrap();
        let last = h.states.get(Slot::Last).await.unwrap().unwrap();
        assert_eq!(current, state);
        assert_eq!(last, state);
        assert_eq!(h.deployer.last().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn output_accumulates_on_the_step() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner
            .on("build", [Script::Succeed(vec!["compiling\n", "done\n"])]);

        let (events, state) = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let build = &state.completed_steps[&StepId::new("build")];
        assert_eq!(build.output, "compiling\ndone\n");

        let chunks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DeploymentEvent::StepOutput { step, output } if step.as_str() == "build" => {
                    Some(output.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["compiling\n", "done\n"]);
    }

    #[tokio::test]
    async fn commands_run_in_the_resolved_work_dir_with_deployment_env() {
        let h = Harness::new([three_step_project("backend")]);
        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let invocations = h.runner.invocations();
        let first = &invocations[0];
        assert_eq!(first.command, "git");
        assert_eq!(first.args, vec!["pull"]);
        assert_eq!(first.work_dir, PathBuf::from(CWD));
        assert_eq!(first.env["ROLLOUT_DEPLOYMENT_ID"], state.id.as_str());
        assert_eq!(first.env["ROLLOUT_PROJECT"], "backend");
        assert_eq!(first.env["ROLLOUT_STEP"], "git_pull");
        assert_eq!(first.env["ROLLOUT_TRIGGERED_BY"], "alice");
    }

    #[tokio::test]
    async fn notifies_start_and_success() {
        let h = Harness::new([three_step_project("backend")]);
        h.deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(
            h.notifier.kinds(),
            vec![NotificationKind::Started, NotificationKind::Succeeded]
        );
        assert!(h.notifier.sent()[1].duration.is_some());
    }

    #[tokio::test]
    async fn every_announced_step_is_already_persisted() {
        let h = Harness::new([three_step_project("backend")]);
        let mut handle = h.deployer.start(&slug("backend"), "alice").await.unwrap();

        while let Some(event) = handle.next_event().await {
            match event {
                DeploymentEvent::StepComplete { step, status, .. } => {
                    let stored = h.states.get(Slot::Current).await.unwrap().unwrap();
                    assert_eq!(stored.completed_steps[&step].status, status);
                }
                DeploymentEvent::DeploymentComplete { deployment } => {
                    let stored = h.states.get(Slot::Current).await.unwrap().unwrap();
                    assert_eq!(stored.status, deployment.status);
                }
                _ => {}
            }
        }
    }
}

mod retries {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failing_step_is_attempted_max_times_with_backoff() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner
            .on("npm_install", [Script::Fail(1, vec!["npm ERR! network\n"])]);

        let started = Instant::now();
        let (events, state) = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert!(started.elapsed() >= std::time::Duration::from_secs(4));
        assert_eq!(
            milestones(&events),
            vec![
                "start git_pull #1",
                "complete git_pull success",
                "start npm_install #1",
                "start npm_install #2",
                "start npm_install #3",
                "complete npm_install failed",
                "deployment failed",
            ]
        );
        assert_eq!(state.status, DeploymentStatus::Failed);
        assert_eq!(state.current_step.step.as_str(), "npm_install");
        assert_eq!(state.current_step.status, StepStatus::Failed);
        assert_eq!(state.current_step.attempt, 3);
        assert!(
            state
                .current_step
                .error
                .as_deref()
                .unwrap()
                .contains("exited with code 1")
        );
        assert_eq!(
            h.runner.steps_run(),
            vec!["git_pull", "npm_install", "npm_install", "npm_install"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_notes_are_streamed_and_kept() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner.on("build", [Script::Fail(2, vec![])]);

        let (events, state) = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let notes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DeploymentEvent::StepOutput { output, .. } => Some(output.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("attempt 1/3 failed"));
        assert!(notes[0].contains("retrying in 2s"));
        assert!(state.current_step.output.contains("attempt 2/3 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner.on(
            "npm_install",
            [Script::Fail(1, vec![]), Script::Succeed(vec!["ok\n"])],
        );

        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(state.status, DeploymentStatus::Success);
        let install = &state.completed_steps[&StepId::new("npm_install")];
        assert_eq!(install.status, StepStatus::Success);
        assert_eq!(install.attempt, 2);
        assert_eq!(install.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_notifies_with_step_and_error() {
        let h = Harness::new([three_step_project("backend")]);
        h.runner.on("build", [Script::Fail(7, vec![])]);

        h.deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(
            h.notifier.kinds(),
            vec![NotificationKind::Started, NotificationKind::Failed]
        );
        assert!(sent[1].body.contains("Build"));
        assert!(sent[1].body.contains("exited with code 7"));
    }

    #[tokio::test]
    async fn single_attempt_setting_fails_fast() {
        let h = Harness::with_settings(
            [three_step_project("backend")],
            support::settings().with_max_attempts(1),
        );
        h.runner.on("git_pull", [Script::Fail(128, vec![])]);

        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(state.status, DeploymentStatus::Failed);
        assert_eq!(h.runner.steps_run(), vec!["git_pull"]);
    }
}

mod skipping {
    use super::*;

    fn project_with_skipped_build() -> Project {
        Project::new(
            slug("docs"),
            "Docs",
            WorkDir::CurrentDir,
            nonempty![
                StepConfig::new("git_pull", "Pull", "git"),
                StepConfig::new("build", "Build", "npm").skipped(),
                StepConfig::new("publish", "Publish", "rsync"),
            ],
        )
    }

    #[tokio::test]
    async fn skipped_steps_are_recorded_but_not_run() {
        let h = Harness::new([project_with_skipped_build()]);
        let (events, state) = h
            .deployer
            .start(&slug("docs"), "alice")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(h.runner.steps_run(), vec!["git_pull", "publish"]);
        assert_eq!(
            state.completed_steps[&StepId::new("build")].status,
            StepStatus::Skipped
        );
        assert!(milestones(&events).contains(&"complete build skipped".to_string()));
        assert!(!milestones(&events).contains(&"start build #1".to_string()));
        assert_eq!(state.status, DeploymentStatus::Success);
    }
}

mod preflight {
    use super::*;

    #[tokio::test]
    async fn unknown_project_is_rejected_without_state() {
        let h = Harness::new([three_step_project("backend")]);
        let err = h.deployer.start(&slug("ghost"), "alice").await.unwrap_err();

        assert!(matches!(err, DeployError::ProjectNotFound(_)));
        assert_eq!(err.to_string(), "project not found: ghost");
        assert!(h.states.get(Slot::Current).await.unwrap().is_none());
        assert!(h.deployer.subscribe().is_none());
    }

    #[tokio::test]
    async fn disabled_project_is_rejected() {
        let h = Harness::new([three_step_project("backend").disabled()]);
        let err = h.deployer.start(&slug("backend"), "alice").await.unwrap_err();

        assert!(matches!(err, DeployError::ProjectDisabled(_)));
        assert_eq!(err.kind(), DeployErrorKind::Configuration);
        assert!(h.states.get(Slot::Current).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unresolvable_work_dir_is_rejected() {
        let mut project = three_step_project("frontend");
        project.work_dir = WorkDir::DeployPath;
        let h = Harness::new([project]);

        let err = h
            .deployer
            .start(&slug("frontend"), "alice")
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::WorkDirUnresolved { .. }));
        assert!(err.to_string().contains("{deploy_path}"));
        assert!(h.runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn process_placeholder_needs_a_process_name() {
        let mut project = support::restarting_project("backend");
        project.process_name = None;
        let h = Harness::new([project]);

        let err = h.deployer.start(&slug("backend"), "alice").await.unwrap_err();
        assert!(matches!(err, DeployError::MissingProcessName { .. }));
    }

    #[tokio::test]
    async fn untracked_branch_is_rejected() {
        let h = Harness::new([three_step_project("backend").with_branch("main")]);

        let err = h
            .deployer
            .start_for_branch(&slug("backend"), "feature/x", "webhook")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::BranchNotTracked { .. }));

        let state = h
            .deployer
            .start_for_branch(&slug("backend"), "main", "webhook")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(state.status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn project_edits_apply_to_the_next_deployment() {
        let h = Harness::new([three_step_project("backend")]);
        h.deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let mut project = h.projects.get(&slug("backend")).await.unwrap().unwrap();
        project.steps = nonempty![StepConfig::new("build", "Build", "make")];
        h.projects.save(project).await.unwrap();

        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(state.completed_steps.len(), 1);
        assert_eq!(h.runner.invocations().last().unwrap().command, "make");
    }
}

mod exclusion {
    use super::*;

    #[tokio::test]
    async fn only_one_deployment_runs_at_a_time() {
        let h = Harness::new([three_step_project("backend"), three_step_project("frontend")]);
        h.runner.on("git_pull", [Script::Block(vec![])]);

        let handle = h.deployer.start(&slug("backend"), "alice").await.unwrap();
        h.runner.wait_for_runs(1).await;

        for other in ["backend", "frontend", "ghost"] {
            let err = h.deployer.start(&slug(other), "bob").await.unwrap_err();
            match &err {
                DeployError::AlreadyInProgress { id, project } => {
                    assert_eq!(id, handle.id());
                    assert_eq!(project.as_str(), "backend");
                }
                other => panic!("expected AlreadyInProgress, got {other:?}"),
            }
            assert!(err.to_string().contains("already in progress"));
            assert_eq!(err.kind(), DeployErrorKind::Concurrency);
        }

        h.deployer.cancel().await.unwrap();
        let next = h.deployer.start(&slug("frontend"), "bob").await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn a_new_deployment_can_start_after_one_finishes() {
        let h = Harness::new([three_step_project("backend")]);
        let first = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        let second = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(h.deployer.last().await.unwrap().unwrap().id, second.id);
    }
}

mod feature_gate {
    use super::*;

    #[tokio::test]
    async fn disabled_pipeline_fails_without_running_steps() {
        let h = Harness::new([three_step_project("backend")]);
        h.gate.set_disabled("deployment", "pipeline", true);

        let (events, state) = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(milestones(&events), vec!["deployment failed"]);
        assert_eq!(state.status, DeploymentStatus::Failed);
        assert!(
            state
                .current_step
                .error
                .as_deref()
                .unwrap()
                .contains("disabled by feature flag deployment/pipeline")
        );
        assert!(h.runner.invocations().is_empty());
        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.states.get(Slot::Last).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn reenabling_the_gate_allows_deployments_again() {
        let h = Harness::new([three_step_project("backend")]);
        h.gate.set_disabled("deployment", "pipeline", true);
        h.deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        h.gate.set_disabled("deployment", "pipeline", false);
        let state = h
            .deployer
            .start(&slug("backend"), "alice")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(state.status, DeploymentStatus::Success);
    }
}
