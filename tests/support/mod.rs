// ABOUTME: Test support utilities.
// ABOUTME: Scripted step runner, recording notifier, project fixtures, and an engine harness.

// Each test binary only uses some of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use nonempty::nonempty;
use parking_lot::Mutex;
use rollout::deploy::{Collaborators, Deployer, EngineSettings};
use rollout::events::DeploymentEvent;
use rollout::gate::StaticGate;
use rollout::notify::{Notification, NotificationKind, Notifier};
use rollout::project::{MemoryProjectStore, PathContext, Project, StepConfig, WorkDir};
use rollout::runner::{Invocation, OutputChunk, OutputSender, OutputStream, ProcessError, StepRunner};
use rollout::state::MemoryStateStore;
use rollout::types::ProjectSlug;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("rollout=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What the mock runner does for one invocation of a step.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit the chunks and exit 0.
    Succeed(Vec<&'static str>),
    /// Emit the chunks and exit with `code`.
    Fail(i32, Vec<&'static str>),
    /// Emit the chunks, then run until cancelled.
    Block(Vec<&'static str>),
}

/// Step runner following per-step scripts instead of spawning processes.
///
/// Scripts are keyed by step id (from `ROLLOUT_STEP`). A step's queue is
/// consumed in order and its last script repeats; unscripted steps succeed.
pub struct MockRunner {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    invocations: Mutex<Vec<Invocation>>,
    detached: Mutex<Vec<Invocation>>,
    fail_detached: AtomicBool,
    active: Mutex<Option<CancellationToken>>,
    kills: AtomicUsize,
    runs: watch::Sender<usize>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
            fail_detached: AtomicBool::new(false),
            active: Mutex::new(None),
            kills: AtomicUsize::new(0),
            runs: watch::Sender::new(0),
        }
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `scripts` for `step`.
    pub fn on(&self, step: &str, scripts: impl IntoIterator<Item = Script>) -> &Self {
        self.scripts
            .lock()
            .entry(step.to_string())
            .or_default()
            .extend(scripts);
        self
    }

    pub fn fail_detached_spawns(&self) {
        self.fail_detached.store(true, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Step ids in the order they were run.
    pub fn steps_run(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|inv| inv.env.get("ROLLOUT_STEP").cloned().unwrap_or_default())
            .collect()
    }

    pub fn detached(&self) -> Vec<Invocation> {
        self.detached.lock().clone()
    }

    /// Number of running processes terminated through `cancel`.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` runs have started.
    pub async fn wait_for_runs(&self, count: usize) {
        let mut runs = self.runs.subscribe();
        runs.wait_for(|started| *started >= count)
            .await
            .expect("runner dropped");
    }

    fn next_script(&self, step: &str) -> Script {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(step) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("queue is not empty"),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Script::Succeed(Vec::new()),
        }
    }
}

fn send_all(output: &OutputSender, chunks: &[&str]) {
    for chunk in chunks {
        let _ = output.send(OutputChunk {
            stream: OutputStream::Stdout,
            text: chunk.to_string(),
        });
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn run(&self, invocation: &Invocation, output: OutputSender) -> Result<(), ProcessError> {
        let step = invocation
            .env
            .get("ROLLOUT_STEP")
            .cloned()
            .unwrap_or_default();
        let script = self.next_script(&step);
        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());
        self.invocations.lock().push(invocation.clone());
        self.runs.send_modify(|started| *started += 1);

        let command = invocation.to_string();
        let result = match script {
            Script::Succeed(chunks) => {
                send_all(&output, &chunks);
                Ok(())
            }
            Script::Fail(code, chunks) => {
                send_all(&output, &chunks);
                Err(ProcessError::Exit { command, code })
            }
            Script::Block(chunks) => {
                send_all(&output, &chunks);
                token.cancelled().await;
                Err(ProcessError::Cancelled { command })
            }
        };
        self.active.lock().take();
        result
    }

    fn spawn_detached(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        self.detached.lock().push(invocation.clone());
        if self.fail_detached.load(Ordering::SeqCst) {
            return Err(ProcessError::Spawn {
                command: invocation.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "command not found"),
            });
        }
        Ok(())
    }

    fn cancel(&self) -> bool {
        match self.active.lock().take() {
            Some(token) => {
                token.cancel();
                self.kills.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Notifier that keeps every notification it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

pub fn slug(value: &str) -> ProjectSlug {
    ProjectSlug::new(value).unwrap()
}

/// `git_pull`, `npm_install`, `build`, run in `{cwd}`.
pub fn three_step_project(name: &str) -> Project {
    Project::new(
        slug(name),
        name,
        WorkDir::CurrentDir,
        nonempty![
            StepConfig::new("git_pull", "Pull latest changes", "git").with_args(["pull"]),
            StepConfig::new("npm_install", "Install dependencies", "npm").with_args(["ci"]),
            StepConfig::new("build", "Build", "npm").with_args(["run", "build"]),
        ],
    )
}

/// Build, restart the process, then verify from the restarted process.
pub fn restarting_project(name: &str) -> Project {
    Project::new(
        slug(name),
        name,
        WorkDir::CurrentDir,
        nonempty![
            StepConfig::new("build", "Build", "npm").with_args(["run", "build"]),
            StepConfig::new("restart_service", "Restart service", "pm2")
                .with_args(["restart", "{process}"])
                .restarting(),
            StepConfig::new("verify", "Verify service", "pm2")
                .with_args(["describe", "{process}"])
                .on_module_init(),
        ],
    )
    .with_process_name(name)
}

pub const CWD: &str = "/srv/app";

pub fn settings() -> EngineSettings {
    EngineSettings::default()
        .with_retry_backoff(Duration::from_secs(2))
        .with_paths(PathContext {
            cwd: PathBuf::from(CWD),
            deploy_path: None,
        })
}

/// A Deployer wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub deployer: Deployer,
    pub runner: Arc<MockRunner>,
    pub states: Arc<MemoryStateStore>,
    pub projects: Arc<MemoryProjectStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub gate: Arc<StaticGate>,
}

impl Harness {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self::with_settings(projects, settings())
    }

    pub fn with_settings(projects: impl IntoIterator<Item = Project>, settings: EngineSettings) -> Self {
        init_tracing();
        Self::build(
            Arc::new(MemoryProjectStore::with_projects(projects)),
            Arc::new(MemoryStateStore::new()),
            Arc::new(StaticGate::open()),
            settings,
        )
    }

    /// A fresh engine over the same stores, as after a process restart.
    pub fn restarted(&self) -> Self {
        Self::build(
            Arc::clone(&self.projects),
            Arc::clone(&self.states),
            Arc::clone(&self.gate),
            self.deployer.settings().clone(),
        )
    }

    fn build(
        projects: Arc<MemoryProjectStore>,
        states: Arc<MemoryStateStore>,
        gate: Arc<StaticGate>,
        settings: EngineSettings,
    ) -> Self {
        let runner = Arc::new(MockRunner::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let deployer = Deployer::new(
            Collaborators {
                projects: projects.clone(),
                states: states.clone(),
                runner: runner.clone(),
                gate: gate.clone(),
                notifier: notifier.clone(),
            },
            settings,
        );
        Self {
            deployer,
            runner,
            states,
            projects,
            notifier,
            gate,
        }
    }
}

/// Short description of an event, for asserting on sequences.
pub fn describe(event: &DeploymentEvent) -> String {
    match event {
        DeploymentEvent::StepStart { step, attempt, .. } => match attempt {
            Some(attempt) => format!("start {step} #{attempt}"),
            None => format!("start {step}"),
        },
        DeploymentEvent::StepOutput { step, .. } => format!("output {step}"),
        DeploymentEvent::StepComplete { step, status, .. } => format!("complete {step} {status}"),
        DeploymentEvent::DeploymentComplete { deployment } => {
            format!("deployment {}", deployment.status)
        }
    }
}

/// Event descriptions without output chunks.
pub fn milestones(events: &[DeploymentEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| !matches!(e, DeploymentEvent::StepOutput { .. }))
        .map(describe)
        .collect()
}
