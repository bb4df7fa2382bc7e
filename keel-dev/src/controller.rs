//! The dev loop.
//!
//! ```text
//! Idle ──► RunningIteration ──► WaitingForTrigger ──► RunningIteration ...
//!                 │
//!                 ├─ ConfigurationChanged ──► Restarting (new runner, no wait)
//!                 └─ fatal error / cancel ──► Terminated
//! ```
//!
//! Whatever way the loop ends, the last deployer is cleaned up and then
//! the last builder is pruned, each at most once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use keel_core::DevOptions;
use keel_deploy::Deployer;
use keel_event::StateStore;

use crate::error::DevError;
use crate::runner::{ArtifactBuilder, PipelineRunner, RunnerFactory};
use crate::trigger::{Intent, Trigger};

pub struct DevLoop<F, T> {
    factory: F,
    trigger: T,
    store: StateStore,
    cleanup_on_exit: bool,
    prune_on_exit: bool,
    runner: Option<Box<dyn PipelineRunner>>,
    last_deployer: Option<Arc<dyn Deployer>>,
    last_builder: Option<Arc<dyn ArtifactBuilder>>,
    iteration: u64,
}

impl<F: RunnerFactory, T: Trigger> DevLoop<F, T> {
    pub fn new(factory: F, trigger: T, store: StateStore, options: &DevOptions) -> Self {
        Self {
            factory,
            trigger,
            store,
            cleanup_on_exit: options.cleanup,
            prune_on_exit: options.prune,
            runner: None,
            last_deployer: None,
            last_builder: None,
            iteration: 0,
        }
    }

    /// Run until cancelled, until the trigger is exhausted, or until a
    /// fatal error. Cleanup and prune run afterwards in every case.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DevError> {
        let result = self.run_loop(&cancel).await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "dev loop stopped");
        }
        self.shutdown().await;
        result
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<(), DevError> {
        let mut intent = Intent::all();
        loop {
            if cancel.is_cancelled() {
                tracing::info!("dev loop cancelled");
                return Ok(());
            }

            let mut runner = match self.runner.take() {
                Some(runner) => runner,
                None => self.factory.create(&self.store)?,
            };

            self.iteration += 1;
            let iteration = self.iteration;
            self.store.dev_loop_in_progress(iteration);
            let result = runner.run_iteration(intent, &self.store).await;

            if let Some(deployer) = runner.deployer() {
                self.last_deployer = Some(deployer);
            }
            if let Some(builder) = runner.builder() {
                self.last_builder = Some(builder);
            }

            match result {
                Ok(()) => {
                    self.store.dev_loop_complete(iteration);
                    self.runner = Some(runner);
                }
                Err(DevError::ConfigurationChanged) => {
                    tracing::info!("configuration changed, restarting dev loop");
                    self.store.dev_loop_complete(iteration);
                    intent = Intent::all();
                    continue;
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(iteration, error = %err, "iteration failed");
                    self.store.dev_loop_failed(iteration, &err);
                    self.runner = Some(runner);
                }
                Err(err) => {
                    self.store.dev_loop_failed(iteration, &err);
                    return Err(err);
                }
            }

            intent = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("dev loop cancelled");
                    return Ok(());
                }
                next = self.trigger.next_intent(&self.store) => match next {
                    Some(intent) => intent,
                    None => {
                        tracing::info!("no more triggers, leaving dev loop");
                        return Ok(());
                    }
                },
            };
        }
    }

    async fn shutdown(&mut self) {
        self.runner = None;

        if self.cleanup_on_exit {
            if let Some(deployer) = self.last_deployer.take() {
                match tokio::task::spawn_blocking(move || deployer.cleanup()).await {
                    Ok(Ok(())) => tracing::info!("deployer cleanup complete"),
                    Ok(Err(err)) => tracing::warn!(error = %err, "deployer cleanup"),
                    Err(err) => tracing::warn!(error = %err, "deployer cleanup task failed"),
                }
            }
        }

        if self.prune_on_exit {
            if let Some(builder) = self.last_builder.take() {
                match tokio::task::spawn_blocking(move || builder.prune()).await {
                    Ok(Ok(())) => tracing::info!("builder prune complete"),
                    Ok(Err(err)) => tracing::warn!(error = %err, "builder cleanup"),
                    Err(err) => tracing::warn!(error = %err, "builder cleanup task failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use keel_core::{Artifact, ArtifactConfig, AutoTriggers, Phase, Status};
    use keel_deploy::{DeployError, DeployResult, Labeller};
    use keel_event::Transition;

    use super::*;

    /// Shared call log so tests can assert on ordering across components.
    type Log = Arc<Mutex<Vec<String>>>;

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().expect("log").push(entry.into());
    }

    struct FakeDeployer {
        log: Log,
        fail_cleanup: bool,
    }

    impl Deployer for FakeDeployer {
        fn labels(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
        fn dependencies(&self) -> Result<Vec<PathBuf>, DeployError> {
            Ok(Vec::new())
        }
        fn render(&self, _: &[Artifact], _: &[&dyn Labeller]) -> Result<String, DeployError> {
            Ok(String::new())
        }
        fn deploy(&self, _: &[Artifact], _: &[&dyn Labeller]) -> Result<DeployResult, DeployError> {
            Ok(DeployResult::default())
        }
        fn cleanup(&self) -> Result<(), DeployError> {
            push(&self.log, "cleanup");
            if self.fail_cleanup {
                return Err(DeployError::Tool("cleanup refused".into()));
            }
            Ok(())
        }
    }

    struct FakeBuilder {
        log: Log,
    }

    impl ArtifactBuilder for FakeBuilder {
        fn build(&self, artifact: &ArtifactConfig) -> Result<Artifact, DevError> {
            Ok(Artifact::new(artifact.image.clone(), format!("{}:t", artifact.image)))
        }
        fn prune(&self) -> Result<(), DevError> {
            push(&self.log, "prune");
            Ok(())
        }
    }

    /// What one scripted iteration does.
    enum Step {
        Ok,
        Deploy,
        Build,
        PhaseFailure,
        ConfigChanged,
        Fatal,
    }

    struct ScriptedRunner {
        id: usize,
        steps: Arc<Mutex<VecDeque<Step>>>,
        log: Log,
        fail_cleanup: bool,
        deployed: bool,
        built: bool,
    }

    #[async_trait]
    impl PipelineRunner for ScriptedRunner {
        async fn run_iteration(&mut self, intent: Intent, _: &StateStore) -> Result<(), DevError> {
            push(&self.log, format!("runner{} iteration build={}", self.id, intent.build));
            let step = self.steps.lock().expect("steps").pop_front();
            match step.unwrap_or(Step::Ok) {
                Step::Ok => Ok(()),
                Step::Deploy => {
                    self.deployed = true;
                    Ok(())
                }
                Step::Build => {
                    self.built = true;
                    Ok(())
                }
                Step::PhaseFailure => Err(DevError::Phase {
                    phase: Phase::Deploy,
                    message: "apply refused".into(),
                }),
                Step::ConfigChanged => Err(DevError::ConfigurationChanged),
                Step::Fatal => Err(DevError::Protocol("boom".into())),
            }
        }

        fn deployer(&self) -> Option<Arc<dyn Deployer>> {
            self.deployed.then(|| {
                Arc::new(FakeDeployer {
                    log: self.log.clone(),
                    fail_cleanup: self.fail_cleanup,
                }) as Arc<dyn Deployer>
            })
        }

        fn builder(&self) -> Option<Arc<dyn ArtifactBuilder>> {
            self.built.then(|| {
                Arc::new(FakeBuilder {
                    log: self.log.clone(),
                }) as Arc<dyn ArtifactBuilder>
            })
        }
    }

    struct ScriptedFactory {
        steps: Arc<Mutex<VecDeque<Step>>>,
        log: Log,
        created: Arc<Mutex<usize>>,
        fail_cleanup: bool,
    }

    impl ScriptedFactory {
        fn new(steps: Vec<Step>, log: Log) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.into())),
                log,
                created: Arc::new(Mutex::new(0)),
                fail_cleanup: false,
            }
        }
    }

    impl RunnerFactory for ScriptedFactory {
        fn create(&self, _: &StateStore) -> Result<Box<dyn PipelineRunner>, DevError> {
            let mut created = self.created.lock().expect("created");
            *created += 1;
            push(&self.log, format!("create runner{}", *created));
            Ok(Box::new(ScriptedRunner {
                id: *created,
                steps: self.steps.clone(),
                log: self.log.clone(),
                fail_cleanup: self.fail_cleanup,
                deployed: false,
                built: false,
            }))
        }
    }

    /// Yields a fixed number of full intents, then reports exhaustion.
    struct Countdown(usize);

    #[async_trait]
    impl Trigger for Countdown {
        async fn next_intent(&mut self, _: &StateStore) -> Option<Intent> {
            if self.0 == 0 {
                return None;
            }
            self.0 -= 1;
            Some(Intent::for_phase("deploy").unwrap_or_else(|_| Intent::all()))
        }
    }

    /// Never yields; the loop can only leave through cancellation.
    struct Never;

    #[async_trait]
    impl Trigger for Never {
        async fn next_intent(&mut self, _: &StateStore) -> Option<Intent> {
            std::future::pending().await
        }
    }

    fn store() -> StateStore {
        StateStore::new(["img"], AutoTriggers::default())
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("log").clone()
    }

    fn dev_loop_statuses(store: &StateStore) -> Vec<(u64, Status)> {
        store
            .events_since(0)
            .into_iter()
            .filter_map(|e| match e.transition {
                Transition::DevLoop {
                    iteration, status, ..
                } => Some((iteration, status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn cleanup_runs_before_prune_on_exit() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::Build, Step::Deploy], log.clone());
        let dev = DevLoop::new(factory, Countdown(1), store(), &DevOptions::default());

        dev.run(CancellationToken::new()).await.expect("run");
        let log = entries(&log);
        let cleanup = log.iter().position(|e| e == "cleanup").expect("cleanup ran");
        let prune = log.iter().position(|e| e == "prune").expect("prune ran");
        assert!(cleanup < prune, "cleanup must precede prune: {log:?}");
        assert_eq!(log.iter().filter(|e| *e == "cleanup").count(), 1);
        assert_eq!(log.iter().filter(|e| *e == "prune").count(), 1);
    }

    #[tokio::test]
    async fn nothing_to_clean_when_nothing_deployed_or_built() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::Ok], log.clone());
        let dev = DevLoop::new(factory, Countdown(0), store(), &DevOptions::default());
        dev.run(CancellationToken::new()).await.expect("run");
        let log = entries(&log);
        assert!(!log.contains(&"cleanup".to_string()));
        assert!(!log.contains(&"prune".to_string()));
    }

    #[tokio::test]
    async fn disabled_cleanup_and_prune_are_skipped() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::Build, Step::Deploy], log.clone());
        let options = DevOptions {
            cleanup: false,
            prune: false,
            ..DevOptions::default()
        };
        let dev = DevLoop::new(factory, Countdown(1), store(), &options);
        dev.run(CancellationToken::new()).await.expect("run");
        let log = entries(&log);
        assert!(!log.contains(&"cleanup".to_string()));
        assert!(!log.contains(&"prune".to_string()));
    }

    #[tokio::test]
    async fn configuration_change_rebuilds_runner_without_waiting() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::ConfigChanged, Step::Ok], log.clone());
        let store = store();
        let dev = DevLoop::new(factory, Countdown(0), store.clone(), &DevOptions::default());
        dev.run(CancellationToken::new()).await.expect("config change is not an error");

        assert_eq!(
            dev_loop_statuses(&store),
            vec![
                (1, Status::InProgress),
                (1, Status::Complete),
                (2, Status::InProgress),
                (2, Status::Complete),
            ]
        );

        assert_eq!(
            entries(&log),
            vec![
                "create runner1",
                "runner1 iteration build=true",
                "create runner2",
                "runner2 iteration build=true",
            ]
        );
    }

    #[tokio::test]
    async fn phase_failure_is_recorded_and_loop_continues() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::PhaseFailure, Step::Ok], log.clone());
        let store = store();
        let dev = DevLoop::new(factory, Countdown(1), store.clone(), &DevOptions::default());
        dev.run(CancellationToken::new()).await.expect("phase failure is not fatal");

        assert_eq!(
            dev_loop_statuses(&store),
            vec![
                (1, Status::InProgress),
                (1, Status::Failed),
                (2, Status::InProgress),
                (2, Status::Complete),
            ]
        );
        assert!(entries(&log).contains(&"runner1 iteration build=false".to_string()));
    }

    #[tokio::test]
    async fn fatal_error_ends_loop_after_cleanup() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::Deploy, Step::Fatal], log.clone());
        let dev = DevLoop::new(factory, Countdown(5), store(), &DevOptions::default());
        let err = dev.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DevError::Protocol(_)));
        assert!(entries(&log).contains(&"cleanup".to_string()));
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_block_prune() {
        let log = Log::default();
        let mut factory = ScriptedFactory::new(vec![Step::Deploy, Step::Build], log.clone());
        factory.fail_cleanup = true;
        let dev = DevLoop::new(factory, Countdown(1), store(), &DevOptions::default());
        dev.run(CancellationToken::new()).await.expect("run");
        let log = entries(&log);
        assert!(log.contains(&"cleanup".to_string()));
        assert!(log.contains(&"prune".to_string()));
    }

    #[tokio::test]
    async fn cancellation_while_waiting_exits_and_cleans_up() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![Step::Deploy], log.clone());
        let store = store();
        let dev = DevLoop::new(factory, Never, store.clone(), &DevOptions::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(dev.run(cancel.clone()));
        while store.len() < 2 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.expect("join").expect("run");
        assert!(entries(&log).contains(&"cleanup".to_string()));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let log = Log::default();
        let factory = ScriptedFactory::new(vec![], log.clone());
        let dev = DevLoop::new(factory, Never, store(), &DevOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        dev.run(cancel).await.expect("run");
        assert!(entries(&log).is_empty());
    }
}
