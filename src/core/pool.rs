//! Worker pool: one polling worker per target identity.
//!
//! The registry is owned by a single actor task. Handles talk to it through a
//! command channel, and the desired target set arrives on a watch channel so
//! that only the latest set is ever applied.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::{PollError, PoolError},
    queue::EventSender,
    walker::SubtreeWalker,
    worker::{PollingWorker, WorkerPhase, WorkerSettings},
};
use crate::config::targets::{Target, TargetId};

const COMMAND_CAPACITY: usize = 32;

/// Builds the walker a new worker polls through.
#[async_trait]
pub trait WalkerFactory: Send + Sync {
    async fn build(&self, target: &Target) -> Result<Arc<dyn SubtreeWalker>, PollError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<TargetId>,
    pub stopped: Vec<TargetId>,
    /// Desired targets whose walker could not be built; retried next time.
    pub failed: Vec<TargetId>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub aborted: usize,
}

struct WorkerHandle {
    target: Target,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    phase: watch::Receiver<WorkerPhase>,
}

enum Request {
    Reconcile {
        targets: Vec<Target>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    Add {
        target: Target,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        id: TargetId,
        reply: oneshot::Sender<bool>,
    },
    Running {
        reply: oneshot::Sender<Vec<TargetId>>,
    },
    Phases {
        reply: oneshot::Sender<Vec<(TargetId, WorkerPhase)>>,
    },
}

enum Command {
    Request(Request),
    Shutdown {
        grace: Duration,
        reply: oneshot::Sender<ShutdownReport>,
    },
}

/// Cloneable handle to the pool actor.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::Sender<Command>,
    targets: Arc<watch::Sender<Vec<Target>>>,
}

impl WorkerPool {
    /// Spawns the pool actor with an empty target set.
    pub fn spawn(
        factory: Arc<dyn WalkerFactory>,
        settings: Arc<WorkerSettings>,
        events: EventSender,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (targets_tx, targets_rx) = watch::channel(Vec::new());

        let actor = PoolActor {
            factory,
            settings,
            events,
            root: CancellationToken::new(),
            workers: BTreeMap::new(),
            retiring: Vec::new(),
        };
        tokio::spawn(actor.run(commands_rx, targets_rx));

        Self {
            commands: commands_tx,
            targets: Arc::new(targets_tx),
        }
    }

    /// Publishes a new desired set. Only the most recent set is applied if
    /// several arrive before the actor gets to them.
    pub fn update_targets(&self, targets: Vec<Target>) -> Result<(), PoolError> {
        self.targets.send(targets).map_err(|_| PoolError::Closed)
    }

    /// Applies `targets` and waits for the outcome.
    pub async fn reconcile(&self, targets: Vec<Target>) -> Result<ReconcileReport, PoolError> {
        self.request(|reply| Command::Request(Request::Reconcile { targets, reply })).await
    }

    /// Starts a worker for `target` unless its identity is already running.
    pub async fn add_target(&self, target: Target) -> Result<bool, PoolError> {
        self.request(|reply| Command::Request(Request::Add { target, reply })).await
    }

    pub async fn remove_target(&self, id: &TargetId) -> Result<bool, PoolError> {
        let id = id.clone();
        self.request(|reply| Command::Request(Request::Remove { id, reply })).await
    }

    pub async fn running(&self) -> Result<Vec<TargetId>, PoolError> {
        self.request(|reply| Command::Request(Request::Running { reply })).await
    }

    pub async fn phases(&self) -> Result<Vec<(TargetId, WorkerPhase)>, PoolError> {
        self.request(|reply| Command::Request(Request::Phases { reply })).await
    }

    /// Cancels every worker and waits up to `grace` for them to stop. Workers
    /// still running after that are aborted. The pool accepts nothing after.
    pub async fn shutdown(&self, grace: Duration) -> Result<ShutdownReport, PoolError> {
        self.request(|reply| Command::Shutdown { grace, reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| PoolError::Closed)?;
        reply_rx.await.map_err(|_| PoolError::Closed)
    }
}

struct PoolActor {
    factory: Arc<dyn WalkerFactory>,
    settings: Arc<WorkerSettings>,
    events: EventSender,
    /// Parent of every worker token.
    root: CancellationToken,
    workers: BTreeMap<TargetId, WorkerHandle>,
    /// Removed workers that may still be finishing a poll.
    retiring: Vec<JoinHandle<()>>,
}

impl PoolActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut targets: watch::Receiver<Vec<Target>>,
    ) {
        debug!("Worker pool started");
        let mut watching = true;

        let stop = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Request(request)) => self.handle(request).await,
                    Some(Command::Shutdown { grace, reply }) => break Some((grace, reply)),
                    None => {
                        warn!("Every pool handle dropped, cancelling workers");
                        self.root.cancel();
                        break None;
                    }
                },
                changed = targets.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let desired = targets.borrow_and_update().clone();
                    let report = self.reconcile(desired).await;
                    if !report.is_noop() {
                        info!(
                            started = report.started.len(),
                            stopped = report.stopped.len(),
                            failed = report.failed.len(),
                            running = self.workers.len(),
                            "Target set applied"
                        );
                    }
                }
            }
        };

        // Refuse commands and updates while the workers are stopping.
        commands.close();
        drop(targets);
        let finished = match stop {
            Some((grace, reply)) => Some((reply, self.shutdown(grace).await)),
            None => None,
        };
        drop(commands);
        drop(self);
        if let Some((reply, report)) = finished {
            let _ = reply.send(report);
        }
        debug!("Worker pool stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Reconcile { targets, reply } => {
                let report = self.reconcile(targets).await;
                let _ = reply.send(report);
            }
            Request::Add { target, reply } => {
                self.prune_finished();
                let added = if self.workers.contains_key(&target.identity()) {
                    false
                } else {
                    self.start(target).await
                };
                let _ = reply.send(added);
            }
            Request::Remove { id, reply } => {
                let _ = reply.send(self.retire(&id));
            }
            Request::Running { reply } => {
                self.prune_finished();
                let _ = reply.send(self.workers.keys().cloned().collect());
            }
            Request::Phases { reply } => {
                let phases = self
                    .workers
                    .iter()
                    .map(|(id, handle)| (id.clone(), *handle.phase.borrow()))
                    .collect();
                let _ = reply.send(phases);
            }
        }
    }

    async fn reconcile(&mut self, targets: Vec<Target>) -> ReconcileReport {
        self.prune_finished();

        let mut seen = HashSet::with_capacity(targets.len());
        let desired: Vec<(TargetId, Target)> = targets
            .into_iter()
            .filter_map(|target| {
                let id = target.identity();
                seen.insert(id.clone()).then_some((id, target))
            })
            .collect();

        let mut report = ReconcileReport::default();

        for (id, target) in desired {
            if let Some(running) = self.workers.get(&id) {
                if running.target != target {
                    debug!(
                        target = %target.endpoint(),
                        "Ignoring changed settings of a running target"
                    );
                }
                continue;
            }
            if self.start(target).await {
                report.started.push(id);
            } else {
                report.failed.push(id);
            }
        }

        let stale: Vec<TargetId> = self
            .workers
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.retire(&id);
            report.stopped.push(id);
        }

        report
    }

    /// Builds and spawns a worker. `false` when the walker could not be built.
    async fn start(&mut self, target: Target) -> bool {
        let walker = match self.factory.build(&target).await {
            Ok(walker) => walker,
            Err(e) => {
                warn!(target = %target.endpoint(), "Cannot start worker: {e}");
                return false;
            }
        };

        let cancel = self.root.child_token();
        let (worker, phase) = PollingWorker::new(
            target.clone(),
            walker,
            self.settings.clone(),
            self.events.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(worker.run());

        debug!(target = %target.endpoint(), "Worker spawned");
        self.workers.insert(
            target.identity(),
            WorkerHandle {
                target,
                cancel,
                task,
                phase,
            },
        );
        true
    }

    /// Cancels a worker without waiting for it.
    fn retire(&mut self, id: &TargetId) -> bool {
        let Some(handle) = self.workers.remove(id) else {
            return false;
        };
        handle.cancel.cancel();
        debug!(target = %handle.target.endpoint(), "Worker retired");
        self.retiring.push(handle.task);
        true
    }

    /// Forgets workers that ended on their own so that the next reconcile
    /// starts them again.
    fn prune_finished(&mut self) {
        self.retiring.retain(|task| !task.is_finished());
        self.workers.retain(|_, handle| {
            let alive = !handle.task.is_finished();
            if !alive {
                warn!(target = %handle.target.endpoint(), "Worker exited on its own");
            }
            alive
        });
    }

    async fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        info!(
            workers = self.workers.len(),
            retiring = self.retiring.len(),
            "Stopping workers"
        );
        self.root.cancel();

        let mut tasks: Vec<JoinHandle<()>> = std::mem::take(&mut self.workers)
            .into_values()
            .map(|handle| handle.task)
            .chain(self.retiring.drain(..))
            .collect();

        let deadline = tokio::time::Instant::now() + grace;
        let results = join_all(
            tasks
                .iter_mut()
                .map(|task| tokio::time::timeout_at(deadline, task)),
        )
        .await;

        let mut report = ShutdownReport::default();
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(e)) => {
                    error!("Worker task failed: {e}");
                    report.stopped += 1;
                }
                Err(_) => {
                    task.abort();
                    report.aborted += 1;
                }
            }
        }

        if report.aborted > 0 {
            warn!(aborted = report.aborted, "Workers did not stop within {:?}", grace);
        }
        report
    }
}
