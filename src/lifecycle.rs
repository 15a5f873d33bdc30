//! Lifecycle Controller.
//!
//! Owns the stage tasks and the one cancellation token they all watch.
//! State only moves forward: `Running → ShuttingDown → Stopped`. The first
//! stop request cancels the token; later requests are no-ops. Any stage
//! that exits on its own while the pipeline is running counts as a stop
//! request, so one failing stage brings the others down with it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::pipeline::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Cloneable stop trigger, handed to signal handlers and stages.
#[derive(Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl ShutdownHandle {
    /// Request shutdown. Returns true only for the call that actually
    /// started it.
    pub fn shutdown(&self) -> bool {
        let first = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if first {
            info!("Shutting down pipeline");
            self.cancel.cancel();
        }
        first
    }
}

pub struct LifecycleController {
    handle: ShutdownHandle,
    tasks: JoinSet<(Stage, Result<()>)>,
    stages: HashMap<Id, Stage>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            handle: ShutdownHandle {
                cancel: CancellationToken::new(),
                state: Arc::new(state),
            },
            tasks: JoinSet::new(),
            stages: HashMap::new(),
        }
    }

    /// The token every stage watches.
    pub fn token(&self) -> CancellationToken {
        self.handle.cancel.clone()
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.handle.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.handle.state.subscribe()
    }

    /// Run an async stage on the runtime.
    pub fn spawn<F>(&mut self, stage: Stage, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let abort = self.tasks.spawn(async move { (stage, fut.await) });
        self.stages.insert(abort.id(), stage);
    }

    /// Run a stage that blocks on device I/O on the blocking pool.
    pub fn spawn_blocking<F>(&mut self, stage: Stage, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let abort = self.tasks.spawn_blocking(move || (stage, f()));
        self.stages.insert(abort.id(), stage);
    }

    /// Wait for every stage to acknowledge exit. Returns the first stage
    /// error, if any.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (stage, result) = match joined {
                Ok((_, exit)) => exit,
                Err(e) => {
                    let stage = self.stages.get(&e.id()).copied().unwrap_or(Stage::Capture);
                    let reason = if e.is_panic() {
                        "panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    (
                        stage,
                        Err(PipelineError::Stage {
                            stage: stage.name(),
                            reason,
                        }),
                    )
                }
            };

            match result {
                Ok(()) => info!("{} stage exited", stage),
                Err(e) => {
                    error!("{} stage failed: {}", stage, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
            // A stage leaving on its own is a stop request for the rest.
            self.handle.shutdown();
        }

        self.handle.state.send_replace(LifecycleState::Stopped);
        info!("All stages stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
