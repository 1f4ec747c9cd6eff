// src/manager/handle.rs

//! Requests into a running [`Manager`](super::Manager).

use std::path::PathBuf;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};

use crate::archive::{DatasetId, RunId};
use crate::errors::{FleetError, Result};
use crate::run::RunProgress;

/// Events flowing into the manager loop. Each request carries its reply
/// channel.
#[derive(Debug)]
pub enum ManagerEvent {
    RegisterDataset {
        name: String,
        path: PathBuf,
        reply: oneshot::Sender<Result<DatasetId>>,
    },
    EnqueueRun {
        pipeline: String,
        inputs: Vec<DatasetId>,
        user: String,
        priority: u32,
        reply: oneshot::Sender<Result<RunId>>,
    },
    StopRun {
        run: RunId,
        user: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPriority {
        run: RunId,
        priority: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    GetProgress {
        run: RunId,
        reply: oneshot::Sender<Result<RunProgress>>,
    },
    /// Stop every active run and leave the loop (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Cloneable sender side of the manager's event channel.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerEvent>,
}

fn gone() -> FleetError {
    FleetError::Other(anyhow!("manager is no longer running"))
}

impl ManagerHandle {
    pub(crate) fn new(tx: mpsc::Sender<ManagerEvent>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> ManagerEvent,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }

    pub async fn register_dataset(&self, name: &str, path: PathBuf) -> Result<DatasetId> {
        let name = name.to_string();
        self.request(|reply| ManagerEvent::RegisterDataset { name, path, reply })
            .await
    }

    pub async fn enqueue_run(
        &self,
        pipeline: &str,
        inputs: Vec<DatasetId>,
        user: &str,
        priority: u32,
    ) -> Result<RunId> {
        let pipeline = pipeline.to_string();
        let user = user.to_string();
        self.request(|reply| ManagerEvent::EnqueueRun {
            pipeline,
            inputs,
            user,
            priority,
            reply,
        })
        .await
    }

    /// Returns once the run and all of its sub-runs are terminal.
    pub async fn request_stop(&self, run: RunId, user: &str) -> Result<()> {
        let user = user.to_string();
        self.request(|reply| ManagerEvent::StopRun { run, user, reply })
            .await
    }

    pub async fn set_priority(&self, run: RunId, priority: u32) -> Result<()> {
        self.request(|reply| ManagerEvent::SetPriority {
            run,
            priority,
            reply,
        })
        .await
    }

    pub async fn progress(&self, run: RunId) -> Result<RunProgress> {
        self.request(|reply| ManagerEvent::GetProgress { run, reply })
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(ManagerEvent::ShutdownRequested)
            .await
            .map_err(|_| gone())
    }
}
