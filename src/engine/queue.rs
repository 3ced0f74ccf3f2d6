//! Single-writer intent queue in front of the execution engine
//!
//! Independent periodic tasks can each hold an [`EngineHandle`]; one worker
//! task drains the shared queue in arrival order, so engine state is only ever
//! touched by that worker.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::executor::ExecutionEngine;
use super::types::TradeRecord;
use crate::common::errors::{PortfolioError, Result};
use crate::common::traits::TradeExecutor;
use crate::common::types::TradeIntent;

struct QueuedIntent {
    intent: TradeIntent,
    reply: oneshot::Sender<TradeRecord>,
}

/// Cloneable sender side of the intent queue
///
/// The engine reference is only used to label and audit intents the worker
/// never received; counters are touched by the worker alone.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<QueuedIntent>,
    engine: Arc<ExecutionEngine>,
}

impl EngineHandle {
    /// Queue an intent and wait for its record
    pub async fn submit(&self, intent: TradeIntent) -> Result<TradeRecord> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(QueuedIntent { intent, reply })
            .await
            .map_err(|e| PortfolioError::ChannelSend(e.to_string()))?;
        response
            .await
            .map_err(|e| PortfolioError::ChannelReceive(e.to_string()))
    }

    /// True once the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl TradeExecutor for EngineHandle {
    /// Queue failures surface as an unexecuted record, like any other failure
    async fn execute(&self, intent: TradeIntent) -> TradeRecord {
        let fallback = intent.clone();
        match self.submit(intent).await {
            Ok(record) => record,
            Err(e) => {
                error!("Engine queue unavailable for {} {}: {}", fallback.side(), fallback.asset(), e);
                self.engine
                    .reject_unqueued(&fallback, format!("engine queue unavailable: {}", e))
            }
        }
    }
}

/// Spawn the worker task that owns all access to `engine`
///
/// The worker stops when every handle has been dropped.
pub fn spawn_engine_worker(engine: Arc<ExecutionEngine>, capacity: usize) -> (EngineHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<QueuedIntent>(capacity.max(1));

    let handle = EngineHandle {
        sender,
        engine: engine.clone(),
    };

    let worker = tokio::spawn(async move {
        info!("Engine worker started ({} mode)", engine.mode());
        while let Some(QueuedIntent { intent, reply }) = receiver.recv().await {
            let record = engine.execute(intent).await;
            if reply.send(record).is_err() {
                // the submitter went away; the record is already audited
                debug!("Dropped reply for a trade record, submitter gone");
            }
        }
        info!("Engine worker stopped");
    });

    (handle, worker)
}
