//! Inbound message processor.
//!
//! Receives validated replies from the webhook and runs each through the
//! orchestrator pipeline. Passes for different contacts run concurrently up
//! to a limit; passes for the same contact serialize on the store's lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orchestrator::{Orchestrator, PipelineOutcome};
use reply_core::{ContactId, InboundMessage};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Configuration for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Passes running at the same time.
    pub max_concurrent: usize,
    /// Bound on a single pass.
    pub pass_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            pass_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of processing one inbound message.
#[derive(Debug)]
pub enum ProcessResult {
    Processed(Box<PipelineOutcome>),
    TimedOut { contact: ContactId },
}

/// Runs inbound messages through the orchestrator.
#[derive(Clone)]
pub struct InboundProcessor {
    orchestrator: Arc<Orchestrator>,
    config: ProcessorConfig,
}

impl InboundProcessor {
    pub fn new(orchestrator: Arc<Orchestrator>, config: ProcessorConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Process a single message within the pass timeout.
    ///
    /// A pass that runs out of time is dropped before it commits, so the
    /// contact's conversation is left as it was; the timeout is audited.
    pub async fn process(&self, message: InboundMessage) -> ProcessResult {
        let contact = message.contact.clone();
        debug!("Processing reply from {}", contact);

        match tokio::time::timeout(
            self.config.pass_timeout,
            self.orchestrator.process_inbound(message.clone()),
        )
        .await
        {
            Ok(outcome) => {
                if let Some(err) = &outcome.error {
                    warn!("Pass for {} ended with {}: {}", contact, outcome.action.as_str(), err);
                } else {
                    info!("Pass for {} ended with {}", contact, outcome.action.as_str());
                }
                ProcessResult::Processed(Box::new(outcome))
            }
            Err(_) => {
                error!(
                    "Pass for {} timed out after {:?}",
                    contact, self.config.pass_timeout
                );
                self.orchestrator
                    .report_timeout(&message, self.config.pass_timeout)
                    .await;
                ProcessResult::TimedOut { contact }
            }
        }
    }

    /// Consume the channel until it closes or `shutdown` resolves, then wait
    /// for passes already running.
    pub async fn run_until<F>(self, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let permits = self.config.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        info!("Inbound processor started ({} concurrent passes)", permits);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Inbound processor shutting down");
                    break;
                }

                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("Inbound channel closed");
                        break;
                    };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let processor = self.clone();
                    tokio::spawn(async move {
                        processor.process(message).await;
                        drop(permit);
                    });
                }
            }
        }

        // Wait for in-flight passes.
        let _ = semaphore.acquire_many(permits as u32).await;
        info!("Inbound processor stopped");
    }
}
