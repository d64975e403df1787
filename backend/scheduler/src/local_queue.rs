//! In-process queue: a bounded channel drained by one background task.

use std::sync::Arc;

use async_trait::async_trait;
use slipscan_core::{Dispatched, JobDispatcher, ReceiptJob, SlipError, SlipResult};
use slipscan_logging::{log_event, PipelineEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::job_store::JobStore;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::worker::ReceiptWorker;

pub struct LocalQueueDispatcher {
    tx: mpsc::Sender<ReceiptJob>,
    store: Arc<JobStore>,
}

impl LocalQueueDispatcher {
    /// Spawn the queue worker. The returned handle finishes once every
    /// dispatcher clone is dropped and the queue is drained.
    pub fn start(worker: Arc<ReceiptWorker>, policy: RetryPolicy, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let store = worker.store().clone();
        let handle = tokio::spawn(run_queue(worker, policy, rx, tx.downgrade()));
        (Self { tx, store }, handle)
    }
}

async fn run_queue(
    worker: Arc<ReceiptWorker>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<ReceiptJob>,
    requeue: mpsc::WeakSender<ReceiptJob>,
) {
    info!(max_attempts = policy.max_attempts, "Local receipt queue started");
    while let Some(job) = rx.recv().await {
        let err = match worker.process(&job).await {
            Ok(_) => continue,
            Err(err) => err,
        };
        let attempts = match worker.store().get(job.id) {
            Ok(Some(record)) => record.attempts,
            Ok(None) => 0,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Cannot read job state");
                continue;
            }
        };

        let delay = match policy.decide(attempts, &err) {
            RetryDecision::RetryAfter(delay) => delay,
            RetryDecision::GiveUp => {
                warn!(job_id = %job.id, attempts, error = %err, "Giving up on receipt job");
                if let Err(e) = worker.store().mark_failed(job.id, &err.to_string()) {
                    error!(job_id = %job.id, error = %e, "Cannot mark job failed");
                }
                continue;
            }
        };
        info!(job_id = %job.id, attempts, delay_ms = delay.as_millis() as u64, "Scheduling retry");
        let Some(tx) = requeue.upgrade() else {
            warn!(job_id = %job.id, "Queue is shutting down, dropping retry");
            continue;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).await.is_err() {
                warn!("Queue closed before retry could be delivered");
            }
        });
    }
    info!("Local receipt queue stopped");
}

#[async_trait]
impl JobDispatcher for LocalQueueDispatcher {
    fn name(&self) -> &str {
        "local"
    }

    async fn dispatch(&self, job: ReceiptJob) -> SlipResult<Dispatched> {
        self.store.record_queued(&job)?;
        let task_name = format!("local-{}", job.id);
        self.store.set_task_name(job.id, &task_name)?;
        let job_id = job.id;

        self.tx.try_send(job).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue is full",
                mpsc::error::TrySendError::Closed(_) => "queue is closed",
            };
            if let Err(store_err) = self.store.mark_failed(job_id, reason) {
                error!(%job_id, error = %store_err, "Cannot mark job failed");
            }
            SlipError::Dispatch(reason.to_string())
        })?;

        log_event(
            job_id,
            PipelineEvent::Dispatched {
                dispatcher: self.name().to_string(),
                task_name: task_name.clone(),
            },
        );
        Ok(Dispatched { job_id, task_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::{harness, stored_job};
    use slipscan_core::JobStatus;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: false,
        }
    }

    async fn wait_for_status(store: &JobStore, job: &ReceiptJob, want: JobStatus) {
        for _ in 0..200 {
            if store.get(job.id).unwrap().map(|r| r.status) == Some(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {want}");
    }

    #[tokio::test]
    async fn retries_until_success() {
        let h = harness(vec![
            SlipError::upstream("gemini", 500, "boom"),
            SlipError::Parse("bad json".into()),
        ]);
        let (dispatcher, _handle) = LocalQueueDispatcher::start(h.worker.clone(), fast_policy(5), 8);
        let job = stored_job();
        dispatcher.dispatch(job.clone()).await.unwrap();

        wait_for_status(h.worker.store(), &job, JobStatus::Succeeded).await;
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.ledger.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let failures = (0..5).map(|_| SlipError::Parse("bad json".into())).collect();
        let h = harness(failures);
        let (dispatcher, _handle) = LocalQueueDispatcher::start(h.worker.clone(), fast_policy(2), 8);
        let job = stored_job();
        dispatcher.dispatch(job.clone()).await.unwrap();

        wait_for_status(h.worker.store(), &job, JobStatus::Failed).await;
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 2);
        assert!(h.ledger.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let h = harness(vec![SlipError::upstream("gemini", 400, "bad request")]);
        let (dispatcher, _handle) = LocalQueueDispatcher::start(h.worker.clone(), fast_policy(5), 8);
        let job = stored_job();
        dispatcher.dispatch(job.clone()).await.unwrap();

        wait_for_status(h.worker.store(), &job, JobStatus::Failed).await;
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_stops_when_dispatcher_dropped() {
        let h = harness(vec![]);
        let (dispatcher, handle) = LocalQueueDispatcher::start(h.worker.clone(), fast_policy(1), 1);
        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
