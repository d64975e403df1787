use std::sync::Arc;

use async_trait::async_trait;
use slipscan_core::{Dispatched, JobDispatcher, ReceiptJob, SlipResult};
use slipscan_logging::{log_event, PipelineEvent};

use crate::worker::ReceiptWorker;

/// Runs the job before `dispatch` returns. Failures go back to the caller
/// and are final.
pub struct InlineDispatcher {
    worker: Arc<ReceiptWorker>,
}

impl InlineDispatcher {
    pub fn new(worker: Arc<ReceiptWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl JobDispatcher for InlineDispatcher {
    fn name(&self) -> &str {
        "inline"
    }

    async fn dispatch(&self, job: ReceiptJob) -> SlipResult<Dispatched> {
        let store = self.worker.store();
        store.record_queued(&job)?;
        let task_name = format!("inline-{}", job.id);
        store.set_task_name(job.id, &task_name)?;
        log_event(
            job.id,
            PipelineEvent::Dispatched {
                dispatcher: self.name().to_string(),
                task_name: task_name.clone(),
            },
        );

        if let Err(err) = self.worker.process(&job).await {
            store.mark_failed(job.id, &err.to_string())?;
            return Err(err);
        }
        Ok(Dispatched {
            job_id: job.id,
            task_name,
        })
    }
}
