pub mod cloud_tasks;
pub mod inline;
pub mod job_store;
pub mod local_queue;
pub mod retry;
pub mod worker;

pub use cloud_tasks::{CloudTasksDispatcher, QueuePath, WORKER_SECRET_HEADER};
pub use inline::InlineDispatcher;
pub use job_store::{Claim, JobStore, DEFAULT_RUNNING_LEASE};
pub use local_queue::LocalQueueDispatcher;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{Outcome, ReceiptWorker};
