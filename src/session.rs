//! Session / job submission: the `submit_job(description, fn)`
//! abstraction virtual-folder change draining and offline sync run on top
//! of. Each job is a spawned task paired with a cancellation token and a
//! registry entry tracking its description, status, and progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: u64,
    pub description: String,
    pub status: JobStatus,
    /// 0-100, reported by long-running jobs (downsync, rebuild-unmatched).
    pub progress_percent: u8,
}

/// Handle to a submitted job: lets the caller cancel it or check status
/// without owning the underlying task.
pub struct JobHandle {
    pub id: u64,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// General-purpose background queue. One `Session` is shared by a store and all the virtual
/// folders / offline controllers layered on it.
pub struct Session {
    jobs: Arc<Mutex<HashMap<u64, JobRecord>>>,
    next_id: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs `body` on the background queue, reporting status through the
    /// job registry. `body` receives its own job id (to pass to
    /// [`report_progress`](Self::report_progress)) and a `CancellationToken`
    /// it is expected to poll between units of work.
    pub async fn submit_job<F, Fut>(&self, description: impl Into<String>, body: F) -> JobHandle
    where
        F: FnOnce(u64, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let description = description.into();
        let cancel = CancellationToken::new();

        self.jobs.lock().await.insert(
            id,
            JobRecord {
                id,
                description,
                status: JobStatus::Pending,
                progress_percent: 0,
            },
        );

        let jobs = Arc::clone(&self.jobs);
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Some(rec) = jobs.lock().await.get_mut(&id) {
                rec.status = JobStatus::Running;
            }
            let result = body(id, token.clone()).await;
            let mut jobs = jobs.lock().await;
            if let Some(rec) = jobs.get_mut(&id) {
                rec.status = if token.is_cancelled() {
                    JobStatus::Cancelled
                } else {
                    match result {
                        Ok(()) => JobStatus::Completed,
                        Err(msg) => JobStatus::Failed(msg),
                    }
                };
            }
        });

        JobHandle { id, cancel }
    }

    pub async fn report_progress(&self, id: u64, percent: u8) {
        if let Some(rec) = self.jobs.lock().await.get_mut(&id) {
            rec.progress_percent = percent.min(100);
        }
    }

    pub async fn status(&self, id: u64) -> Option<JobStatus> {
        self.jobs.lock().await.get(&id).map(|r| r.status.clone())
    }
}

pub type SharedSession = Arc<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_job_runs_and_completes() {
        let session = Session::new();
        let handle = session
            .submit_job("test job", |_id, _token| async move { Ok(()) })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(session.status(handle.id).await, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_marks_job_cancelled() {
        let session = Session::new();
        let handle = session
            .submit_job("cancellable job", |_id, token| async move {
                token.cancelled().await;
                Ok(())
            })
            .await;
        handle.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(session.status(handle.id).await, Some(JobStatus::Cancelled));
    }
}
