use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::{mpsc, watch},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::Provisioner;

/// Capacity of the byte pipe handed to each log reader.
const LOG_PIPE_BYTES: usize = 8 * 1024;

/// One playbook run, fully resolved against the configuration in force when
/// the job was created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Play {
    pub playbook: String,
    pub hosts: Vec<String>,
    pub host_group: String,
    pub user: String,
    pub private_key: String,
    pub extra_vars: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Errored,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub desc: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub playbook: String,
    pub hosts: Vec<String>,
    pub host_group: String,
    pub started_unix_ms: u64,
    pub finished_unix_ms: Option<u64>,
}

struct JobState {
    status: JobStatus,
    error: Option<String>,
    finished_unix_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default)]
struct LogProgress {
    len: usize,
    closed: bool,
}

/// Append-only job output. Readers follow it through the progress channel.
struct JobLog {
    bytes: Mutex<Vec<u8>>,
    progress: watch::Sender<LogProgress>,
}

impl JobLog {
    fn new() -> Self {
        let (progress, _) = watch::channel(LogProgress::default());
        Self {
            bytes: Mutex::new(Vec::new()),
            progress,
        }
    }

    fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut bytes = self.bytes.lock().expect("job log lock poisoned");
        bytes.extend_from_slice(data);
        let len = bytes.len();
        // published under the lock so lengths reach readers in append order
        self.progress
            .send_modify(|progress| progress.len = progress.len.max(len));
    }

    fn close(&self) {
        self.progress.send_modify(|progress| progress.closed = true);
    }

    fn slice(&self, start: usize, end: usize) -> Vec<u8> {
        let bytes = self.bytes.lock().expect("job log lock poisoned");
        bytes[start..end].to_vec()
    }
}

pub struct Job {
    id: String,
    desc: String,
    play: Play,
    started_unix_ms: u64,
    state: Mutex<JobState>,
    log: JobLog,
}

impl Job {
    pub fn new(desc: impl Into<String>, play: Play) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            desc: desc.into(),
            play,
            started_unix_ms: now_unix_ms(),
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                error: None,
                finished_unix_ms: None,
            }),
            log: JobLog::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn play(&self) -> &Play {
        &self.play
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().expect("job state lock poisoned").status
    }

    pub fn error(&self) -> Option<String> {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .error
            .clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().expect("job state lock poisoned");
        JobSnapshot {
            id: self.id.clone(),
            desc: self.desc.clone(),
            status: state.status,
            error: state.error.clone(),
            playbook: self.play.playbook.clone(),
            hosts: self.play.hosts.clone(),
            host_group: self.play.host_group.clone(),
            started_unix_ms: self.started_unix_ms,
            finished_unix_ms: state.finished_unix_ms,
        }
    }

    /// Runs the play on the blocking pool and reports the job id on `done`
    /// once it finished.
    pub fn start(
        self: &Arc<Self>,
        provisioner: Arc<dyn Provisioner>,
        done: mpsc::UnboundedSender<String>,
    ) {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            job.set_status(JobStatus::Running);
            info!(job_id = %job.id, desc = %job.desc, "job started");

            let worker = Arc::clone(&job);
            let outcome = tokio::task::spawn_blocking(move || {
                let mut log = JobLogWriter {
                    job: Arc::clone(&worker),
                };
                provisioner.run(&worker.play, &mut log)
            })
            .await
            .unwrap_or_else(|err| Err(format!("provisioner task failed: {err}")));

            job.finish(outcome);
            if done.send(job.id.clone()).is_err() {
                warn!(job_id = %job.id, "job finished after the event consumer stopped");
            }
        });
    }

    /// Records the outcome and closes the log.
    pub fn finish(&self, outcome: Result<(), String>) {
        {
            let mut state = self.state.lock().expect("job state lock poisoned");
            state.finished_unix_ms = Some(now_unix_ms());
            match &outcome {
                Ok(()) => state.status = JobStatus::Complete,
                Err(message) => {
                    state.status = JobStatus::Errored;
                    state.error = Some(message.clone());
                }
            }
        }
        match outcome {
            Ok(()) => info!(job_id = %self.id, desc = %self.desc, "job completed"),
            Err(message) => {
                self.log
                    .append(format!("job failed: {message}\n").as_bytes());
                warn!(job_id = %self.id, desc = %self.desc, "job failed: {message}");
            }
        }
        self.log.close();
    }

    pub fn append_log(&self, data: &[u8]) {
        self.log.append(data);
    }

    /// Opens the job's output as a byte stream.
    ///
    /// Everything logged so far is replayed first, then new output follows as
    /// it is produced. The stream ends once the job finished and the reader
    /// has seen all of it. Must be called from within a tokio runtime.
    pub fn log_reader(self: &Arc<Self>) -> DuplexStream {
        let (reader, mut writer) = tokio::io::duplex(LOG_PIPE_BYTES);
        let job = Arc::clone(self);
        let mut progress = job.log.progress.subscribe();
        tokio::spawn(async move {
            let mut offset = 0;
            loop {
                let LogProgress { len, closed } = *progress.borrow_and_update();
                if offset < len {
                    let pending = job.log.slice(offset, len);
                    if writer.write_all(&pending).await.is_err() {
                        // reader hung up
                        return;
                    }
                    offset = len;
                    continue;
                }
                if closed || progress.changed().await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });
        reader
    }

    fn set_status(&self, status: JobStatus) {
        self.state.lock().expect("job state lock poisoned").status = status;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("status", &self.status())
            .finish()
    }
}

/// `io::Write` adapter the provisioner writes its output through.
pub struct JobLogWriter {
    job: Arc<Job>,
}

impl Write for JobLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.job.append_log(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn play() -> Play {
        Play {
            playbook: "/etc/clusterm/playbooks/site.yml".to_string(),
            hosts: vec!["10.0.0.1".to_string()],
            host_group: "service-master".to_string(),
            user: "cluster-admin".to_string(),
            private_key: "/etc/clusterm/id_rsa".to_string(),
            extra_vars: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn reader_replays_history_then_follows_until_finish() {
        let job = Job::new("commission", play());
        job.append_log(b"TASK [setup]\n");

        let mut reader = job.log_reader();
        let mut first = vec![0u8; 13];
        reader
            .read_exact(&mut first)
            .await
            .expect("history is replayed");
        assert_eq!(&first[..], b"TASK [setup]\n");

        job.append_log(b"ok: [10.0.0.1]\n");
        job.finish(Ok(()));

        let mut rest = Vec::new();
        reader
            .read_to_end(&mut rest)
            .await
            .expect("stream ends after finish");
        assert_eq!(&rest[..], b"ok: [10.0.0.1]\n");
        assert_eq!(job.status(), JobStatus::Complete);
    }

    #[tokio::test]
    async fn finished_job_log_can_be_read_repeatedly() {
        let job = Job::new("discover", play());
        job.append_log(b"PLAY RECAP\n");
        job.finish(Err("host unreachable".to_string()));

        for _ in 0..2 {
            let mut out = Vec::new();
            job.log_reader()
                .read_to_end(&mut out)
                .await
                .expect("log should be readable");
            assert_eq!(&out[..], b"PLAY RECAP\njob failed: host unreachable\n");
        }
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Errored);
        assert_eq!(snapshot.error.as_deref(), Some("host unreachable"));
        assert!(snapshot.finished_unix_ms.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_appends_are_all_delivered() {
        let job = Job::new("update", play());
        let writers = (0..4)
            .map(|_| {
                let job = Arc::clone(&job);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        job.append_log(b"0123456789");
                    }
                })
            })
            .collect::<Vec<_>>();
        let mut reader = job.log_reader();
        for writer in writers {
            writer.join().expect("writer should finish");
        }
        job.finish(Ok(()));

        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .await
            .expect("log should be readable");
        assert_eq!(out.len(), 4_000);
    }

    #[tokio::test]
    async fn log_larger_than_pipe_is_delivered_whole() {
        let job = Job::new("update", play());
        let line = [b'x'; 1000];
        for _ in 0..20 {
            job.append_log(&line);
        }
        job.finish(Ok(()));

        let mut out = Vec::new();
        job.log_reader()
            .read_to_end(&mut out)
            .await
            .expect("log should be readable");
        assert_eq!(out.len(), 20_000);
    }
}
