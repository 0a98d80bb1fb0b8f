//! 実行中ジョブの管理
//!
//! シェル側からジョブIDでキャンセルできるよう、トークンと状態だけを保持する。
//! ブラウザやファイルはパイプラインが所有する。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::progress::RunState;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// 終了済みジョブの状態を残しておく件数
const FINISHED_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// プロセス内で一意なIDを払い出す
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug)]
struct JobEntry {
    cancel: CancellationToken,
    state: RunState,
}

#[derive(Debug, Default)]
struct Jobs {
    entries: HashMap<JobId, JobEntry>,
    /// 終了順。古いものから捨てる
    finished: VecDeque<JobId>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    jobs: Arc<Mutex<Jobs>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 実行中として登録する。同じIDが実行中なら `false`。
    pub fn register(&self, job: JobId, cancel: CancellationToken) -> bool {
        let mut jobs = self.lock();
        if jobs.entries.get(&job).is_some_and(|e| !e.state.is_terminal()) {
            return false;
        }
        jobs.finished.retain(|id| *id != job);
        jobs.entries.insert(
            job,
            JobEntry {
                cancel,
                state: RunState::Running,
            },
        );
        debug!("Registered {}", job);
        true
    }

    /// キャンセルを要求する。未登録・終了済みのジョブには何もせず `false`。
    pub fn cancel(&self, job: JobId) -> bool {
        let jobs = self.lock();
        match jobs.entries.get(&job) {
            Some(entry) if !entry.state.is_terminal() => {
                info!("Cancellation requested for {}", job);
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// 未登録か、履歴から外れた古いジョブは `None`
    pub fn state(&self, job: JobId) -> Option<RunState> {
        self.lock().entries.get(&job).map(|e| e.state)
    }

    /// 終了状態を記録する（以後 `active_jobs` に含まれない）
    ///
    /// 終了済みは直近 `FINISHED_HISTORY` 件だけ残す。
    pub fn finish(&self, job: JobId, state: RunState) {
        let mut jobs = self.lock();
        let Some(entry) = jobs.entries.get_mut(&job) else {
            return;
        };
        entry.state = state;
        debug!("{} finished: {:?}", job, state);
        jobs.finished.push_back(job);

        while jobs.finished.len() > FINISHED_HISTORY {
            if let Some(old) = jobs.finished.pop_front() {
                jobs.entries.remove(&old);
            }
        }
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut active: Vec<JobId> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.state.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        active.sort();
        active
    }
}
