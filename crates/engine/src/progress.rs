//! Run progress shared between a running pipeline and the HTTP server

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Idle,
    Ingesting,
    Projecting,
    Matching,
    Complete,
    Error,
}

pub struct RunProgress {
    pub status: RwLock<RunStatus>,
    pub total_players: AtomicU32,
    pub projected_players: AtomicU32,
    pub lines_collected: AtomicU32,
    pub edges_found: AtomicU32,
    pub last_run_id: RwLock<Option<String>>,
    pub error_message: RwLock<Option<String>>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RunStatus::Idle),
            total_players: AtomicU32::new(0),
            projected_players: AtomicU32::new(0),
            lines_collected: AtomicU32::new(0),
            edges_found: AtomicU32::new(0),
            last_run_id: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    pub fn reset(&self) {
        *self.status.write() = RunStatus::Ingesting;
        self.total_players.store(0, Ordering::Relaxed);
        self.projected_players.store(0, Ordering::Relaxed);
        self.lines_collected.store(0, Ordering::Relaxed);
        self.edges_found.store(0, Ordering::Relaxed);
        *self.error_message.write() = None;
    }

    pub fn set_status(&self, status: RunStatus) {
        *self.status.write() = status;
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.error_message.write() = Some(message.into());
        *self.status.write() = RunStatus::Error;
    }

    pub fn complete(&self, run_id: &str) {
        *self.last_run_id.write() = Some(run_id.to_string());
        *self.status.write() = RunStatus::Complete;
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.read(),
            RunStatus::Ingesting | RunStatus::Projecting | RunStatus::Matching
        )
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: *self.status.read(),
            total_players: self.total_players.load(Ordering::Relaxed),
            projected_players: self.projected_players.load(Ordering::Relaxed),
            lines_collected: self.lines_collected.load(Ordering::Relaxed),
            edges_found: self.edges_found.load(Ordering::Relaxed),
            last_run_id: self.last_run_id.read().clone(),
            error_message: self.error_message.read().clone(),
        }
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub total_players: u32,
    pub projected_players: u32,
    pub lines_collected: u32,
    pub edges_found: u32,
    pub last_run_id: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_last_run_id() {
        let p = RunProgress::new();
        assert!(!p.is_running());
        p.reset();
        assert!(p.is_running());
        p.projected_players.fetch_add(3, Ordering::Relaxed);
        p.complete("run-1");
        p.reset();
        let snap = p.snapshot();
        assert_eq!(snap.projected_players, 0);
        assert_eq!(snap.last_run_id.as_deref(), Some("run-1"));
        p.fail("boom");
        assert_eq!(p.snapshot().status, RunStatus::Error);
    }
}
