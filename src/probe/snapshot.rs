//! Rollback protocol between sub-tests.
//!
//! One snapshot is captured per campaign. A full restore (memory and
//! registers) is only paid when the previous sub-test may have left memory in
//! a state the next one must not see; otherwise registers alone are reset.

use crate::error::EngineError;
use crate::sandbox::ExecutionEngine;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SandboxState {
    /// Memory is fit for the next sub-test as is.
    Clean,
    /// Memory must be rolled back before the next sub-test.
    Dirty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreCounters {
    pub full: u64,
    pub registers_only: u64,
}

#[derive(Debug, Clone)]
pub struct SnapshotController {
    snapshot: Option<usize>,
    state: SandboxState,
    counters: RestoreCounters,
}

impl Default for SnapshotController {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotController {
    pub fn new() -> Self {
        Self {
            snapshot: None,
            state: SandboxState::Dirty,
            counters: RestoreCounters::default(),
        }
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn snapshot_id(&self) -> Option<usize> {
        self.snapshot
    }

    pub fn counters(&self) -> RestoreCounters {
        self.counters
    }

    /// Capture the pristine image. Must run before any fixture is mapped.
    pub fn begin_campaign<E: ExecutionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<usize, EngineError> {
        let id = engine.take_snapshot().map_err(|e| {
            EngineError::Unavailable(format!("initial snapshot capture failed: {e}"))
        })?;
        tracing::debug!("[SNAPSHOT] captured pristine snapshot #{}", id);
        self.snapshot = Some(id);
        self.state = SandboxState::Clean;
        Ok(id)
    }

    pub fn reset_counters(&mut self) {
        self.counters = RestoreCounters::default();
    }

    /// Every case starts from pristine memory.
    pub fn begin_case(&mut self) {
        self.state = SandboxState::Dirty;
    }

    pub fn before_subtest<E: ExecutionEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<(), EngineError> {
        let id = self.snapshot.ok_or(EngineError::NoSnapshot)?;
        match self.state {
            SandboxState::Clean => {
                engine.restore_snapshot(id, false)?;
                self.counters.registers_only += 1;
            }
            SandboxState::Dirty => {
                engine.restore_snapshot(id, true)?;
                self.counters.full += 1;
                self.state = SandboxState::Clean;
            }
        }
        Ok(())
    }

    /// Memory is only trusted for the next sub-test when the run finished and
    /// the case wants its effects kept.
    pub fn after_subtest(&mut self, completed: bool, persistent: bool) {
        self.state = if completed && persistent {
            SandboxState::Clean
        } else {
            SandboxState::Dirty
        };
    }
}
