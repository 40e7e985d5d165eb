//! Task registry: id → FSM handle, with a hard cap on tasks in
//! non-terminal states. Terminal tasks stay queryable but release their
//! slot exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use pg_domain::error::{Error, Result};

use super::fsm::TaskFsm;

/// A registered task. The mutex is the single-writer guarantee: every
/// transition and every context mutation goes through it.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: String,
    pub fsm: Mutex<TaskFsm>,
    terminal: AtomicBool,
}

impl TaskHandle {
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }
}

pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskHandle>>>,
    active: AtomicUsize,
    max_active: usize,
}

impl TaskRegistry {
    pub fn new(max_active: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Tasks currently in non-terminal states.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// All registered tasks, terminal included.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Register a new task, claiming an active slot.
    pub fn register(&self, fsm: TaskFsm) -> Result<Arc<TaskHandle>> {
        self.claim_slot()?;

        let id = fsm.context.id.clone();
        let handle = Arc::new(TaskHandle {
            id: id.clone(),
            fsm: Mutex::new(fsm),
            terminal: AtomicBool::new(false),
        });
        self.tasks.write().insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Result<Arc<TaskHandle>> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_owned()))
    }

    /// Release a task's active slot. Idempotent.
    pub fn mark_terminal(&self, id: &str) {
        if let Ok(handle) = self.get(id) {
            if !handle.terminal.swap(true, Ordering::AcqRel) {
                self.active.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Re-activate a terminal task (resume), re-claiming a slot under
    /// the same cap as registration.
    pub fn reactivate(&self, id: &str) -> Result<()> {
        let handle = self.get(id)?;
        if !handle.is_terminal() {
            return Ok(());
        }
        self.claim_slot()?;
        handle.terminal.store(false, Ordering::Release);
        Ok(())
    }

    fn claim_slot(&self) -> Result<()> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max_active {
                return Err(Error::RegistryFull {
                    active: current,
                    max: self.max_active,
                });
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }
}
