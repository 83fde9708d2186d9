//! Outstanding item snapshots and their text rendering

use std::fmt::{self, Write as _};
use std::time::Instant;

use taskman_core::id::TaskId;
use taskman_core::state::{TaskFlags, TaskState};

use crate::arena::TaskRecord;

/// Structured view of one live item, taken on the dispatcher thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub description: String,
    pub state: TaskState,
    pub flags: TaskFlags,
    /// Microseconds until `ready_at`, negative once passed
    pub ready_in_us: Option<i64>,
    /// Microseconds since submission
    pub age_us: u64,
    pub pending: u32,
    pub dependents: Vec<TaskId>,
    pub master: Option<TaskId>,
    /// Slave chain in execution order
    pub slaves: Vec<TaskId>,
    pub log_lines: usize,
}

impl TaskSnapshot {
    pub(crate) fn capture(record: &TaskRecord, slaves: Vec<TaskId>, now: Instant) -> Self {
        let ready_in_us = record.ready_at.map(|at| {
            if at >= now {
                (at - now).as_micros() as i64
            } else {
                -((now - at).as_micros() as i64)
            }
        });
        Self {
            id: record.id,
            description: record.description.clone(),
            state: record.state,
            flags: record.flags,
            ready_in_us,
            age_us: now.saturating_duration_since(record.submitted_at).as_micros() as u64,
            pending: record.pending,
            dependents: record.dependents.iter().map(|(id, _)| *id).collect(),
            master: record.master,
            slaves,
            log_lines: record.log.len(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.flags.contains(TaskFlags::WAITING)
    }
}

impl fmt::Display for TaskSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] pending={}",
            self.id, self.state, self.flags, self.pending
        )?;
        if let Some(us) = self.ready_in_us {
            write!(f, " ready_in={:+}us", us)?;
        }
        write!(f, " age={}us \"{}\"", self.age_us, self.description)
    }
}

/// Render snapshots as a tree: masters at the top level, their slaves and
/// dependents indented below.
pub fn render_tree(snapshots: &[TaskSnapshot]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} outstanding item(s)", snapshots.len());

    for snap in snapshots.iter().filter(|s| s.master.is_none()) {
        let _ = writeln!(out, "{}", snap);
        for slave_id in &snap.slaves {
            match snapshots.iter().find(|s| s.id == *slave_id) {
                Some(slave) => {
                    let _ = writeln!(out, "  + {}", slave);
                }
                None => {
                    let _ = writeln!(out, "  + {} (gone)", slave_id);
                }
            }
        }
        for dep in &snap.dependents {
            let _ = writeln!(out, "  -> {}", dep);
        }
    }

    // Slaves whose master is no longer live
    for snap in snapshots.iter().filter(|s| {
        s.master
            .map_or(false, |m| !snapshots.iter().any(|o| o.id == m))
    }) {
        let _ = writeln!(out, "{} (orphaned slave)", snap);
    }
    out
}
