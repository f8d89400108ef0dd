//! The in-flight task table a `WorkerHandler` actor owns: one entry per
//! outstanding request, keyed by the task id the handle allocated before
//! dispatching it.

use std::collections::HashMap;
use std::time::Instant;

use workerpool_core::TaskResolver;

use crate::api::EventSink;

/// Bookkeeping for one outstanding request.
pub(crate) struct TaskRecord {
    pub(crate) resolver: TaskResolver<serde_json::Value>,
    pub(crate) on: Option<EventSink>,
    pub(crate) started: Instant,
}

/// Tracks every request a handler has sent but not yet settled.
#[derive(Default)]
pub(crate) struct InflightTable {
    tasks: HashMap<u64, TaskRecord>,
}

impl InflightTable {
    pub(crate) fn new() -> Self {
        Self { tasks: HashMap::new() }
    }

    pub(crate) fn insert(&mut self, id: u64, record: TaskRecord) {
        self.tasks.insert(id, record);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<TaskRecord> {
        self.tasks.remove(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(&id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Remove and return every outstanding record, in no particular order.
    pub(crate) fn drain_all(&mut self) -> Vec<TaskRecord> {
        self.tasks.drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workerpool_core::{Task, WorkerPoolError};

    #[tokio::test]
    async fn removing_a_task_settles_its_future() {
        let mut table = InflightTable::new();
        let (resolver, task) = Task::new();
        table.insert(1, TaskRecord { resolver, on: None, started: Instant::now() });
        assert_eq!(table.len(), 1);

        let record = table.remove(1).unwrap();
        record.resolver.resolve(serde_json::json!(1));
        assert_eq!(task.await.unwrap(), serde_json::json!(1));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn drain_all_empties_the_table_and_yields_every_record() {
        let mut table = InflightTable::new();
        let mut tasks = Vec::new();
        for id in 1..=3u64 {
            let (resolver, task) = Task::new();
            table.insert(id, TaskRecord { resolver, on: None, started: Instant::now() });
            tasks.push(task);
        }

        let records = table.drain_all();
        assert_eq!(records.len(), 3);
        for record in records {
            record.resolver.reject(WorkerPoolError::WorkerTerminated);
        }
        for task in tasks {
            assert!(matches!(task.await, Err(WorkerPoolError::WorkerTerminated)));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn get_mut_allows_updating_a_record_in_place() {
        let mut table = InflightTable::new();
        let (resolver, _task) = Task::new();
        table.insert(5, TaskRecord { resolver, on: None, started: Instant::now() });
        let record = table.get_mut(5).unwrap();
        record.on = Some(Box::new(|_value| {}));
        assert!(table.get_mut(5).unwrap().on.is_some());
    }
}
