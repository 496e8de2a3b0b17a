//! Fan-in of step results within one pipeline run.
//!
//! Every run publishes its finished tasks on a task group keyed by the run's
//! `TaskGroupId`. Later steps join the group to collect the results of the
//! earlier ones and select them by tag.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use nese_resources::TaskGroupId;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};

use crate::{error::BusError, task::ProvisioningTask};

#[async_trait]
pub trait TaskGroupBus: Send + Sync {
    /// Add a finished task to the group.
    async fn publish(&self, group: TaskGroupId, task: ProvisioningTask) -> Result<(), BusError>;

    /// Wait until the group holds at least `expected` tasks and return them.
    ///
    /// Fails with `BusError::JoinTimeout` if the tasks are not all there
    /// when `timeout` elapses.
    async fn join(
        &self,
        group: TaskGroupId,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<ProvisioningTask>, BusError>;

    /// Drop the group and everything published on it.
    async fn delete(&self, group: TaskGroupId) -> Result<(), BusError>;
}

/// Task group bus kept in process memory.
///
/// Groups are created by their first `publish` and removed by `delete`.
/// Joining never creates a group.
#[derive(Debug, Default)]
pub struct InMemoryTaskGroupBus {
    groups: DashMap<TaskGroupId, Arc<Mutex<Vec<ProvisioningTask>>>>,
    published: Notify,
}

impl InMemoryTaskGroupBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, group: TaskGroupId) -> bool {
        self.groups.contains_key(&group)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The tasks of `group` if there are at least `expected`, else how many
    /// there are.
    fn snapshot(&self, group: TaskGroupId, expected: usize) -> Result<Vec<ProvisioningTask>, usize> {
        let Some(tasks) = self.groups.get(&group).map(|entry| entry.value().clone()) else {
            return Err(0);
        };

        let tasks = tasks.lock().unwrap_or_else(|err| err.into_inner());
        if tasks.len() >= expected {
            Ok(tasks.clone())
        } else {
            Err(tasks.len())
        }
    }
}

#[async_trait]
impl TaskGroupBus for InMemoryTaskGroupBus {
    async fn publish(&self, group: TaskGroupId, task: ProvisioningTask) -> Result<(), BusError> {
        trace!(%group, step = %task.name, success = task.success(), "publishing task");

        let tasks = self.groups.entry(group).or_default().value().clone();
        tasks
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(task);
        self.published.notify_waiters();

        Ok(())
    }

    async fn join(
        &self,
        group: TaskGroupId,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<ProvisioningTask>, BusError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            let found = match self.snapshot(group, expected) {
                Ok(tasks) => return Ok(tasks),
                Err(found) => found,
            };

            debug!(%group, expected, found, "waiting for tasks");

            tokio::select! {
                _ = &mut notified => {
                    trace!(%group, "task published");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return match self.snapshot(group, expected) {
                        Ok(tasks) => Ok(tasks),
                        Err(found) => Err(BusError::JoinTimeout {
                            group,
                            expected,
                            found,
                            timeout,
                        }),
                    };
                }
            }
        }
    }

    async fn delete(&self, group: TaskGroupId) -> Result<(), BusError> {
        if self.groups.remove(&group).is_some() {
            debug!(%group, "task group deleted");
        }
        Ok(())
    }
}
