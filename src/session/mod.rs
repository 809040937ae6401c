pub mod diversion_session;
pub mod record_session;
pub mod replay_session;
pub mod task;

use crate::session::task::Task;
use libc::pid_t;
use std::collections::HashMap;

/// The task set a session owns. Each session exclusively owns its tasks
/// for the session's lifetime; the scheduler choosing among them is a
/// collaborator outside this crate.
#[derive(Default)]
pub struct TaskMap {
    tasks: HashMap<pid_t, Task>,
}

impl TaskMap {
    pub fn new() -> TaskMap {
        TaskMap {
            tasks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, t: Task) {
        self.tasks.insert(t.tid, t);
    }

    pub fn remove(&mut self, tid: pid_t) -> Option<Task> {
        self.tasks.remove(&tid)
    }

    pub fn get_mut(&mut self, tid: pid_t) -> Option<&mut Task> {
        self.tasks.get_mut(&tid)
    }

    pub fn contains(&self, tid: pid_t) -> bool {
        self.tasks.contains_key(&tid)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn tids(&self) -> Vec<pid_t> {
        self.tasks.keys().copied().collect()
    }

    /// Forcibly kill every task. Used on session teardown; sessions can
    /// be created and destroyed many times, and we don't want to
    /// temporarily hog resources.
    pub fn kill_all_tasks(&mut self) {
        for (_, task) in self.tasks.iter_mut() {
            task.kill();
        }
        self.tasks.clear();
    }
}
