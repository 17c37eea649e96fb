//! Task-reentrant async lock
//!
//! [`ReentrantLock`] is exclusive across tasks but lets the task that holds
//! it acquire it again. The holder is identified by its tokio task id; code
//! running directly under `block_on` has no task id and is identified by its
//! thread instead.
//!
//! Nested guards must be dropped in reverse order of acquisition, which
//! ordinary scoping guarantees.

use std::{
    sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use tokio::{
    sync::{Mutex, MutexGuard},
    task,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Task(task::Id),
    Thread(ThreadId),
}

impl Holder {
    fn current() -> Self {
        match task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(thread::current().id()),
        }
    }
}

#[derive(Debug)]
struct Owner {
    holder: Holder,
    depth: usize,
}

/// Exclusive lock that the holding task may re-enter
#[derive(Debug, Default)]
pub(crate) struct ReentrantLock {
    gate: Mutex<()>,
    owner: StdMutex<Option<Owner>>,
}

/// Held acquisition of a [`ReentrantLock`]
///
/// Only the outermost guard of a task owns the underlying mutex.
#[derive(Debug)]
pub(crate) struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    _gate: Option<MutexGuard<'a, ()>>,
}

impl ReentrantLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self) -> ReentrantGuard<'_> {
        let holder = Holder::current();
        if self.reenter(holder) {
            return ReentrantGuard {
                lock: self,
                _gate: None,
            };
        }

        let gate = self.gate.lock().await;
        *self.owner() = Some(Owner { holder, depth: 1 });
        ReentrantGuard {
            lock: self,
            _gate: Some(gate),
        }
    }

    fn reenter(&self, holder: Holder) -> bool {
        match self.owner().as_mut() {
            Some(owner) if owner.holder == holder => {
                owner.depth += 1;
                true
            }
            _ => false,
        }
    }

    fn owner(&self) -> StdMutexGuard<'_, Option<Owner>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReentrantGuard<'_> {
    // Runs before `_gate` is dropped, so ownership is cleared while the
    // mutex is still held.
    fn drop(&mut self) {
        let mut owner = self.lock.owner();
        if let Some(current) = owner.as_mut() {
            current.depth -= 1;
            if current.depth == 0 {
                *owner = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn lock_from_other_task(lock: &Arc<ReentrantLock>) -> task::JoinHandle<()> {
        let lock = Arc::clone(lock);
        tokio::spawn(async move {
            let _guard = lock.lock().await;
        })
    }

    #[tokio::test]
    async fn test_same_task_reenters() {
        let lock = Arc::new(ReentrantLock::new());
        let outer = lock.lock().await;
        let inner = tokio::time::timeout(Duration::from_secs(1), lock.lock())
            .await
            .expect("re-entry should not wait");
        drop(inner);
        drop(outer);

        tokio::time::timeout(Duration::from_secs(1), lock_from_other_task(&lock))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_tasks_wait_for_outermost_guard() {
        let lock = Arc::new(ReentrantLock::new());
        let outer = lock.lock().await;
        let inner = lock.lock().await;
        let waiting = lock_from_other_task(&lock);

        drop(inner);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(outer);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawned_task_cannot_reenter() {
        let lock = Arc::new(ReentrantLock::new());
        let _guard = lock.lock().await;
        let waiting = lock_from_other_task(&lock);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        waiting.abort();
    }
}
