use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::SystemTime;

use crossbeam_channel::Sender;
use log::error;

use crate::job::Job;
use crate::status::Status;

/// A task wraps around a [`Job`] that is assigned to a worker.
///
/// The task is the only mutable view of its job: every read and write
/// goes through the internal lock, and observers receive by-value
/// snapshots taken under that lock.
pub struct Task {
  id: u64,
  temp_dir: PathBuf,
  state: Mutex<TaskState>,
}

struct TaskState {
  job: Job,
  listener: Option<Sender<Job>>,
}

impl Task {
  pub(crate) fn new(id: u64, job: Job, temp_dir: PathBuf) -> Task {
    Task {
      id,
      temp_dir,
      state: Mutex::new(TaskState {
        job,
        listener: None,
      }),
    }
  }

  /// Id of the task, incremented per scheduled job.
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Scratch folder owned by this task for its entire life.
  pub fn temp_dir(&self) -> &Path {
    &self.temp_dir
  }

  /// A snapshot of the current job.
  ///
  /// Once a snapshot reports a finished job, no later snapshot will
  /// differ from it.
  pub fn snapshot(&self) -> Job {
    let state = self.lock();
    state.job.clone()
  }

  /// Registers a listener invoked with a fresh snapshot after every
  /// state update. Invocations are serialized per task, in update
  /// order, off the worker's thread.
  ///
  /// Subscribing after work has begun may miss earlier updates.
  pub fn subscribe<F>(&self, listener: F)
  where
    F: Fn(Job) + Send + 'static,
  {
    let (tx, rx) = crossbeam_channel::unbounded::<Job>();
    let spawned = thread::Builder::new()
      .name(format!("needlebox-listener-{}", self.id))
      .spawn(move || {
        for job in rx.iter() {
          listener(job);
        }
      });
    if let Err(err) = spawned {
      error!("Failed to spawn listener thread: {}", err);
      return;
    }
    let mut state = self.lock();
    state.listener = Some(tx);
  }

  /// Mutates the job under the lock, stamps it and notifies the
  /// listener with a snapshot.
  pub(crate) fn update<F>(&self, mutate: F)
  where
    F: FnOnce(&mut Job),
  {
    let mut state = self.lock();
    mutate(&mut state.job);
    state.job.updated = SystemTime::now();
    if let Some(listener) = &state.listener {
      let _ = listener.send(state.job.clone());
    }
  }

  pub(crate) fn cancel(&self) {
    self.update(|job| {
      job.status = Status::Cancelled;
      for result in job.results.iter_mut() {
        result.status = Status::Cancelled;
      }
    });
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, TaskState> {
    self.state.lock().unwrap_or_else(|poison| poison.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::job::{Case, JobInit};

  fn make_task() -> Task {
    let job = Job::new(JobInit {
      cases: vec![Case::default(), Case::default()],
      ..JobInit::default()
    });
    Task::new(7, job, PathBuf::from("/tmp/needlebox-test"))
  }

  #[test]
  fn it_should_snapshot_under_the_lock() {
    let task = make_task();
    assert_eq!(task.id(), 7);
    task.update(|job| job.status = Status::Running);
    let snapshot = task.snapshot();
    assert_eq!(snapshot.status, Status::Running);
  }

  #[test]
  fn it_should_cancel_every_result() {
    let task = make_task();
    task.cancel();
    let snapshot = task.snapshot();
    assert_eq!(snapshot.status, Status::Cancelled);
    assert!(snapshot
      .results
      .iter()
      .all(|r| r.status == Status::Cancelled));
    assert!(snapshot.finished());

    // cancelling again leaves the same terminal state
    task.cancel();
    let again = task.snapshot();
    assert_eq!(again.status, Status::Cancelled);
  }

  #[test]
  fn it_should_notify_listeners_in_update_order() {
    let task = make_task();
    let (tx, rx) = crossbeam_channel::unbounded::<Status>();
    task.subscribe(move |job| {
      tx.send(job.status).expect("send should work");
    });

    task.update(|job| job.status = Status::Running);
    task.update(|job| job.status = Status::WrongAnswer);

    let mut seen = Vec::new();
    for _ in 0..2 {
      seen.push(
        rx.recv_timeout(Duration::from_secs(5))
          .expect("listener should be notified"),
      );
    }
    assert_eq!(seen, vec![Status::Running, Status::WrongAnswer]);
  }
}
