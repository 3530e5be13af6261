use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, info};

use crate::compiler::Compiler;
use crate::error::NeedleBoxError;
use crate::job::{Case, Job};
use crate::judger::{lax_judge, strict_judge, Judger};
use crate::runner::{run, RunnerInput, RunnerOutput};
use crate::status::{JudgeKind, Status};
use crate::task::Task;
use crate::utils::rand_name;

/// The manager of this library.
///
/// An engine owns the registered compilers and judger prototypes, the
/// task queue and the cancellation ledger; workers consume scheduled
/// tasks until [`Engine::shutdown`].
pub struct Engine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  temp_dir_base: PathBuf,
  queue_tx: Sender<Arc<Task>>,
  queue_rx: Receiver<Arc<Task>>,
  state: Mutex<EngineState>,
}

struct EngineState {
  judgers: Vec<Judger>,
  compilers: HashMap<String, Compiler>,
  counter: u64,
  task_ids: Vec<u64>,
  stop_tx: Option<Sender<()>>,
  stop_rx: Receiver<()>,
}

impl Engine {
  /// Creates a new engine rooted at given temporary folder, e.g.
  /// `std::env::temp_dir().join("needlebox")`.
  pub fn new<P: Into<PathBuf>>(temp_dir_base: P) -> Engine {
    // rendezvous queue: scheduling suspends until a worker is ready
    let (queue_tx, queue_rx) = bounded(0);
    let (stop_tx, stop_rx) = bounded(0);
    Engine {
      inner: Arc::new(EngineInner {
        temp_dir_base: temp_dir_base.into(),
        queue_tx,
        queue_rx,
        state: Mutex::new(EngineState {
          judgers: vec![],
          compilers: HashMap::new(),
          counter: 0,
          task_ids: vec![],
          stop_tx: Some(stop_tx),
          stop_rx,
        }),
      }),
    }
  }

  /// Associates given compiler with a language.
  /// A language can only have one compiler.
  pub fn add_compiler<LS: Into<String>>(&self, lang: LS, compiler: Compiler) {
    let mut state = self.inner.lock();
    state.compilers.insert(lang.into(), compiler);
  }

  /// Registers a special judger and returns its id. Combine the id
  /// with [`JudgeMode::special`](crate::JudgeMode::special) to select
  /// it from a job.
  pub fn add_judger(&self, judger: Judger) -> usize {
    let mut state = self.inner.lock();
    state.judgers.push(judger);
    state.judgers.len() - 1
  }

  /// Creates a task for given job and hands it to the workers.
  /// Suspends until a worker is ready to receive.
  pub fn schedule(&self, job: Job) -> Arc<Task> {
    let task = {
      let mut state = self.inner.lock();
      let id = state.counter;
      state.counter += 1;
      state.task_ids.push(id);
      let temp_dir = self.inner.temp_dir_base.join(rand_name("job_"));
      Arc::new(Task::new(id, job, temp_dir))
    };
    debug!("Scheduling task #{}", task.id());
    if self.inner.queue_tx.send(task.clone()).is_err() {
      error!("Task queue is closed; task #{} is lost", task.id());
    }
    task
  }

  /// Checks whether given task has been scheduled and not yet claimed
  /// by a worker.
  pub fn contains_task(&self, id: u64) -> bool {
    let state = self.inner.lock();
    state.task_ids.contains(&id)
  }

  /// Cancels given task if no worker has claimed it yet; otherwise
  /// this is a no-op. Requiring the task value itself ensures that
  /// only its owner can cancel it.
  pub fn cancel_task(&self, task: &Arc<Task>) {
    if self.inner.remove_task(task.id()) {
      info!("Task #{} is cancelled", task.id());
      task.cancel();
    }
  }

  /// Spawns given amount of workers, each holding its own clones of
  /// the registered judgers. A judger that fails to clone aborts the
  /// spawn.
  pub fn spawn_workers(&self, n: usize) -> Result<(), NeedleBoxError> {
    let mut workers = Vec::with_capacity(n);
    {
      let state = self.inner.lock();
      for _ in 0..n {
        let judgers = state
          .judgers
          .iter()
          .map(|judger| judger.try_clone())
          .collect::<Result<Vec<_>, _>>()?;
        workers.push(Worker {
          inner: self.inner.clone(),
          judgers,
          queue_rx: self.inner.queue_rx.clone(),
          stop_rx: state.stop_rx.clone(),
        });
      }
    }
    for (index, worker) in workers.into_iter().enumerate() {
      thread::Builder::new()
        .name(format!("needlebox-worker-{}", index))
        .spawn(move || worker.poll())?;
    }
    info!("Spawned {} workers", n);
    Ok(())
  }

  /// Stops all workers after their current tasks, disposes the judger
  /// prototypes and re-arms the engine for a later spawn.
  pub fn shutdown(&self) {
    let mut state = self.inner.lock();
    state.stop_tx = None;
    for judger in state.judgers.drain(..) {
      judger.dispose();
    }
    let (stop_tx, stop_rx) = bounded(0);
    state.stop_tx = Some(stop_tx);
    state.stop_rx = stop_rx;
    info!("Engine is shut down");
  }

  /// Base of every per-task temporary folder.
  pub fn temp_dir_base(&self) -> &PathBuf {
    &self.inner.temp_dir_base
  }
}

impl EngineInner {
  fn lock(&self) -> MutexGuard<'_, EngineState> {
    self.state.lock().unwrap_or_else(|poison| poison.into_inner())
  }

  /// Removes an id from the cancellation ledger. Returns whether it
  /// was still present; "present" means the task has not started.
  fn remove_task(&self, id: u64) -> bool {
    let mut state = self.lock();
    match state.task_ids.iter().position(|&task_id| task_id == id) {
      Some(index) => {
        state.task_ids.remove(index);
        true
      }
      None => false,
    }
  }
}

struct Worker {
  inner: Arc<EngineInner>,
  judgers: Vec<Judger>,
  queue_rx: Receiver<Arc<Task>>,
  stop_rx: Receiver<()>,
}

impl Worker {
  fn poll(&self) {
    loop {
      select! {
        recv(self.queue_rx) -> message => match message {
          // claim atomically: an id still on the ledger means the
          // task may execute, a missing id means it was cancelled
          Ok(task) => {
            if self.inner.remove_task(task.id()) {
              self.run_task(&task);
            } else {
              debug!("Task #{} was cancelled before execution", task.id());
            }
          }
          Err(_) => return,
        },
        recv(self.stop_rx) -> _ => return,
      }
    }
  }

  fn run_task(&self, task: &Arc<Task>) {
    info!("Worker {:?} starts task #{}", thread::current().name(), task.id());
    task.update(|job| job.status = Status::Running);
    if let Err(err) = fs::create_dir_all(task.temp_dir()) {
      error!("Failed to create task folder: {}", err);
      task.update(|job| {
        job.results[0].status = Status::SystemError;
        job.results[0].extra = err.to_string();
        job.status = Status::SystemError;
        for result in job.results.iter_mut().skip(1) {
          result.status = Status::Skipped;
        }
      });
      return;
    }
    self.execute(task);
    if let Err(err) = fs::remove_dir_all(task.temp_dir()) {
      error!("Failed to remove task folder: {}", err);
    }
    info!("Task #{} finished", task.id());
  }

  fn execute(&self, task: &Arc<Task>) {
    let snapshot = task.snapshot();

    let compiler = {
      let state = self.inner.lock();
      state.compilers.get(&snapshot.lang).cloned()
    };
    let Some(compiler) = compiler else {
      error!("No compiler registered for language {}", snapshot.lang);
      task.update(|job| {
        job.results[0].status = Status::SystemError;
        job.results[0].extra = format!("no compiler registered for language {}", snapshot.lang);
        job.status = Status::SystemError;
        for result in job.results.iter_mut().skip(1) {
          result.status = Status::Skipped;
        }
      });
      return;
    };

    let (status, output) = compiler.compile(&snapshot.code, task.temp_dir());
    task.update(|job| job.results[0].status = status);
    if status != Status::CompilationSuccess {
      task.update(|job| {
        job.results[0].extra = output.clone();
        job.status = status;
        for result in job.results.iter_mut().skip(1) {
          result.status = Status::Skipped;
        }
      });
      return;
    }

    let executable = output;
    match &snapshot.groups {
      Some(groups) => self.run_packed(task, &snapshot, &executable, groups),
      None => self.run_unpacked(task, &snapshot, &executable),
    }

    task.update(|job| {
      let mut verdict = Status::Accepted;
      for result in job.results.iter().skip(1) {
        if result.status != Status::Accepted {
          verdict = result.status;
          break;
        }
      }
      job.status = verdict;
    });
  }

  /// One concurrent unit per case.
  fn run_unpacked(&self, task: &Arc<Task>, snapshot: &Job, executable: &str) {
    thread::scope(|scope| {
      for (index, case) in snapshot.cases.iter().enumerate() {
        scope.spawn(move || {
          self.run_one(task, snapshot, executable, case, index);
        });
      }
    });
  }

  /// One concurrent unit per group; cases inside a group run in the
  /// given order. Indices a group does not cover stay waiting.
  fn run_packed(
    &self,
    task: &Arc<Task>,
    snapshot: &Job,
    executable: &str,
    groups: &[Vec<usize>],
  ) {
    thread::scope(|scope| {
      for group in groups {
        scope.spawn(move || {
          for &index in group {
            if index == 0 || index > snapshot.cases.len() {
              error!("Task #{} group references case {}", task.id(), index);
              continue;
            }
            let case = &snapshot.cases[index - 1];
            self.run_one(task, snapshot, executable, case, index - 1);
          }
        });
      }
    });
  }

  fn run_one(&self, task: &Arc<Task>, snapshot: &Job, executable: &str, case: &Case, index: usize) {
    task.update(|job| job.results[index + 1].status = Status::Running);

    let output = run(&RunnerInput {
      executable: executable.to_string(),
      arguments: case.args.clone(),
      needle_path: snapshot.needle_path.clone(),
      stdin: case.stdin.clone(),
      limits: case.limits,
    });
    task.update(|job| {
      let result = &mut job.results[index + 1];
      result.usages = output.usages;
      if output.status != Status::Accepted {
        result.status = output.status;
        match output.status {
          Status::RuntimeError => {
            result.extra = format!("Process terminated by signal {}", output.exit_info);
          }
          Status::HostileCode => {
            result.extra = format!(
              "Process killed due to malicious syscall {}",
              output.exit_info
            );
          }
          _ => {}
        }
      }
    });
    if output.status != Status::Accepted {
      return;
    }

    let status = self.grade(snapshot, case, &output, task);
    task.update(|job| {
      let result = &mut job.results[index + 1];
      result.status = status;
      if status == Status::Accepted {
        result.points = (case.points - output.deduction as i64).max(0);
      }
    });
  }

  fn grade(&self, snapshot: &Job, case: &Case, output: &RunnerOutput, task: &Arc<Task>) -> Status {
    match snapshot.mode.kind() {
      JudgeKind::Lax => {
        if lax_judge(&output.stdout, &case.expected_stdout) {
          Status::Accepted
        } else {
          Status::WrongAnswer
        }
      }
      JudgeKind::Strict => {
        if strict_judge(&output.stdout, &case.expected_stdout) {
          Status::Accepted
        } else {
          Status::WrongAnswer
        }
      }
      JudgeKind::Special(id) => {
        let Some(prototype) = self.judgers.get(id) else {
          error!("No judger registered with id {}", id);
          return Status::SystemError;
        };
        // judgers may keep per-call state; grade on a fresh clone
        match prototype.try_clone() {
          Ok(judger) => judger.judge(&output.stdout, &case.expected_stdout, task.temp_dir()),
          Err(err) => {
            error!("Failed to clone judger {}: {}", id, err);
            Status::SystemError
          }
        }
      }
    }
  }
}
