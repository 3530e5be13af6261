use std::time::SystemTime;

use crate::status::{JudgeMode, Status};

/// Resource limits of a single run. 0 means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
  /// Wall clock limit, in microseconds.
  pub time_us: u64,
  /// Stack memory limit, in bytes.
  pub stack_bytes: u64,
  /// Heap memory limit, in bytes.
  pub heap_bytes: u64,
}

impl Limits {
  /// Checks if every limit is 0.
  pub fn is_all_unlimited(&self) -> bool {
    self.time_us == 0 && self.stack_bytes == 0 && self.heap_bytes == 0
  }
}

/// Resource usages measured by the runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usages {
  /// Time of execution, in microseconds.
  pub time_us: u64,
  /// Stack + heap memory at the last sampling point, in bytes.
  pub memory_bytes: u64,
}

/// A single test case.
#[derive(Debug, Clone, Default)]
pub struct Case {
  pub stdin: String,
  pub expected_stdout: String,
  pub args: Vec<String>,
  pub limits: Limits,
  pub points: i64,
}

/// Result of judging a case.
#[derive(Debug, Clone, Default)]
pub struct CaseResult {
  pub status: Status,
  pub usages: Usages,
  pub points: i64,
  /// Human-readable supplementary detail, e.g. compiler diagnostics or
  /// the reason the child was killed.
  pub extra: String,
}

/// Arguments passed to [`Job::new`].
#[derive(Debug, Clone, Default)]
pub struct JobInit {
  pub code: String,
  pub lang: String,
  /// Absolute path of the needle library injected into every run.
  pub needle_path: String,
  pub mode: JudgeMode,
  pub cases: Vec<Case>,
  /// Optional partition of 1-based case indices. Groups run in
  /// parallel; cases inside a group run sequentially.
  pub groups: Option<Vec<Vec<usize>>>,
}

/// A collection of cases to be judged against one submission.
///
/// `results[0]` is reserved for the compilation verdict;
/// `results[i + 1]` corresponds to `cases[i]`.
#[derive(Debug, Clone)]
pub struct Job {
  pub code: String,
  pub lang: String,
  pub needle_path: String,
  pub status: Status,
  pub mode: JudgeMode,
  pub cases: Vec<Case>,
  pub groups: Option<Vec<Vec<usize>>>,
  pub results: Vec<CaseResult>,
  pub updated: SystemTime,
}

impl Job {
  /// Creates a new waiting job using given arguments.
  pub fn new(init: JobInit) -> Job {
    let results = vec![CaseResult::default(); init.cases.len() + 1];
    Job {
      code: init.code,
      lang: init.lang,
      needle_path: init.needle_path,
      status: Status::Waiting,
      mode: init.mode,
      cases: init.cases,
      groups: init.groups,
      results,
      updated: SystemTime::now(),
    }
  }

  /// Checks whether this job is neither waiting nor running.
  pub fn finished(&self) -> bool {
    self.status != Status::Waiting && self.status != Status::Running
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_reserve_a_result_slot_for_compilation() {
    let job = Job::new(JobInit {
      cases: vec![Case::default(), Case::default()],
      ..JobInit::default()
    });
    assert_eq!(job.results.len(), job.cases.len() + 1);
    assert_eq!(job.status, Status::Waiting);
    assert!(job.results.iter().all(|r| r.status == Status::Waiting));
    assert!(!job.finished());
  }

  #[test]
  fn it_should_detect_unlimited_limits() {
    assert!(Limits::default().is_all_unlimited());
    let limits = Limits {
      time_us: 1,
      ..Limits::default()
    };
    assert!(!limits.is_all_unlimited());
  }
}
