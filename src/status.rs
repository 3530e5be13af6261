use std::fmt::{Display, Formatter};

/// Verdict of a job or of a single case.
///
/// The numeric codes are stable: scripted judgers receive them as global
/// constants named after [`Status::ident`] and answer with one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum Status {
  /// Waiting to be executed.
  #[default]
  Waiting = 0,
  /// Being executed.
  Running = 1,
  /// Cancelled before execution.
  Cancelled = 2,
  /// Successfully executed and the output matches.
  Accepted = 3,
  /// The submission failed to compile.
  CompilationError = 4,
  /// The submission compiled successfully.
  CompilationSuccess = 5,
  /// The output does not match the expected answer.
  WrongAnswer = 6,
  /// The child was terminated by a signal.
  RuntimeError = 7,
  /// The child invoked a forbidden system call.
  HostileCode = 8,
  TimeLimitExceeded = 9,
  MemoryLimitExceeded = 10,
  /// Something went wrong on the judging host.
  SystemError = 11,
  /// The case was skipped.
  Skipped = 12,
}

impl Status {
  pub const ALL: [Status; 13] = [
    Status::Waiting,
    Status::Running,
    Status::Cancelled,
    Status::Accepted,
    Status::CompilationError,
    Status::CompilationSuccess,
    Status::WrongAnswer,
    Status::RuntimeError,
    Status::HostileCode,
    Status::TimeLimitExceeded,
    Status::MemoryLimitExceeded,
    Status::SystemError,
    Status::Skipped,
  ];

  /// Stable numeric code of this status.
  pub fn code(self) -> u16 {
    self as u16
  }

  /// Inverse of [`Status::code`].
  pub fn from_code(code: u16) -> Option<Status> {
    Status::ALL.get(code as usize).copied()
  }

  /// Stable machine-readable identifier.
  pub fn ident(self) -> &'static str {
    match self {
      Status::Waiting => "ST_WAITING",
      Status::Running => "ST_RUNNING",
      Status::Cancelled => "ST_CANCELLED",
      Status::Accepted => "ST_ACCEPTED",
      Status::CompilationError => "ST_COMPILATION_ERROR",
      Status::CompilationSuccess => "ST_COMPILATION_SUCCESS",
      Status::WrongAnswer => "ST_WRONG_ANSWER",
      Status::RuntimeError => "ST_RUNTIME_ERROR",
      Status::HostileCode => "ST_HOSTILE_CODE",
      Status::TimeLimitExceeded => "ST_TIME_LIMIT_EXCEEDED",
      Status::MemoryLimitExceeded => "ST_MEMORY_LIMIT_EXCEEDED",
      Status::SystemError => "ST_SYSTEM_ERROR",
      Status::Skipped => "ST_SKIPPED",
    }
  }
}

impl Display for Status {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Status::Waiting => "Waiting",
      Status::Running => "Running",
      Status::Cancelled => "Cancelled",
      Status::Accepted => "Accepted",
      Status::CompilationError => "Compilation Error",
      Status::CompilationSuccess => "Compilation Success",
      Status::WrongAnswer => "Wrong Answer",
      Status::RuntimeError => "Runtime Error",
      Status::HostileCode => "Hostile Code",
      Status::TimeLimitExceeded => "Time Limit Exceeded",
      Status::MemoryLimitExceeded => "Memory Limit Exceeded",
      Status::SystemError => "System Error",
      Status::Skipped => "Skipped",
    };
    f.write_str(label)
  }
}

/// How the output of an accepted run is graded.
///
/// The low byte selects the mode; when the mode is special, the high
/// byte carries the id of a judger registered on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgeMode(u16);

/// Decoded form of a [`JudgeMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeKind {
  /// Compare trimmed non-empty lines.
  Lax,
  /// Compare bytes.
  Strict,
  /// Delegate to the registered judger with this id.
  Special(usize),
}

impl JudgeMode {
  pub const LAX: JudgeMode = JudgeMode(0);
  pub const STRICT: JudgeMode = JudgeMode(1);

  /// Combines a judger id with the special mode.
  pub fn special(judger: usize) -> JudgeMode {
    JudgeMode(((judger as u16) << 8) | 2)
  }

  /// Mode bits of this mode.
  pub fn mode_bits(self) -> u16 {
    self.0 & 0x00ff
  }

  /// Judger id of this mode.
  /// Meaningful only when the mode bits select special judging.
  pub fn judger_id(self) -> usize {
    ((self.0 & 0xff00) >> 8) as usize
  }

  pub fn kind(self) -> JudgeKind {
    match self.mode_bits() {
      0 => JudgeKind::Lax,
      1 => JudgeKind::Strict,
      _ => JudgeKind::Special(self.judger_id()),
    }
  }
}

impl Default for JudgeMode {
  fn default() -> Self {
    JudgeMode::LAX
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_keep_status_codes_stable() {
    assert_eq!(Status::Waiting.code(), 0);
    assert_eq!(Status::Accepted.code(), 3);
    assert_eq!(Status::WrongAnswer.code(), 6);
    assert_eq!(Status::Skipped.code(), 12);
    for status in Status::ALL {
      assert_eq!(Status::from_code(status.code()), Some(status));
    }
    assert_eq!(Status::from_code(13), None);
  }

  #[test]
  fn it_should_name_statuses() {
    assert_eq!(Status::HostileCode.ident(), "ST_HOSTILE_CODE");
    assert_eq!(format!("{}", Status::TimeLimitExceeded), "Time Limit Exceeded");
    assert_eq!(format!("{}", Status::Accepted), "Accepted");
  }

  #[test]
  fn it_should_split_judge_mode_bits() {
    assert_eq!(JudgeMode::LAX.kind(), JudgeKind::Lax);
    assert_eq!(JudgeMode::STRICT.kind(), JudgeKind::Strict);
    let mode = JudgeMode::special(5);
    assert_eq!(mode.mode_bits(), 2);
    assert_eq!(mode.judger_id(), 5);
    assert_eq!(mode.kind(), JudgeKind::Special(5));
  }
}
