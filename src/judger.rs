use std::fs;
use std::path::Path;
use std::process::Command;

use log::{debug, info};
use rhai::{Module, Scope};

use crate::error::NeedleBoxError;
use crate::status::Status;
use crate::utils::{rand_name, split_trimmed_lines, CommandTemplate};

/// Lax comparison: only trimmed non-empty lines are compared.
pub fn lax_judge(got: &str, expected: &str) -> bool {
  split_trimmed_lines(got) == split_trimmed_lines(expected)
}

/// Strict comparison: both outputs must be exactly the same.
pub fn strict_judge(got: &str, expected: &str) -> bool {
  got == expected
}

/// A grading capability for special judging.
///
/// Judgers are not required to be reentrant: workers clone the
/// registered prototypes once at spawn and clone again per case.
pub enum Judger {
  Lax,
  Strict,
  External(ExternalJudger),
  Scripted(ScriptJudger),
}

impl Judger {
  /// Creates a judger calling an external comparison program.
  ///
  /// Example command: `python3 compare.py ${got} ${expected}`
  pub fn external(template: &str) -> Result<Judger, NeedleBoxError> {
    Ok(Judger::External(ExternalJudger::new(template)?))
  }

  /// Creates a judger hosting an embedded script.
  ///
  /// The script must define `fn judge(got, expected)` returning one of
  /// the status codes; every status identifier is bound as a global
  /// constant and `tempdir` names a scratch folder the script may use.
  pub fn scripted(code: &str) -> Result<Judger, NeedleBoxError> {
    Ok(Judger::Scripted(ScriptJudger::new(code)?))
  }

  /// Compares an output with the expected answer.
  pub fn judge(&self, got: &str, expected: &str, temp_dir: &Path) -> Status {
    match self {
      Judger::Lax => {
        if lax_judge(got, expected) {
          Status::Accepted
        } else {
          Status::WrongAnswer
        }
      }
      Judger::Strict => {
        if strict_judge(got, expected) {
          Status::Accepted
        } else {
          Status::WrongAnswer
        }
      }
      Judger::External(judger) => judger.judge(got, expected, temp_dir),
      Judger::Scripted(judger) => judger.judge(got, expected, temp_dir),
    }
  }

  /// Clones this judger. Lax and strict clones are trivial; a scripted
  /// judger is recompiled and may fail.
  pub fn try_clone(&self) -> Result<Judger, NeedleBoxError> {
    match self {
      Judger::Lax => Ok(Judger::Lax),
      Judger::Strict => Ok(Judger::Strict),
      Judger::External(judger) => Ok(Judger::External(judger.clone())),
      Judger::Scripted(judger) => Ok(Judger::Scripted(ScriptJudger::new(&judger.code)?)),
    }
  }

  /// Disposes of this judger.
  pub fn dispose(self) {}
}

/// Calls an external program to compare outputs; exit status 0 means
/// the answer is accepted.
#[derive(Debug, Clone)]
pub struct ExternalJudger {
  command: CommandTemplate,
}

impl ExternalJudger {
  fn new(template: &str) -> Result<ExternalJudger, NeedleBoxError> {
    let command = CommandTemplate::new(template, &["got", "expected"])?;
    Ok(ExternalJudger { command })
  }

  fn judge(&self, got: &str, expected: &str, temp_dir: &Path) -> Status {
    let got_file = temp_dir.join(rand_name("spj_got_"));
    if fs::write(&got_file, got).is_err() {
      return Status::SystemError;
    }
    let expected_file = temp_dir.join(rand_name("spj_exp_"));
    if fs::write(&expected_file, expected).is_err() {
      return Status::SystemError;
    }

    let got_path = got_file.to_string_lossy();
    let expected_path = expected_file.to_string_lossy();
    let argv = match self.command.expand_split(&[
      ("got", got_path.as_ref()),
      ("expected", expected_path.as_ref()),
    ]) {
      Ok(argv) => argv,
      Err(_) => return Status::SystemError,
    };
    debug!("Special judge command: {}", argv.join(" "));

    match Command::new(&argv[0]).args(&argv[1..]).output() {
      Ok(captured) if captured.status.success() => Status::Accepted,
      Ok(_) => Status::WrongAnswer,
      Err(_) => Status::SystemError,
    }
  }
}

/// Hosts an embedded script engine to compare outputs.
pub struct ScriptJudger {
  code: String,
}

impl ScriptJudger {
  fn new(code: &str) -> Result<ScriptJudger, NeedleBoxError> {
    // surface script syntax errors at construction time
    rhai::Engine::new()
      .compile(code)
      .map_err(|err| NeedleBoxError::script(err.to_string()))?;
    Ok(ScriptJudger {
      code: code.to_string(),
    })
  }

  fn judge(&self, got: &str, expected: &str, temp_dir: &Path) -> Status {
    let mut engine = rhai::Engine::new();
    let mut module = Module::new();
    for status in Status::ALL {
      module.set_var(status.ident(), status.code() as i64);
    }
    module.set_var("tempdir", temp_dir.to_string_lossy().into_owned());
    engine.register_global_module(module.into());

    let ast = match engine.compile(&self.code) {
      Ok(ast) => ast,
      Err(err) => {
        info!("Judge script failed to compile: {}", err);
        return Status::SystemError;
      }
    };
    let mut scope = Scope::new();
    let code = match engine.call_fn::<i64>(
      &mut scope,
      &ast,
      "judge",
      (got.to_string(), expected.to_string()),
    ) {
      Ok(code) => code,
      Err(err) => {
        info!("Judge script failed: {}", err);
        return Status::SystemError;
      }
    };
    u16::try_from(code)
      .ok()
      .and_then(Status::from_code)
      .unwrap_or(Status::SystemError)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_judge_laxly() {
    assert!(lax_judge("3", "3\n"));
    assert!(lax_judge("  3  \n\n", "3\n"));
    assert!(lax_judge("1\n\n2\n", "1\n2"));
    assert!(!lax_judge("1 2", "1\n2"));
    assert!(!lax_judge("4", "3"));
  }

  #[test]
  fn it_should_judge_strictly() {
    assert!(strict_judge("3\n", "3\n"));
    assert!(!strict_judge("  3  \n\n", "3\n"));
    assert!(!strict_judge("3", "3\n"));
  }

  #[test]
  fn it_should_run_external_judgers() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let judger = Judger::external("cmp -s ${got} ${expected}").expect("template should parse");
    assert_eq!(judger.judge("hello", "hello", dir.path()), Status::Accepted);
    assert_eq!(
      judger.judge("hello", "world", dir.path()),
      Status::WrongAnswer
    );
    let clone = judger.try_clone().expect("clone should work");
    assert_eq!(clone.judge("x", "x", dir.path()), Status::Accepted);
  }

  #[test]
  fn it_should_run_scripted_judgers() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let judger = Judger::scripted(
      r#"
      fn judge(got, expected) {
        if got.trim() == expected.trim() {
          ST_ACCEPTED
        } else {
          ST_WRONG_ANSWER
        }
      }
      "#,
    )
    .expect("script should compile");
    assert_eq!(judger.judge(" 3 ", "3", dir.path()), Status::Accepted);
    assert_eq!(judger.judge("4", "3", dir.path()), Status::WrongAnswer);
  }

  #[test]
  fn it_should_expose_tempdir_to_scripts() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let judger = Judger::scripted(
      r#"
      fn judge(got, expected) {
        if tempdir != "" { ST_ACCEPTED } else { ST_SYSTEM_ERROR }
      }
      "#,
    )
    .expect("script should compile");
    assert_eq!(judger.judge("", "", dir.path()), Status::Accepted);
  }

  #[test]
  fn it_should_reject_invalid_scripts() {
    assert!(Judger::scripted("fn judge(").is_err());

    let dir = tempfile::tempdir().expect("tempdir should work");
    let no_judge_fn = Judger::scripted("let x = 1;").expect("script should compile");
    assert_eq!(no_judge_fn.judge("a", "a", dir.path()), Status::SystemError);

    let bad_code = Judger::scripted("fn judge(got, expected) { 9999 }")
      .expect("script should compile");
    assert_eq!(bad_code.judge("a", "a", dir.path()), Status::SystemError);
  }
}
