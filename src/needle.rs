use std::fmt::Write as _;
use std::io::Write;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::NeedleBoxError;
use crate::utils::CommandTemplate;

/// C skeleton of the needle library. The rule rows and the default
/// action are spliced in by [`needle_source`].
const NEEDLE_TEMPLATE: &str = include_str!("needle.c.in");

/// Blacklist or whitelist?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
  /// Unruled syscalls are allowed; ruled syscalls notify the tracer
  /// with their deduction as data.
  Blacklist,
  /// Unruled syscalls notify the tracer with data 0, which kills the
  /// child; ruled syscalls are allowed.
  Whitelist,
}

/// What to do when encountering a syscall.
/// A deduction of 0 means the child is killed on the spot.
#[derive(Debug, Clone, Copy)]
pub struct SyscallAction {
  /// Syscall number to filter.
  pub syscall: i64,
  /// Points deducted each time the syscall is observed. Carried in the
  /// 16-bit data field of the filter return value.
  pub deduction: u16,
}

/// Rules compiled into the seccomp filter of a needle library.
#[derive(Debug, Clone)]
pub struct SyscallRules {
  pub mode: RuleMode,
  pub actions: Vec<SyscallAction>,
}

/// Renders the C source of a needle library implementing given rules.
///
/// The filter inspects only the syscall number: one jump-and-return
/// pair per listed syscall, then the mode's default action.
pub fn needle_source(rules: &SyscallRules) -> String {
  let mut rows = String::new();
  for action in &rules.actions {
    let ret = match rules.mode {
      RuleMode::Whitelist => "SECCOMP_RET_ALLOW".to_string(),
      RuleMode::Blacklist => format!("SECCOMP_RET_TRACE | {:#x}u", action.deduction),
    };
    let _ = writeln!(
      rows,
      "    {{ BPF_JMP | BPF_JEQ | BPF_K, 0, 1, {} }},",
      action.syscall
    );
    let _ = writeln!(rows, "    {{ BPF_RET | BPF_K, 0, 0, {} }},", ret);
  }
  let default_ret = match rules.mode {
    RuleMode::Whitelist => "SECCOMP_RET_TRACE",
    RuleMode::Blacklist => "SECCOMP_RET_ALLOW",
  };
  NEEDLE_TEMPLATE
    .replace("@@RULES@@", &rows)
    .replace("@@DEFAULT@@", default_ret)
}

/// Compiles a needle shared object to `output` by expanding the command
/// template against `${output}` and feeding the generated C source to
/// the compiler's stdin.
///
/// Example command: `gcc -o ${output} -fPIC -shared -x c -`
pub fn build_needle_library(
  rules: &SyscallRules,
  command: &str,
  output: &str,
) -> Result<(), NeedleBoxError> {
  let source = needle_source(rules);
  debug!("Generated needle source ({} bytes)", source.len());

  let template = CommandTemplate::new(command, &["output"])?;
  let argv = template.expand_split(&[("output", output)])?;

  let mut child = Command::new(&argv[0])
    .args(&argv[1..])
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()?;
  if let Some(mut stdin) = child.stdin.take() {
    stdin.write_all(source.as_bytes())?;
  }
  let status = child.wait()?;
  if !status.success() {
    return Err(NeedleBoxError::needle(format!(
      "needle compiler exited with {}",
      status
    )));
  }

  info!("Needle library written to {}", output);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
  }

  #[test]
  fn it_should_list_every_syscall_exactly_once() {
    let rules = SyscallRules {
      mode: RuleMode::Blacklist,
      actions: vec![
        SyscallAction {
          syscall: 41,
          deduction: 0,
        },
        SyscallAction {
          syscall: 57,
          deduction: 3,
        },
      ],
    };
    let source = needle_source(&rules);
    assert_eq!(count(&source, "BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 41 "), 1);
    assert_eq!(count(&source, "BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 57 "), 1);
    assert_eq!(count(&source, "SECCOMP_RET_TRACE | 0x0u"), 1);
    assert_eq!(count(&source, "SECCOMP_RET_TRACE | 0x3u"), 1);
    // blacklist default allows
    assert_eq!(count(&source, "{ BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW },"), 1);
  }

  #[test]
  fn it_should_trace_unruled_syscalls_in_whitelist_mode() {
    let rules = SyscallRules {
      mode: RuleMode::Whitelist,
      actions: vec![SyscallAction {
        syscall: 60,
        deduction: 0,
      }],
    };
    let source = needle_source(&rules);
    assert_eq!(count(&source, "{ BPF_RET | BPF_K, 0, 0, SECCOMP_RET_TRACE },"), 1);
    assert_eq!(count(&source, "{ BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW },"), 1);
    assert!(source.contains("PR_SET_NO_NEW_PRIVS"));
    assert!(source.contains("__attribute__((constructor))"));
  }

  #[test]
  fn it_should_build_with_an_external_command() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let output = dir.path().join("needle.so");
    let output = output.to_string_lossy().to_string();
    let rules = SyscallRules {
      mode: RuleMode::Blacklist,
      actions: vec![],
    };
    // stand-in compiler: copy stdin to the output path
    build_needle_library(&rules, "sh -c \"cat > ${output}\"", &output)
      .expect("build should work");
    let written = std::fs::read_to_string(&output).expect("output should exist");
    assert!(written.contains("SECCOMP_MODE_FILTER"));
  }

  #[test]
  fn it_should_fail_when_the_compiler_fails() {
    let rules = SyscallRules {
      mode: RuleMode::Blacklist,
      actions: vec![],
    };
    let result = build_needle_library(&rules, "sh -c \"exit 1\"", "/dev/null");
    assert!(result.is_err());
  }
}
