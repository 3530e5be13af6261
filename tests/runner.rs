use std::fs;
use std::os::unix::fs::PermissionsExt;

use needlebox::{run, Limits, RunnerInput, Status};

mod common;

fn input_for(executable: &str, arguments: Vec<&str>) -> RunnerInput {
  RunnerInput {
    executable: executable.to_string(),
    arguments: arguments.into_iter().map(|a| a.to_string()).collect(),
    needle_path: String::new(),
    stdin: String::new(),
    limits: Limits::default(),
  }
}

#[test]
fn it_should_run_to_completion() {
  let _fixture = common::fixture();
  let output = run(&input_for("/bin/echo", vec!["hi"]));
  assert_eq!(output.status, Status::Accepted);
  assert_eq!(output.stdout, "hi\n");
  assert_eq!(output.exit_info, 0);
  assert_eq!(output.deduction, 0);
  // usages come from the exit trace stop even on the blocking path
  assert!(output.usages.memory_bytes > 0);
}

#[test]
fn it_should_feed_stdin_and_collect_stdout() {
  let _fixture = common::fixture();
  let mut input = input_for("/bin/cat", vec![]);
  input.stdin = "hello\nneedle\n".to_string();
  let output = run(&input);
  assert_eq!(output.status, Status::Accepted);
  assert_eq!(output.stdout, "hello\nneedle\n");
}

#[test]
fn it_should_report_the_exit_code() {
  let _fixture = common::fixture();
  let output = run(&input_for("/bin/sh", vec!["-c", "exit 3"]));
  // a non-zero exit is still a completed run; grading is not the
  // runner's business
  assert_eq!(output.status, Status::Accepted);
  assert_eq!(output.exit_info, 3);
}

#[test]
fn it_should_run_inside_the_executable_folder() {
  let fixture = common::fixture();
  let script = fixture.scratch().join("cwd_probe");
  fs::write(&script, "#!/bin/sh\npwd\n").expect("script should be written");
  fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
    .expect("script should be executable");

  let output = run(&input_for(&script.to_string_lossy(), vec![]));
  assert_eq!(output.status, Status::Accepted);
  let expected = fixture
    .scratch()
    .canonicalize()
    .expect("scratch should resolve");
  assert_eq!(output.stdout.trim_end(), expected.to_string_lossy());
}

#[test]
fn it_should_classify_fatal_signals() {
  let _fixture = common::fixture();
  let output = run(&input_for("/bin/sh", vec!["-c", "kill -SEGV $$"]));
  assert_eq!(output.status, Status::RuntimeError);
  assert_eq!(output.exit_info, 11);
}

#[test]
fn it_should_enforce_the_time_limit() {
  let _fixture = common::fixture();
  let mut input = input_for("/bin/sleep", vec!["5"]);
  input.limits = Limits {
    time_us: 100_000,
    ..Limits::default()
  };
  let output = run(&input);
  assert_eq!(output.status, Status::TimeLimitExceeded);
  assert!(output.usages.time_us >= 100_000);
  // killed long before the sleep would end
  assert!(output.usages.time_us < 2_000_000);
}

#[test]
fn it_should_snapshot_usages_of_a_fast_child() {
  let _fixture = common::fixture();
  let mut input = input_for("/bin/echo", vec!["quick"]);
  input.limits = Limits {
    time_us: 1_000_000,
    ..Limits::default()
  };
  let output = run(&input);
  assert_eq!(output.status, Status::Accepted);
  assert!(output.usages.memory_bytes > 0);
}

#[test]
fn it_should_report_spawn_failures() {
  let _fixture = common::fixture();
  let output = run(&input_for("/nonexistent/program", vec![]));
  assert_eq!(output.status, Status::SystemError);
  assert!(output.stdout.is_empty());
  assert_eq!(output.deduction, 0);
}

#[test]
fn it_should_merge_stderr_into_stdout() {
  let _fixture = common::fixture();
  let output = run(&input_for("/bin/sh", vec!["-c", "echo out; echo err >&2"]));
  assert_eq!(output.status, Status::Accepted);
  assert!(output.stdout.contains("out"));
  assert!(output.stdout.contains("err"));
}
