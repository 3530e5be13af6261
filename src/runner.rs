use std::ffi::CString;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, dup2, execve, fork, pipe2, write, ForkResult, Pid};

use crate::error::NeedleBoxError;
use crate::job::{Limits, Usages};
use crate::status::Status;

/// Granularity of the limit enforcement loop. Memory must be observed
/// while the child is alive, so the supervisor polls instead of
/// waiting; one tick bounds how far past a limit a child can run.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Input to [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunnerInput {
  /// Executable path. The child's working directory is the directory
  /// containing it.
  pub executable: String,
  /// Arguments to the executable, without argv[0].
  pub arguments: Vec<String>,
  /// Needle library preloaded into the child.
  pub needle_path: String,
  /// Content written to the child's stdin.
  pub stdin: String,
  pub limits: Limits,
}

/// Output from [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunnerOutput {
  /// [`Status::Accepted`] means the child ran to completion; grading
  /// the output is the judger's business.
  pub status: Status,
  /// Stdout and stderr of the child, merged.
  pub stdout: String,
  pub usages: Usages,
  /// Point deduction accumulated from noted syscalls.
  pub deduction: u32,
  /// Exit code on accepted, terminating signal on runtime error,
  /// offending syscall on hostile code.
  pub exit_info: i32,
}

impl RunnerOutput {
  fn system_error() -> RunnerOutput {
    RunnerOutput {
      status: Status::SystemError,
      ..RunnerOutput::default()
    }
  }
}

/// Runs given program under the needle sandbox.
///
/// The trace relationship binds to the calling OS thread; the whole
/// run, from spawn to verdict, happens on this thread.
pub fn run(input: &RunnerInput) -> RunnerOutput {
  match run_supervised(input) {
    Ok(output) => output,
    Err(err) => {
      error!("Runner failed: {}", err);
      RunnerOutput::system_error()
    }
  }
}

fn run_supervised(input: &RunnerInput) -> Result<RunnerOutput, NeedleBoxError> {
  let (stdin_r, stdin_w) = pipe2(OFlag::O_CLOEXEC)?;
  // stdin is bounded by contract; fill the pipe up front and close it
  write_all(&stdin_w, input.stdin.as_bytes())?;
  drop(stdin_w);
  let (stdout_r, stdout_w) = pipe2(OFlag::O_CLOEXEC)?;

  let start = Instant::now();
  let child = match unsafe { fork() } {
    Ok(ForkResult::Parent { child, .. }) => child,
    Ok(ForkResult::Child) => {
      // this branch only falls through when exec fails
      let _ = setup_child(input, &stdin_r, &stdout_w);
      unsafe { libc::_exit(127) };
    }
    Err(errno) => return Err(errno.into()),
  };
  drop(stdin_r);
  drop(stdout_w);
  info!("Child process #{} spawned for {}", child, input.executable);

  // the child stops at its first instruction
  match waitpid(child, None)? {
    WaitStatus::Exited(_, code) => {
      error!("Child process #{} failed to execute (status {})", child, code);
      return Ok(RunnerOutput::system_error());
    }
    status => debug!("Child process #{} initial stop: {:?}", child, status),
  }
  if let Err(errno) = ptrace::setoptions(
    child,
    ptrace::Options::PTRACE_O_TRACESECCOMP | ptrace::Options::PTRACE_O_TRACEEXIT,
  ) {
    kill_child(child);
    return Err(errno.into());
  }

  match supervise(child, input, stdout_r, start) {
    Ok(output) => Ok(output),
    Err(err) => {
      kill_child(child);
      Err(err)
    }
  }
}

fn supervise(
  child: Pid,
  input: &RunnerInput,
  stdout_r: OwnedFd,
  start: Instant,
) -> Result<RunnerOutput, NeedleBoxError> {
  let unlimited = input.limits.is_all_unlimited();
  let mut stdout_r = Some(stdout_r);
  let mut usages = Usages::default();
  let mut frozen = false;
  let mut deduction: u32 = 0;
  let mut cpu_us: u64 = 0;
  let mut pending: Option<Signal> = None;

  loop {
    ptrace::cont(child, pending.take())?;

    let status = if unlimited {
      let (status, cpu) = wait_blocking(child)?;
      cpu_us = cpu;
      status
    } else {
      // poll: sleep a tick, reap state changes without blocking,
      // sample the child while it is still alive, enforce limits
      loop {
        thread::sleep(POLL_INTERVAL);
        let status = waitpid(child, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED))?;
        if !frozen {
          if let Ok((stack, heap)) = sample_memory(child) {
            usages = Usages {
              time_us: start.elapsed().as_micros() as u64,
              memory_bytes: stack + heap,
            };
            if input.limits.time_us > 0 && usages.time_us > input.limits.time_us {
              info!("Child process #{} exceeded the time limit", child);
              kill_child(child);
              return Ok(RunnerOutput {
                status: Status::TimeLimitExceeded,
                usages,
                ..RunnerOutput::default()
              });
            }
            if input.limits.stack_bytes > 0 && stack > input.limits.stack_bytes
              || input.limits.heap_bytes > 0 && heap > input.limits.heap_bytes
            {
              info!("Child process #{} exceeded the memory limit", child);
              kill_child(child);
              return Ok(RunnerOutput {
                status: Status::MemoryLimitExceeded,
                usages,
                ..RunnerOutput::default()
              });
            }
          }
        }
        if status != WaitStatus::StillAlive {
          break status;
        }
      }
    };

    match status {
      WaitStatus::PtraceEvent(pid, _, event)
        if event == ptrace::Event::PTRACE_EVENT_SECCOMP as i32 =>
      {
        if !frozen {
          sample_usages(pid, start, &mut usages);
        }
        // the filter's return data rides on the event message
        let data = (ptrace::getevent(pid)? as u64 & 0xffff) as u32;
        if data == 0 {
          let syscall = ptrace::getregs(pid)?.orig_rax as i32;
          info!(
            "Child process #{} is killed for forbidden syscall (id = {})",
            pid, syscall
          );
          kill_child(pid);
          return Ok(RunnerOutput {
            status: Status::HostileCode,
            usages,
            exit_info: syscall,
            ..RunnerOutput::default()
          });
        }
        debug!("Child process #{} deduction +{}", pid, data);
        deduction += data;
      }
      WaitStatus::PtraceEvent(pid, _, event)
        if event == ptrace::Event::PTRACE_EVENT_EXIT as i32 =>
      {
        // last snapshot before the child's pages go away
        if !frozen {
          sample_usages(pid, start, &mut usages);
        }
        frozen = true;
      }
      WaitStatus::Exited(pid, code) => {
        info!("Child process #{} exited with status {}", pid, code);
        if unlimited && cpu_us > 0 {
          usages.time_us = cpu_us;
        }
        let mut buffer = Vec::new();
        if let Some(fd) = stdout_r.take() {
          File::from(fd).read_to_end(&mut buffer)?;
        }
        return Ok(RunnerOutput {
          status: Status::Accepted,
          stdout: String::from_utf8_lossy(&buffer).into_owned(),
          usages,
          deduction,
          exit_info: code,
        });
      }
      WaitStatus::Signaled(pid, signal, _) => {
        info!("Child process #{} is terminated by {}", pid, signal);
        return Ok(RunnerOutput {
          status: Status::RuntimeError,
          usages,
          exit_info: signal as i32,
          ..RunnerOutput::default()
        });
      }
      WaitStatus::Stopped(pid, signal) => {
        debug!("Child process #{} is stopped by {}", pid, signal);
        // re-deliver real signals so fatal ones terminate the child;
        // SIGTRAP belongs to the tracing machinery
        if signal != Signal::SIGTRAP {
          pending = Some(signal);
        }
      }
      status => {
        debug!("Child process #{} reported {:?}", child, status);
      }
    }
  }
}

fn setup_child(
  input: &RunnerInput,
  stdin_r: &OwnedFd,
  stdout_w: &OwnedFd,
) -> Result<(), NeedleBoxError> {
  dup2(stdin_r.as_raw_fd(), libc::STDIN_FILENO)?;
  dup2(stdout_w.as_raw_fd(), libc::STDOUT_FILENO)?;
  dup2(stdout_w.as_raw_fd(), libc::STDERR_FILENO)?;

  let executable = Path::new(&input.executable);
  if let Some(parent) = executable.parent() {
    if !parent.as_os_str().is_empty() {
      chdir(parent)?;
    }
  }

  ptrace::traceme()?;

  let program = into_c_string(&input.executable)?;
  let mut args = vec![program.clone()];
  for argument in &input.arguments {
    args.push(into_c_string(argument)?);
  }
  let env = vec![into_c_string(&format!(
    "LD_PRELOAD={}",
    input.needle_path
  ))?];
  execve(&program, &args, &env)?;
  Ok(())
}

fn into_c_string(text: &str) -> Result<CString, NeedleBoxError> {
  CString::new(text).map_err(|_| NeedleBoxError::Fs(format!("NUL byte in `{}`", text)))
}

fn write_all(fd: &OwnedFd, mut buffer: &[u8]) -> Result<(), NeedleBoxError> {
  while !buffer.is_empty() {
    let written = write(fd, buffer)?;
    buffer = &buffer[written..];
  }
  Ok(())
}

/// Blocking wait that also harvests the child's cpu usage.
fn wait_blocking(pid: Pid) -> Result<(WaitStatus, u64), NeedleBoxError> {
  let mut status: libc::c_int = 0;
  let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
  let rc = unsafe { libc::wait4(pid.as_raw(), &mut status, libc::WUNTRACED, &mut rusage) };
  if rc < 0 {
    return Err(Errno::last().into());
  }
  let cpu = timeval_to_us(rusage.ru_utime) + timeval_to_us(rusage.ru_stime);
  Ok((WaitStatus::from_raw(Pid::from_raw(rc), status)?, cpu))
}

fn timeval_to_us(time: libc::timeval) -> u64 {
  time.tv_sec as u64 * 1_000_000 + time.tv_usec as u64
}

fn sample_usages(pid: Pid, start: Instant, usages: &mut Usages) {
  // the child may be gone already; keep the previous sample then
  if let Ok((stack, heap)) = sample_memory(pid) {
    *usages = Usages {
      time_us: start.elapsed().as_micros() as u64,
      memory_bytes: stack + heap,
    };
  }
}

/// Reads the child's data and stack segment sizes in bytes from the
/// process status pseudo-file.
fn sample_memory(pid: Pid) -> Result<(u64, u64), NeedleBoxError> {
  let text = fs::read_to_string(format!("/proc/{}/status", pid))?;
  let mut stack: u64 = 0;
  let mut heap: u64 = 0;
  for line in text.lines() {
    if let Some(rest) = line.strip_prefix("VmData:") {
      heap = parse_kb(rest);
    } else if let Some(rest) = line.strip_prefix("VmStk:") {
      stack = parse_kb(rest);
    }
  }
  Ok((stack, heap))
}

fn parse_kb(text: &str) -> u64 {
  let number = text.trim().split(' ').next().unwrap_or("0");
  number.parse::<u64>().unwrap_or(0) * 1024
}

fn kill_child(pid: Pid) {
  if let Err(errno) = kill(pid, Signal::SIGKILL) {
    error!("Failed to kill child process #{}: {}", pid, errno);
  }
  // reap the zombie so the pid does not linger
  let _ = waitpid(pid, None);
}
