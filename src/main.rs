use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flexi_logger::Logger;
use log::info;
use path_absolutize::Absolutize;

use needlebox::{
  build_needle_library, Case, Compiler, Engine, Job, JobInit, JudgeMode, Limits, NeedleBoxError,
  RuleMode, SyscallAction, SyscallRules,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(short, long, help = "Log specification [default: needlebox=info]")]
  log: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  #[command(about = "Judge a submission against testcase files")]
  Judge {
    #[arg(help = "Submission code file")]
    submission: String,

    #[arg(short, long, help = "Language of the submission")]
    language: String,

    #[arg(
      short,
      long,
      value_name = "IN:ANS",
      required = true,
      help = "Testcase stdin and answer file pair"
    )]
    case: Vec<String>,

    #[arg(long, help = "Compile command template overriding the preset")]
    compile: Option<String>,

    #[arg(short, long, help = "Needle library to inject")]
    needle: Option<String>,

    #[arg(short, long, help = "Time limit per case (unit: ms)")]
    time: Option<u64>,

    #[arg(short, long, help = "Heap memory limit per case (unit: KB)")]
    memory: Option<u64>,

    #[arg(long, help = "Compare bytes instead of trimmed lines")]
    strict: bool,

    #[arg(short, long, default_value_t = 100, help = "Points per case")]
    points: i64,
  },

  #[command(about = "Generate and compile a needle library")]
  Needle {
    #[arg(help = "Output path of the shared object")]
    output: String,

    #[arg(
      short,
      long,
      value_name = "NR[:DEDUCTION]",
      required = true,
      help = "Syscall rule; omit the deduction to kill on sight"
    )]
    rule: Vec<String>,

    #[arg(short, long, help = "Whitelist instead of blacklist")]
    whitelist: bool,

    #[arg(
      short,
      long,
      default_value = "gcc -o ${output} -fPIC -shared -x c -",
      help = "Compile command template"
    )]
    compile: String,
  },
}

/// Built-in compile command templates.
fn preset_compile_command(language: &str) -> Option<&'static str> {
  match language {
    "c" => Some("gcc -o ${output} -O2 -x c ${source}"),
    "cpp" | "c++" => Some("g++ -o ${output} -O2 --std=c++17 -x c++ ${source}"),
    "sh" => Some("sh -c \"cp ${source} ${output} && chmod 755 ${output}\""),
    _ => None,
  }
}

fn parse_case(pair: &str) -> Result<(String, String), NeedleBoxError> {
  match pair.split_once(':') {
    Some((stdin, answer)) => Ok((stdin.to_string(), answer.to_string())),
    None => Err(NeedleBoxError::cli(format!(
      "testcase `{}` should look like input.txt:answer.txt",
      pair
    ))),
  }
}

fn parse_rule(rule: &str) -> Result<SyscallAction, NeedleBoxError> {
  let (syscall, deduction) = match rule.split_once(':') {
    Some((syscall, deduction)) => (syscall, deduction),
    None => (rule, "0"),
  };
  let syscall = syscall
    .parse::<i64>()
    .map_err(|_| NeedleBoxError::cli(format!("bad syscall number `{}`", syscall)))?;
  let deduction = deduction
    .parse::<u16>()
    .map_err(|_| NeedleBoxError::cli(format!("bad deduction `{}`", deduction)))?;
  Ok(SyscallAction { syscall, deduction })
}

fn judge(
  submission: String,
  language: String,
  case: Vec<String>,
  compile: Option<String>,
  needle: Option<String>,
  time: Option<u64>,
  memory: Option<u64>,
  strict: bool,
  points: i64,
) -> Result<(), NeedleBoxError> {
  let code = fs::read_to_string(&submission)?;
  let template = match &compile {
    Some(template) => template.as_str(),
    None => preset_compile_command(&language).ok_or_else(|| {
      NeedleBoxError::cli(format!("no preset compile command for {}", language))
    })?,
  };
  let needle_path = match &needle {
    Some(path) => Path::new(path)
      .absolutize()
      .map_err(NeedleBoxError::from)?
      .to_string_lossy()
      .into_owned(),
    None => String::new(),
  };

  let limits = Limits {
    time_us: time.map_or(0, |ms| ms * 1000),
    stack_bytes: 0,
    heap_bytes: memory.map_or(0, |kb| kb * 1024),
  };
  let mut cases = Vec::with_capacity(case.len());
  for pair in &case {
    let (stdin_file, answer_file) = parse_case(pair)?;
    cases.push(Case {
      stdin: fs::read_to_string(stdin_file)?,
      expected_stdout: fs::read_to_string(answer_file)?,
      args: vec![],
      limits,
      points,
    });
  }

  let engine = Engine::new(std::env::temp_dir().join("needlebox"));
  engine.add_compiler(language.clone(), Compiler::new(template)?);
  engine.spawn_workers(1)?;

  let mode = if strict {
    JudgeMode::STRICT
  } else {
    JudgeMode::LAX
  };
  let task = engine.schedule(Job::new(JobInit {
    code,
    lang: language,
    needle_path,
    mode,
    cases,
    groups: None,
  }));
  info!("Scheduled task #{}", task.id());

  let snapshot = loop {
    let snapshot = task.snapshot();
    if snapshot.finished() {
      break snapshot;
    }
    thread::sleep(Duration::from_millis(20));
  };
  engine.shutdown();

  println!("Job: {}", snapshot.status);
  let compile_result = &snapshot.results[0];
  println!("Compilation: {}", compile_result.status);
  if !compile_result.extra.is_empty() {
    println!("{}", compile_result.extra.trim_end());
  }
  for (index, result) in snapshot.results.iter().skip(1).enumerate() {
    print!(
      "Case #{}: {} ({} pts, {} ms, {} KB)",
      index + 1,
      result.status,
      result.points,
      result.usages.time_us / 1000,
      result.usages.memory_bytes / 1024,
    );
    if result.extra.is_empty() {
      println!();
    } else {
      println!(" - {}", result.extra);
    }
  }
  Ok(())
}

fn main() -> Result<(), NeedleBoxError> {
  let cli = Cli::parse();
  let spec = cli.log.unwrap_or_else(|| "needlebox=info".to_string());
  let _logger = Logger::try_with_str(spec)?.start()?;

  match cli.command {
    Commands::Judge {
      submission,
      language,
      case,
      compile,
      needle,
      time,
      memory,
      strict,
      points,
    } => judge(
      submission, language, case, compile, needle, time, memory, strict, points,
    ),
    Commands::Needle {
      output,
      rule,
      whitelist,
      compile,
    } => {
      let actions = rule
        .iter()
        .map(|rule| parse_rule(rule))
        .collect::<Result<Vec<_>, _>>()?;
      let rules = SyscallRules {
        mode: if whitelist {
          RuleMode::Whitelist
        } else {
          RuleMode::Blacklist
        },
        actions,
      };
      let output = Path::new(&output)
        .absolutize()
        .map_err(NeedleBoxError::from)?
        .to_string_lossy()
        .into_owned();
      build_needle_library(&rules, &compile, &output)?;
      println!("Needle library written to {}", output);
      Ok(())
    }
  }
}
