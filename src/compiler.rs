use std::fs;
use std::path::Path;
use std::process::Command;

use log::{debug, info};

use crate::error::NeedleBoxError;
use crate::status::Status;
use crate::utils::{rand_name, CommandTemplate};

/// A compiler that invokes an external program.
///
/// The command is a template over `${source}` and `${output}`, e.g.
/// `gcc -o ${output} -x c ${source}`. Workers hold their own clones.
#[derive(Debug, Clone)]
pub struct Compiler {
  command: CommandTemplate,
}

impl Compiler {
  /// Creates a new compiler with given command template.
  /// This fails only if the template is invalid.
  pub fn new(template: &str) -> Result<Compiler, NeedleBoxError> {
    let command = CommandTemplate::new(template, &["source", "output"])?;
    Ok(Compiler { command })
  }

  /// Compiles given code inside given temporary folder.
  ///
  /// On success returns `(CompilationSuccess, executable path)`; when
  /// the external command exits non-zero, `(CompilationError, combined
  /// stdout and stderr)`; on any host-side failure, `(SystemError, "")`.
  pub fn compile(&self, code: &str, temp_dir: &Path) -> (Status, String) {
    let source = temp_dir.join(rand_name("src_"));
    if fs::write(&source, code).is_err() {
      return (Status::SystemError, String::new());
    }
    let output = temp_dir.join(rand_name("exe_"));

    let source_path = source.to_string_lossy();
    let output_path = output.to_string_lossy();
    let argv = match self.command.expand_split(&[
      ("source", source_path.as_ref()),
      ("output", output_path.as_ref()),
    ]) {
      Ok(argv) => argv,
      Err(_) => return (Status::SystemError, String::new()),
    };
    debug!("Compile command: {}", argv.join(" "));

    let captured = match Command::new(&argv[0]).args(&argv[1..]).output() {
      Ok(captured) => captured,
      Err(_) => return (Status::SystemError, String::new()),
    };
    if !captured.status.success() {
      let mut diagnostics = String::from_utf8_lossy(&captured.stdout).into_owned();
      diagnostics.push_str(&String::from_utf8_lossy(&captured.stderr));
      info!("Compilation failed: {}", captured.status);
      return (Status::CompilationError, diagnostics);
    }

    info!("Compiled submission to {}", output.to_string_lossy());
    (
      Status::CompilationSuccess,
      output.to_string_lossy().into_owned(),
    )
  }
}
