use std::fmt::{Debug, Display};

use flexi_logger::FlexiLoggerError;
use nix::errno::Errno;

/// Error type for every fallible construction and host-side operation.
///
/// Failures inside the judging pipeline are never surfaced through this
/// type; they are mapped to [`Status::SystemError`](crate::Status) and
/// travel through the result slots instead.
pub enum NeedleBoxError {
  /// A command template references an unknown variable or is malformed.
  Template(String),
  /// The needle library compiler failed.
  Needle(String),
  /// A judger could not be constructed or cloned.
  Script(String),
  /// File system operation failed.
  Fs(String),
  /// A raw OS call failed.
  Nix(Errno),
  /// Invalid command line usage.
  Cli(String),
  Logger(FlexiLoggerError),
}

impl NeedleBoxError {
  pub fn template<MS: Into<String>>(msg: MS) -> NeedleBoxError {
    NeedleBoxError::Template(msg.into())
  }

  pub fn needle<MS: Into<String>>(msg: MS) -> NeedleBoxError {
    NeedleBoxError::Needle(msg.into())
  }

  pub fn script<MS: Into<String>>(msg: MS) -> NeedleBoxError {
    NeedleBoxError::Script(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> NeedleBoxError {
    NeedleBoxError::Cli(msg.into())
  }
}

impl Debug for NeedleBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for NeedleBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      NeedleBoxError::Template(msg) => f.write_fmt(format_args!("Template Error: {}", msg)),
      NeedleBoxError::Needle(msg) => f.write_fmt(format_args!("Needle Error: {}", msg)),
      NeedleBoxError::Script(msg) => f.write_fmt(format_args!("Script Error: {}", msg)),
      NeedleBoxError::Fs(msg) => f.write_fmt(format_args!("File System Error: {}", msg)),
      NeedleBoxError::Nix(errno) => f.write_fmt(format_args!("Nix Error: {}", errno)),
      NeedleBoxError::Cli(msg) => f.write_fmt(format_args!("CLI Error: {}", msg)),
      NeedleBoxError::Logger(err) => f.write_fmt(format_args!("Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for NeedleBoxError {
  fn from(errno: Errno) -> Self {
    NeedleBoxError::Nix(errno)
  }
}

impl From<std::io::Error> for NeedleBoxError {
  fn from(err: std::io::Error) -> Self {
    NeedleBoxError::Fs(err.to_string())
  }
}

impl From<shell_words::ParseError> for NeedleBoxError {
  fn from(err: shell_words::ParseError) -> Self {
    NeedleBoxError::Template(err.to_string())
  }
}

impl From<FlexiLoggerError> for NeedleBoxError {
  fn from(err: FlexiLoggerError) -> Self {
    NeedleBoxError::Logger(err)
  }
}

impl std::error::Error for NeedleBoxError {}
