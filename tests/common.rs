use std::path::Path;
use std::sync::Once;

use flexi_logger::Logger;

static LOGGER: Once = Once::new();

/// Scaffolding shared by the integration suites: logging starts once
/// per test binary and every suite works inside its own scratch
/// folder, which doubles as the engine's temp dir base.
pub struct Fixture {
  scratch: tempfile::TempDir,
}

impl Fixture {
  pub fn scratch(&self) -> &Path {
    self.scratch.path()
  }
}

/// Builds the suite fixture. The log filter defaults to needlebox
/// debug output and can be overridden through `NEEDLEBOX_TEST_LOG`.
pub fn fixture() -> Fixture {
  LOGGER.call_once(|| {
    let spec = std::env::var("NEEDLEBOX_TEST_LOG")
      .unwrap_or_else(|_| "needlebox=debug,info".to_string());
    match Logger::try_with_str(&spec).and_then(|logger| logger.start()) {
      // the handle owns the writer; keep it alive for the whole binary
      Ok(handle) => std::mem::forget(handle),
      Err(err) => eprintln!("failed to start test logging ({}): {}", spec, err),
    }
  });
  Fixture {
    scratch: tempfile::tempdir().expect("scratch folder should be creatable"),
  }
}
