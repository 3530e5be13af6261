pub use compiler::Compiler;
pub use engine::Engine;
pub use error::NeedleBoxError;
pub use job::{Case, CaseResult, Job, JobInit, Limits, Usages};
pub use judger::{lax_judge, strict_judge, ExternalJudger, Judger, ScriptJudger};
pub use needle::{build_needle_library, needle_source, RuleMode, SyscallAction, SyscallRules};
pub use runner::{run, RunnerInput, RunnerOutput};
pub use status::{JudgeKind, JudgeMode, Status};
pub use task::Task;

mod compiler;
mod engine;
mod error;
mod job;
mod judger;
mod needle;
mod runner;
mod status;
mod task;
mod utils;
