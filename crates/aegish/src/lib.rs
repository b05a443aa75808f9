//! aegish - Pre-execution validation and containment for shell commands
//!
//! Every command line passes through a fixed pipeline before anything runs:
//!
//! 1. [`canonicalize`] rewrites it into the text the shell will interpret
//!    (escape decoding, quote normalization, bounded brace and glob
//!    expansion, variable expansion).
//! 2. [`validator`] runs the blocklist, the syntax-tree walker, the
//!    meta-execution detector and the compound-command decomposer.
//! 3. [`resolver`] reveals embedded execution (`$(...)`, backticks, process
//!    substitution, sourced scripts, here-documents) by running each inner
//!    command back through the pipeline under one shared
//!    [`ExecutionBudget`].
//! 4. [`policy`] merges every verdict and the external [`Classifier`]'s
//!    answer into one decision.
//! 5. [`executor`] runs what was approved, with shells denied exec by
//!    Landlock, and reads back the resulting session state.
//!
//! # Example
//!
//! ```no_run
//! use aegish::{Config, Pipeline, SessionState};
//!
//! fn main() -> aegish::Result<()> {
//!     let config = Config::default();
//!     let pipeline = Pipeline::from_config(&config)?;
//!     let session = SessionState::from_parent_env(
//!         std::env::current_dir()?,
//!         std::env::vars(),
//!         config.policy.role,
//!         config.enforcement_mode(),
//!     );
//!
//!     let evaluation = pipeline.check("ls -la", &session);
//!     println!("{}: {}", evaluation.verdict.action, evaluation.verdict.reason);
//!
//!     let run = pipeline.run(evaluation, &session, |_warning| false)?;
//!     println!("exit {}", run.outcome.exit_code());
//!     Ok(())
//! }
//! ```
//!
//! # Platform Support
//!
//! - **Linux**: exec denial via Landlock LSM (kernel 5.13+)
//! - **Other platforms**: analysis works; commands run unenforced with a
//!   warning

pub mod budget;
pub mod canonicalize;
pub mod classifier;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod policy;
pub mod resolver;
pub mod sandbox;
pub mod session;
pub mod shell;
pub mod validator;
pub mod verdict;

// Re-exports for convenience
pub use budget::{BudgetExhausted, ExecutionBudget};
pub use canonicalize::canonicalize;
pub use classifier::{
    health_check, Classifier, ClassifierRequest, ClassifierResponse, FallbackChain,
    ProcessClassifier,
};
pub use command::{CanonFlag, Command};
pub use config::{Config, EnforcementMode, FailMode, IfsPolicy, Mode, Role};
pub use error::{AegishError, ClassifierError, Result};
pub use executor::{ExecConfig, Execution, SandboxRunner};
pub use pipeline::{CommandRun, Outcome, Pipeline};
pub use policy::{approve, ApprovedCommand, ClassifierOutcome, CommandState, PolicyEngine};
pub use resolver::{Evaluation, InnerRunner, ResolutionState, Resolver, Substitution};
pub use session::SessionState;
pub use validator::StaticValidator;
pub use verdict::{Action, Verdict, VerdictSource};
