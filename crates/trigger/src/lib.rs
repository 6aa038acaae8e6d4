//! Library for evaluating the due-date triggers embedded in task file names.

pub mod ast;
pub mod builtins;
pub mod context;
pub mod done_name;
pub mod error;
pub mod eval;
pub mod fs;
pub mod parser;
pub mod period;
pub mod process;
pub mod registry;

pub use crate::ast::Trigger;
pub use crate::context::{Environment, ExternalRunner, FileFacts, FilterOracle, NoFilters, TaskFs};
pub use crate::done_name::synthesize;
pub use crate::error::{FsError, ParseErrorInfo, ProcessError, SemanticError, TaskError};
pub use crate::eval::{EvalContext, EvaluatedTask, evaluate};
pub use crate::fs::JailedFs;
pub use crate::parser::parse_trigger;
pub use crate::period::{Period, parse_date};
pub use crate::process::ProcessRunner;
pub use crate::registry::{Registry, TaskEntry};
