use std::{collections::HashMap, path::Path};

use chrono::NaiveDate;

use crate::context::{FilterOracle, TaskFs};
use crate::error::SemanticError;
use crate::period::parse_date_text;

/// What a builtin may look at while it runs.
pub struct BuiltinContext<'a> {
    pub fs: &'a dyn TaskFs,
    pub filters: &'a dyn FilterOracle,
    /// The directory containing the task, which relative paths are resolved against.
    pub task_dir: &'a Path,
}

/// A convenience wrapper for a result returned from a builtin
pub type BuiltinResult = Result<NaiveDate, SemanticError>;

/// A type alias for a boxed builtin
pub type Builtin = Box<dyn for<'a> Fn(&BuiltinContext<'a>, &[String]) -> BuiltinResult>;

/// The table behind `builtin(name, ...)`.
#[derive(Default)]
pub struct BuiltinRegistry {
    builtins: HashMap<String, Builtin>,
}

impl BuiltinRegistry {
    /// Creates a new, empty builtin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with `filter` and `non_empty` registered.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("filter", filter_fn);
        registry.register("non_empty", non_empty_fn);
        registry
    }

    /// Call the given builtin name with the args
    pub fn call(&self, name: &str, ctx: &BuiltinContext<'_>, args: &[String]) -> BuiltinResult {
        let f = self
            .builtins
            .get(name)
            .ok_or_else(|| SemanticError::UnknownBuiltin(name.to_string()))?;
        f(ctx, args)
    }

    /// Register a builtin with the given name
    pub fn register<F>(&mut self, name: &'static str, builtin: F)
    where
        F: for<'a> Fn(&BuiltinContext<'a>, &[String]) -> BuiltinResult + 'static,
    {
        self.builtins.insert(name.to_string(), Box::new(builtin));
    }
}

/// `filter(date, path)`: `date` if the tag filter writing to `path` requires action, otherwise
/// never.
fn filter_fn(ctx: &BuiltinContext<'_>, args: &[String]) -> BuiltinResult {
    let (if_true, path) = date_and_path("filter", args)?;
    let resolved = ctx.fs.resolve(ctx.task_dir, path)?;
    if !ctx.filters.is_filter_output(&resolved) {
        return Err(SemanticError::NotAFilterOutput(path.to_string()));
    }
    if ctx.filters.requires_action(&resolved) {
        Ok(if_true)
    } else {
        Ok(NaiveDate::MAX)
    }
}

/// `non_empty(date, path)`: `date` if `path` is a non-empty file or directory, otherwise never.
fn non_empty_fn(ctx: &BuiltinContext<'_>, args: &[String]) -> BuiltinResult {
    let (if_true, path) = date_and_path("non_empty", args)?;
    let resolved = ctx.fs.resolve(ctx.task_dir, path)?;
    let facts = ctx.fs.stat(&resolved)?;
    if !facts.exists || !(facts.is_file || facts.is_dir) {
        return Err(SemanticError::NotFileOrDirectory(path.to_string()));
    }
    if facts.size > 0 {
        Ok(if_true)
    } else {
        Ok(NaiveDate::MAX)
    }
}

fn date_and_path<'a>(name: &str, args: &'a [String]) -> Result<(NaiveDate, &'a str), SemanticError> {
    let [date, path] = args else {
        return Err(SemanticError::ArgumentCount {
            name: name.to_string(),
            expected: "2".to_string(),
            found: args.len(),
        });
    };
    let date =
        parse_date_text(date).ok_or_else(|| SemanticError::InvalidDate(date.to_string()))?;
    Ok((date, path))
}
