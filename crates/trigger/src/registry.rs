//! The per-batch cache of parsed and evaluated tasks.
//!
//! A registry is built for one batch of tasks (typically one directory listing) and dropped
//! afterwards. Every task is parsed up front so the id index and duplicate detection do not depend
//! on which tasks are queried later. Evaluation is lazy and memoized: a task is evaluated at most
//! once per registry, whether it was asked for directly or reached through `ref(...)`.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::ast::Trigger;
use crate::builtins::BuiltinContext;
use crate::context::Environment;
use crate::done_name::synthesize;
use crate::error::{FsError, ProcessError, SemanticError, TaskError};
use crate::eval::{EvalContext, EvaluatedTask, RefError, evaluate};
use crate::parser::parse_trigger;
use crate::process::first_line;

/// The identity of a task: where it lives and its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub path: PathBuf,
    pub name: String,
}

impl TaskEntry {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Build an entry from a path, using its file name. Returns `None` for paths without a UTF-8
    /// file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?.to_string();
        Some(Self { path, name })
    }
}

/// What an id points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdSlot {
    Task(usize),
    /// More than one task declares the id; it stays unusable for the registry's lifetime.
    Duplicate,
}

struct Slot {
    entry: TaskEntry,
    tree: Result<Trigger, TaskError>,
    evaluation: OnceCell<Result<EvaluatedTask, TaskError>>,
}

pub struct Registry {
    env: Environment,
    slots: Vec<Slot>,
    by_path: HashMap<PathBuf, usize>,
    ids: HashMap<String, IdSlot>,
}

impl Registry {
    /// Parse every task and build the id index. Malformed names never abort construction: their
    /// slot keeps the syntax error.
    pub fn new(env: Environment, entries: impl IntoIterator<Item = TaskEntry>) -> Self {
        let mut slots = Vec::new();
        let mut by_path = HashMap::new();
        let mut ids = HashMap::new();

        for entry in entries {
            let idx = slots.len();
            let tree = parse_trigger(&entry.name);

            match &tree {
                Ok(tree) => {
                    for id in tree.declared_ids() {
                        ids.entry(id)
                            .and_modify(|slot| {
                                log::warn!("id declared more than once, last by '{}'", entry.name);
                                *slot = IdSlot::Duplicate;
                            })
                            .or_insert(IdSlot::Task(idx));
                    }
                }
                Err(err) => log::debug!("'{}' does not parse: {err}", entry.name),
            }

            by_path.insert(entry.path.clone(), idx);
            slots.push(Slot {
                entry,
                tree,
                evaluation: OnceCell::new(),
            });
        }

        Self {
            env,
            slots,
            by_path,
            ids,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// All tasks in the order they were given.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskEntry> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    /// The parsed trigger of a task, or the error it failed to parse with.
    pub fn tree(&self, path: &Path) -> Result<&Trigger, TaskError> {
        let idx = self.index_of(path)?;
        self.slots[idx].tree.as_ref().map_err(Clone::clone)
    }

    /// Evaluate a task, reusing the memoized result if there is one.
    pub fn evaluate(&self, path: &Path) -> Result<&EvaluatedTask, TaskError> {
        let idx = self.index_of(path)?;
        self.get_or_create_evaluation(idx, &HashSet::new())
    }

    /// The due date of a task.
    pub fn date(&self, path: &Path) -> Result<NaiveDate, TaskError> {
        self.evaluate(path).map(|evaluated| evaluated.date)
    }

    /// Evaluate every task. Errors are per task and never stop the others.
    pub fn evaluate_all(&self) -> Vec<(&TaskEntry, Result<&EvaluatedTask, TaskError>)> {
        (0..self.slots.len())
            .map(|idx| {
                (
                    &self.slots[idx].entry,
                    self.get_or_create_evaluation(idx, &HashSet::new()),
                )
            })
            .collect()
    }

    /// The name a task should be renamed to once it is done.
    pub fn done_name(&self, path: &Path) -> Result<String, TaskError> {
        let idx = self.index_of(path)?;
        let evaluated = self.get_or_create_evaluation(idx, &HashSet::new())?;
        let tree = self.slots[idx].tree.as_ref().map_err(Clone::clone)?;
        let ctx = TaskContext {
            registry: self,
            idx,
            callers: HashSet::from([idx]),
        };
        synthesize(tree, evaluated, &ctx)
    }

    /// Resolve the date of the task declaring `id`. `callers` holds every task whose evaluation is
    /// in flight on this call chain; reaching one of them again is a cycle.
    pub fn get_by_id(&self, id: &str, callers: &HashSet<usize>) -> Result<NaiveDate, RefError> {
        let target = match self.ids.get(id) {
            Some(IdSlot::Task(target)) => *target,
            Some(IdSlot::Duplicate) => {
                return Err(RefError::Semantic(SemanticError::DuplicateId(id.to_string())));
            }
            None => return Err(RefError::Semantic(SemanticError::IdNotFound(id.to_string()))),
        };

        if callers.contains(&target) {
            log::debug!("cycle through id '{id}'");
            return Err(RefError::Semantic(SemanticError::Cycle(id.to_string())));
        }

        self.get_or_create_evaluation(target, callers)
            .map(|evaluated| evaluated.date)
            .map_err(RefError::Target)
    }

    /// Return the memoized evaluation of the task at `idx` (in the order the tasks were given),
    /// evaluating it first if needed. `callers` carries the in-flight chain into any `ref(...)`.
    pub fn get_or_create_evaluation(
        &self,
        idx: usize,
        callers: &HashSet<usize>,
    ) -> Result<&EvaluatedTask, TaskError> {
        let slot = &self.slots[idx];
        if let Some(done) = slot.evaluation.get() {
            return done.as_ref().map_err(Clone::clone);
        }

        let tree = slot.tree.as_ref().map_err(Clone::clone)?;
        let mut chain = callers.clone();
        chain.insert(idx);
        let ctx = TaskContext {
            registry: self,
            idx,
            callers: chain,
        };
        let result = evaluate(tree, &ctx);
        if let Err(err) = &result {
            log::debug!("'{}' failed: {err}", slot.entry.name);
        }

        // Publish once; the first result stays
        slot.evaluation
            .get_or_init(|| result)
            .as_ref()
            .map_err(Clone::clone)
    }

    fn index_of(&self, path: &Path) -> Result<usize, TaskError> {
        self.by_path.get(path).copied().ok_or_else(|| {
            TaskError::semantic(
                path.display().to_string(),
                SemanticError::UnknownTask(path.display().to_string()),
            )
        })
    }
}

/// The [`EvalContext`] of one task on one call chain.
struct TaskContext<'a> {
    registry: &'a Registry,
    idx: usize,
    callers: HashSet<usize>,
}

impl TaskContext<'_> {
    fn entry(&self) -> &TaskEntry {
        &self.registry.slots[self.idx].entry
    }
}

impl EvalContext for TaskContext<'_> {
    fn now(&self) -> NaiveDate {
        self.registry.env.now
    }

    fn resolve_ref(&self, id: &str) -> Result<NaiveDate, RefError> {
        self.registry.get_by_id(id, &self.callers)
    }

    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError> {
        self.registry.env.fs.find_binary(name)
    }

    fn run_external(&self, argv: &[String]) -> Result<String, ProcessError> {
        let output = self.registry.env.runner.run(argv)?;
        let program = argv.first().map(String::as_str).unwrap_or_default();
        first_line(program, output)
    }

    fn call_builtin(&self, name: &str, args: &[String]) -> Result<NaiveDate, SemanticError> {
        let env = &self.registry.env;
        let ctx = BuiltinContext {
            fs: env.fs.as_ref(),
            filters: env.filters.as_ref(),
            task_dir: self.entry().path.parent().unwrap_or(Path::new("")),
        };
        env.builtins.call(name, &ctx, args)
    }

    fn own_task_lines(&self) -> Result<Vec<String>, FsError> {
        self.registry.env.fs.read_lines(&self.entry().path)
    }

    fn own_symlink_target(&self) -> Result<PathBuf, FsError> {
        self.registry.env.fs.read_link(&self.entry().path)
    }

    fn own_task_path(&self) -> Result<PathBuf, FsError> {
        self.registry.env.fs.native_path(&self.entry().path)
    }
}
