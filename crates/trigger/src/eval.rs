//! Evaluation of a parsed [`Trigger`] into a due date.
//!
//! The tree is walked once, post-order. Cross-task references, helper programs, builtins and the
//! task's own file are all reached through [`EvalContext`], so the evaluator itself is pure.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::ast::{ArgNode, ExprTrigger, Node, NodeKind, Suffix, Trigger};
use crate::error::{FsError, ProcessError, SemanticError, TaskError};
use crate::period::{Period, format_date, parse_date_text};

/// Everything the evaluator needs from outside the tree.
pub trait EvalContext {
    /// The current date.
    fn now(&self) -> NaiveDate;

    /// Resolve the date of the task declaring `id`.
    fn resolve_ref(&self, id: &str) -> Result<NaiveDate, RefError>;

    /// Locate a helper program by name.
    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError>;

    /// Run a helper program and return its single line of output.
    fn run_external(&self, argv: &[String]) -> Result<String, ProcessError>;

    /// Call an in-process builtin with already evaluated arguments.
    fn call_builtin(&self, name: &str, args: &[String]) -> Result<NaiveDate, SemanticError>;

    fn own_task_lines(&self) -> Result<Vec<String>, FsError>;

    fn own_symlink_target(&self) -> Result<PathBuf, FsError>;

    fn own_task_path(&self) -> Result<PathBuf, FsError>;
}

/// Why a `ref(...)` could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RefError {
    /// The reference itself is bad: unknown or duplicate id, or a cycle.
    Semantic(SemanticError),
    /// The referenced task failed; this is its stored error.
    Target(TaskError),
}

/// An evaluated argument of `bin(...)` or `builtin(...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    String(String),
    /// `arg()`: the repeat period as one token, e.g. `"1 months"`.
    Keyword,
    /// `args()`: the repeat period as separate tokens, e.g. `"1" "months"`.
    Keywords,
}

impl Arg {
    /// Expand arguments into an argv. Placeholders are dropped when no period is given.
    pub fn expand(args: &[Arg], period: Option<&Period>) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len());
        for arg in args {
            match (arg, period) {
                (Arg::String(value), _) => argv.push(value.clone()),
                (Arg::Keyword, Some(period)) => argv.push(period.keyword_text()),
                (Arg::Keywords, Some(period)) => argv.extend(period.keywords()),
                (Arg::Keyword | Arg::Keywords, None) => {}
            }
        }
        argv
    }
}

/// The result of evaluating one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedTask {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub file_ending: String,
    pub is_repeating: bool,
    pub is_waiting: bool,
    pub priority: Option<u32>,
    pub uses_expression: bool,
    pub uses_operators: bool,
    pub uses_reference: bool,
    /// Whether a periodic done-rename is permitted at all.
    pub can_repeat: bool,
    /// Resolved arguments of every `bin`/`builtin` call, keyed by the call's start offset.
    #[serde(skip)]
    pub args: HashMap<usize, Vec<Arg>>,
}

/// Where a node sits in the tree. Several flags only count at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Root,
    Operand,
    Argument,
}

impl Position {
    fn operand(self) -> Position {
        match self {
            Position::Argument => Position::Argument,
            _ => Position::Operand,
        }
    }
}

/// Evaluate `tree` to a due date and its flags.
pub fn evaluate(tree: &Trigger, ctx: &dyn EvalContext) -> Result<EvaluatedTask, TaskError> {
    let mut evaluator = Evaluator {
        tree,
        ctx,
        task: EvaluatedTask {
            date: NaiveDate::MIN,
            time: None,
            file_ending: tree.file_ending().to_string(),
            is_repeating: false,
            is_waiting: false,
            priority: None,
            uses_expression: false,
            uses_operators: false,
            uses_reference: false,
            can_repeat: tree.declared_ids().is_empty(),
            args: HashMap::new(),
        },
    };
    evaluator.task.date = evaluator.node(&tree.root, Position::Root)?;
    log::debug!("'{}' is due {}", tree.source, evaluator.task.date);
    Ok(evaluator.task)
}

struct Evaluator<'a> {
    tree: &'a Trigger,
    ctx: &'a dyn EvalContext,
    task: EvaluatedTask,
}

impl Evaluator<'_> {
    fn node(&mut self, node: &Node, pos: Position) -> Result<NaiveDate, TaskError> {
        match &node.kind {
            NodeKind::Date(date) => Ok(self.apply_suffix(&date.suffix, date.date, pos)),
            NodeKind::Expr(expr) => {
                self.task.uses_expression = true;
                let date = self.expression(node, expr, pos)?;
                Ok(self.apply_suffix(&expr.suffix, date, pos))
            }
            // Due once both sides are due, so the later date wins
            NodeKind::And(lhs, rhs) => {
                self.note_operator(pos);
                let lhs = self.node(lhs, pos.operand())?;
                let rhs = self.node(rhs, pos.operand())?;
                Ok(lhs.max(rhs))
            }
            NodeKind::Or(lhs, rhs) => {
                self.note_operator(pos);
                let lhs = self.node(lhs, pos.operand())?;
                let rhs = self.node(rhs, pos.operand())?;
                Ok(lhs.min(rhs))
            }
            NodeKind::Group(inner) => self.node(inner, pos),
        }
    }

    fn note_operator(&mut self, pos: Position) {
        if pos != Position::Argument {
            self.task.uses_operators = true;
        }
    }

    /// Record the suffix flags and apply the effective offset.
    fn apply_suffix(&mut self, suffix: &Suffix, date: NaiveDate, pos: Position) -> NaiveDate {
        if pos != Position::Argument {
            if suffix.repeat.is_some() {
                self.task.is_repeating = true;
            }
            // A later priority or time silently replaces an earlier one
            if suffix.priority.is_some() {
                self.task.priority = suffix.priority;
            }
            if suffix.time.is_some() {
                self.task.time = suffix.time;
            }
        }
        suffix
            .effective
            .map_or(date, |effective| effective.add_to(date))
    }

    fn expression(
        &mut self,
        node: &Node,
        expr: &ExprTrigger,
        pos: Position,
    ) -> Result<NaiveDate, TaskError> {
        match expr.name.as_str() {
            "now" => {
                self.expect_args(node, expr, 0)?;
                Ok(self.ctx.now())
            }
            "id" => {
                self.expect_args(node, expr, 1)?;
                Ok(NaiveDate::MIN)
            }
            "ref" => {
                self.expect_args(node, expr, 1)?;
                self.task.uses_reference = true;
                let id = expr.args[0].literal(&self.tree.source);
                self.ctx.resolve_ref(id).map_err(|err| match err {
                    RefError::Semantic(err) => self.semantic(node, err),
                    RefError::Target(err) => err,
                })
            }
            "waiting" => {
                self.expect_args(node, expr, 0)?;
                if pos == Position::Root {
                    self.task.is_waiting = true;
                }
                Ok(NaiveDate::MAX)
            }
            "bin" => self.bin(node, expr),
            "builtin" => self.builtin(node, expr),
            name => Err(self.semantic(node, SemanticError::IllegalExpression(name.to_string()))),
        }
    }

    fn bin(&mut self, node: &Node, expr: &ExprTrigger) -> Result<NaiveDate, TaskError> {
        let name = self.leading_word(node, expr)?;
        let binary = self
            .ctx
            .find_binary(name)
            .map_err(|err| self.semantic(node, err.into()))?;

        let mut args = vec![Arg::String(binary.to_string_lossy().into_owned())];
        for arg in &expr.args[1..] {
            args.push(self.argument(arg)?);
        }

        let line = self
            .ctx
            .run_external(&Arg::expand(&args, None))
            .map_err(|err| self.process(node, err))?;
        let date = parse_date_text(&line).ok_or_else(|| {
            self.process(
                node,
                ProcessError::InvalidDate {
                    program: name.to_string(),
                    line: line.clone(),
                },
            )
        })?;

        self.task.args.insert(expr.call_span.start, args);
        Ok(date)
    }

    fn builtin(&mut self, node: &Node, expr: &ExprTrigger) -> Result<NaiveDate, TaskError> {
        let name = self.leading_word(node, expr)?;

        let mut args = Vec::with_capacity(expr.args.len() - 1);
        let mut values = Vec::with_capacity(expr.args.len() - 1);
        for arg in &expr.args[1..] {
            match self.argument(arg)? {
                Arg::String(value) => {
                    values.push(value.clone());
                    args.push(Arg::String(value));
                }
                _ => {
                    let placeholder = self.tree.text(arg.span()).to_string();
                    return Err(self.semantic(node, SemanticError::MisplacedPlaceholder(placeholder)));
                }
            }
        }

        let date = self
            .ctx
            .call_builtin(name, &values)
            .map_err(|err| self.semantic(node, err))?;
        self.task.args.insert(expr.call_span.start, args);
        Ok(date)
    }

    /// The first argument of `bin`/`builtin`, which names what to call.
    fn leading_word<'e>(&self, node: &Node, expr: &'e ExprTrigger) -> Result<&'e str, TaskError> {
        let Some(first) = expr.args.first() else {
            return Err(self.semantic(
                node,
                SemanticError::ArgumentCount {
                    name: expr.name.clone(),
                    expected: "at least 1".to_string(),
                    found: 0,
                },
            ));
        };
        first.word().ok_or_else(|| {
            self.semantic(
                node,
                SemanticError::ExpectedLiteral {
                    name: expr.name.clone(),
                    index: 0,
                },
            )
        })
    }

    /// Evaluate one argument using the argument-position dispatch table.
    fn argument(&mut self, arg: &ArgNode) -> Result<Arg, TaskError> {
        let node = match arg {
            ArgNode::Quoted { value, .. } | ArgNode::Bare { value, .. } => {
                return Ok(Arg::String(value.clone()));
            }
            ArgNode::Trigger(node) => node,
        };

        if let NodeKind::Expr(expr) = &node.kind {
            match expr.name.as_str() {
                "arg" => {
                    self.expect_args(node, expr, 0)?;
                    return Ok(Arg::Keyword);
                }
                "args" => {
                    self.expect_args(node, expr, 0)?;
                    return Ok(Arg::Keywords);
                }
                "line" => {
                    self.expect_args(node, expr, 1)?;
                    return self.line(node, &expr.args[0]).map(Arg::String);
                }
                "target" => {
                    self.expect_args(node, expr, 0)?;
                    let target = self
                        .ctx
                        .own_symlink_target()
                        .map_err(|err| self.semantic(node, err.into()))?;
                    return Ok(Arg::String(target.to_string_lossy().into_owned()));
                }
                "task" => {
                    self.expect_args(node, expr, 0)?;
                    let path = self
                        .ctx
                        .own_task_path()
                        .map_err(|err| self.semantic(node, err.into()))?;
                    return Ok(Arg::String(path.to_string_lossy().into_owned()));
                }
                _ => {}
            }
        }

        let date = self.node(node, Position::Argument)?;
        Ok(Arg::String(format_date(date)))
    }

    /// `line(n)`: the 1-indexed line of the task's own content.
    fn line(&self, node: &Node, arg: &ArgNode) -> Result<String, TaskError> {
        let requested = arg.literal(&self.tree.source);
        let lines = self
            .ctx
            .own_task_lines()
            .map_err(|err| self.semantic(node, err.into()))?;

        requested
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| lines.get(idx))
            .cloned()
            .ok_or_else(|| {
                self.semantic(
                    node,
                    SemanticError::LineOutOfRange {
                        line: requested.to_string(),
                        count: lines.len(),
                    },
                )
            })
    }

    fn expect_args(&self, node: &Node, expr: &ExprTrigger, expected: usize) -> Result<(), TaskError> {
        if expr.args.len() == expected {
            return Ok(());
        }
        Err(self.semantic(
            node,
            SemanticError::ArgumentCount {
                name: expr.name.clone(),
                expected: expected.to_string(),
                found: expr.args.len(),
            },
        ))
    }

    fn semantic(&self, node: &Node, error: SemanticError) -> TaskError {
        TaskError::semantic(self.tree.text(node.span), error)
    }

    fn process(&self, node: &Node, error: ProcessError) -> TaskError {
        TaskError::process(self.tree.text(node.span), error)
    }
}
