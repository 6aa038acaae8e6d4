//! Synthesis of the name a task is renamed to once it is done.
//!
//! Only the parts that change are regenerated: a repeating date token becomes `now + period` and a
//! repeating `bin(...)` call is replaced by the helper's fresh output. Everything else, including
//! operators, spacing and suffixes, is copied byte for byte from the original name.

use crate::ast::{Node, NodeKind, Repeat, Span, Trigger};
use crate::error::{SemanticError, TaskError};
use crate::eval::{Arg, EvalContext, EvaluatedTask};
use crate::period::format_date;

/// Build the done name of `tree`, given its evaluation.
///
/// A tree without any repeat annotation keeps its name unchanged.
pub fn synthesize(
    tree: &Trigger,
    evaluated: &EvaluatedTask,
    ctx: &dyn EvalContext,
) -> Result<String, TaskError> {
    if !tree.has_repeat() {
        return Ok(tree.source.clone());
    }
    if !evaluated.can_repeat {
        return Err(TaskError::semantic(&tree.source, SemanticError::CannotRepeat));
    }

    let mut synthesizer = Synthesizer {
        tree,
        evaluated,
        ctx,
        out: String::with_capacity(tree.source.len()),
    };
    synthesizer.node(&tree.root)?;
    synthesizer.out.push_str(tree.file_ending());

    log::debug!("done name of '{}' is '{}'", tree.source, synthesizer.out);
    Ok(synthesizer.out)
}

struct Synthesizer<'a> {
    tree: &'a Trigger,
    evaluated: &'a EvaluatedTask,
    ctx: &'a dyn EvalContext,
    out: String,
}

impl Synthesizer<'_> {
    fn node(&mut self, node: &Node) -> Result<(), TaskError> {
        let (tree, evaluated) = (self.tree, self.evaluated);
        match &node.kind {
            NodeKind::Date(date) => match &date.suffix.repeat {
                Some(repeat) if self.rerender(repeat) => {
                    let next = repeat.period.add_to(self.ctx.now());
                    self.out.push_str(&format_date(next));
                    self.copy(Span::new(date.date_span.end, node.span.end));
                }
                _ => self.copy(node.span),
            },
            NodeKind::Expr(expr) if expr.name == "bin" => match &expr.suffix.repeat {
                Some(repeat) => match evaluated.args.get(&expr.call_span.start) {
                    Some(args) => {
                        let argv = Arg::expand(args, Some(&repeat.period));
                        let line = self.ctx.run_external(&argv).map_err(|err| {
                            TaskError::process(tree.text(node.span), err)
                        })?;
                        self.out.push_str(&line);
                        self.copy(Span::new(expr.call_span.end, node.span.end));
                    }
                    None => {
                        log::warn!(
                            "no recorded arguments for '{}', keeping it as is",
                            tree.text(node.span)
                        );
                        self.copy(node.span);
                    }
                },
                None => self.copy(node.span),
            },
            NodeKind::Expr(_) => self.copy(node.span),
            NodeKind::And(lhs, rhs) | NodeKind::Or(lhs, rhs) => {
                self.node(lhs)?;
                self.copy(Span::new(lhs.span.end, rhs.span.start));
                self.node(rhs)?;
            }
            NodeKind::Group(inner) => {
                self.copy(Span::new(node.span.start, inner.span.start));
                self.node(inner)?;
                self.copy(Span::new(inner.span.end, node.span.end));
            }
        }
        Ok(())
    }

    /// Whether a repeating date token gets a fresh date. It keeps its text when an operator
    /// expression is still not due, or when a forced repeat has no period.
    fn rerender(&self, repeat: &Repeat) -> bool {
        let pending = self.evaluated.uses_operators && self.evaluated.date > self.ctx.now();
        let pinned = repeat.forced && repeat.period.is_zero();
        !pending && !pinned
    }

    fn copy(&mut self, span: Span) {
        self.out.push_str(self.tree.text(span));
    }
}
