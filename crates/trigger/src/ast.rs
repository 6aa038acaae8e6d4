//! Abstract syntax tree for trigger expressions.
//!
//! Every node keeps the byte span it was parsed from so the original text can be copied back
//! verbatim when a done name is synthesized.

use std::ops::Range;

use chrono::{NaiveDate, NaiveTime};

use crate::period::Period;

/// A byte range into the source text of a [`Trigger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// A fully parsed task name: the trigger expression plus the uninterpreted file ending.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// The complete text the trigger was parsed from.
    pub source: String,
    pub root: Node,
    /// Span of everything after the trigger (e.g. ` - call mom.txt`).
    pub file_ending: Span,
}

impl Trigger {
    /// The source text covered by `span`.
    pub fn text(&self, span: Span) -> &str {
        &self.source[span.range()]
    }

    pub fn file_ending(&self) -> &str {
        self.text(self.file_ending)
    }

    /// Whether any node in the tree (arguments included) carries a repeat suffix.
    pub fn has_repeat(&self) -> bool {
        self.root.any(&mut |node| node.suffix().is_some_and(|s| s.repeat.is_some()))
    }

    /// All ids declared through `id(...)` anywhere in the tree.
    pub fn declared_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.root.visit(&mut |node| {
            if let NodeKind::Expr(expr) = &node.kind
                && expr.name == "id"
                && let [arg] = expr.args.as_slice()
            {
                ids.push(arg.literal(&self.source).to_string());
            }
        });
        ids
    }
}

/// Trigger node with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A literal date such as `2020-08-04E1WP1M`.
    Date(DateTrigger),
    /// A call such as `ref(3)` or `bin("next-payday")`.
    Expr(ExprTrigger),
    /// `lhs & rhs`: due once both sides are due.
    And(Box<Node>, Box<Node>),
    /// `lhs + rhs`: due once either side is due.
    Or(Box<Node>, Box<Node>),
    /// `( inner )`.
    Group(Box<Node>),
}

impl Node {
    /// The suffix attached to a date or expression node.
    pub fn suffix(&self) -> Option<&Suffix> {
        match &self.kind {
            NodeKind::Date(date) => Some(&date.suffix),
            NodeKind::Expr(expr) => Some(&expr.suffix),
            _ => None,
        }
    }

    /// Visit this node and every descendant, including nodes nested in arguments.
    pub fn visit(&self, f: &mut dyn FnMut(&Node)) {
        f(self);
        match &self.kind {
            NodeKind::Date(_) => {}
            NodeKind::Expr(expr) => {
                for arg in &expr.args {
                    if let ArgNode::Trigger(node) = arg {
                        node.visit(f);
                    }
                }
            }
            NodeKind::And(lhs, rhs) | NodeKind::Or(lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            NodeKind::Group(inner) => inner.visit(f),
        }
    }

    fn any(&self, predicate: &mut dyn FnMut(&Node) -> bool) -> bool {
        let mut found = false;
        self.visit(&mut |node| found = found || predicate(node));
        found
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateTrigger {
    pub date: NaiveDate,
    /// Span of the date token alone, without any suffix.
    pub date_span: Span,
    pub suffix: Suffix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprTrigger {
    pub name: String,
    pub args: Vec<ArgNode>,
    /// Span from the name through the closing parenthesis.
    pub call_span: Span,
    pub suffix: Suffix,
}

/// The optional annotations that may follow a date or expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Suffix {
    pub time: Option<NaiveTime>,
    /// `E` offset, applied once to the computed date.
    pub effective: Option<Period>,
    /// `#n` priority.
    pub priority: Option<u32>,
    /// `P` annotation.
    pub repeat: Option<Repeat>,
    /// Span of the whole suffix text, possibly empty.
    pub span: Span,
}

/// A repeat annotation (`P`, `P!`, `P1W`, `P!-1M`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Repeat {
    /// Set by `!`. A forced zero period keeps the literal date on completion.
    pub forced: bool,
    pub period: Period,
}

/// An argument of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgNode {
    /// `"text"` or `'text'`, unescaped.
    Quoted { value: String, span: Span },
    /// An unquoted word such as `42` or `report.sh`.
    Bare { value: String, span: Span },
    /// A nested trigger, including argument-only calls like `line(2)` or `args()`.
    Trigger(Node),
}

impl ArgNode {
    pub fn span(&self) -> Span {
        match self {
            ArgNode::Quoted { span, .. } | ArgNode::Bare { span, .. } => *span,
            ArgNode::Trigger(node) => node.span,
        }
    }

    /// The literal text of the argument: the unescaped value for words, the verbatim source text
    /// for nested triggers.
    pub fn literal<'a>(&'a self, source: &'a str) -> &'a str {
        match self {
            ArgNode::Quoted { value, .. } | ArgNode::Bare { value, .. } => value,
            ArgNode::Trigger(node) => &source[node.span.range()],
        }
    }

    /// The literal text if this argument is a quoted or bare word.
    pub fn word(&self) -> Option<&str> {
        match self {
            ArgNode::Quoted { value, .. } | ArgNode::Bare { value, .. } => Some(value),
            ArgNode::Trigger(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_suffix_is_empty() {
        let suffix = Suffix::default();
        assert_eq!(suffix.span, Span::new(0, 0));
        assert!(suffix.span.range().is_empty());
        assert!(suffix.repeat.is_none() && suffix.priority.is_none());
    }
}
