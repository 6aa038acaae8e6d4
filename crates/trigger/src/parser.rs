//! Parser for trigger expressions embedded in task names.
//!
//! This is a recursive descent parser built on nom. It parses the longest trigger at the start of
//! a name; whatever follows is kept as the literal file ending.
//!
//! # Grammar
//!
//! ```text
//! start     → trigger FILE_ENDING
//! trigger   → and ( "+" and )*
//! and       → unit ( "&" unit )*
//! unit      → "(" trigger ")" | date suffix | ID "(" arguments? ")" suffix
//! suffix    → time? effective? priority? repeat?
//! time      → "T" HH ":" MM
//! effective → "E" period
//! priority  → "#" digits
//! repeat    → "P" "!"? period?
//! period    → ("+" | "-")? ( digits ("Y" | "M" | "W" | "D") )+
//! arguments → argument ( "," argument )*
//! argument  → quoted | trigger | bareword
//! date      → YYYY ( "-" MM ( "-" DD )? )?
//! ```
//!
//! Spaces are allowed around `&`, `+`, `,` and inside parentheses. `&` binds tighter than `+`.
//!
//! # Examples
//!
//! ```rust
//! use tickets_trigger::parser::parse_trigger;
//!
//! let trigger = parse_trigger("2020-08-04 & ref(1) - call mom.txt").unwrap();
//! assert_eq!(trigger.file_ending(), " - call mom.txt");
//! ```

use chrono::NaiveTime;
use nom::bytes::complete::{escaped_transform, tag, take_while1};
use nom::character::complete::{char, digit1, none_of, space0};
use nom::combinator::{cut, opt, value};
use nom::sequence::delimited;
use nom::{IResult, Parser};

use crate::ast::{ArgNode, DateTrigger, ExprTrigger, Node, NodeKind, Repeat, Span, Suffix, Trigger};
use crate::error::{ParseErrorInfo, TaskError, parse_error};
use crate::period::{date_literal, fixed_digits, period_literal};

type Res<'a, T> = IResult<&'a str, T, ParseErrorInfo<&'a str>>;

/// Parse a task name into a [`Trigger`].
///
/// # Errors
///
/// Returns [`TaskError::Syntax`] with a 1-based line and column if the name does not start with a
/// valid trigger.
pub fn parse_trigger(text: &str) -> Result<Trigger, TaskError> {
    let parser = TriggerParser { src: text };
    match parser.trigger(text) {
        Ok((rest, root)) => {
            log::debug!("parsed trigger of '{text}'");
            Ok(Trigger {
                source: text.to_string(),
                root,
                file_ending: Span::new(parser.offset(rest), text.len()),
            })
        }
        Err(nom::Err::Error(err) | nom::Err::Failure(err)) => {
            Err(syntax_error(text, parser.offset(err.input), err.message))
        }
        Err(nom::Err::Incomplete(_)) => Err(syntax_error(
            text,
            text.len(),
            "unexpected end of input".to_string(),
        )),
    }
}

/// Convert a byte offset into a 1-based line and column (in characters).
fn syntax_error(text: &str, offset: usize, message: String) -> TaskError {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    TaskError::Syntax {
        text: text.to_string(),
        line,
        column,
        message,
    }
}

/// Holds the complete source so every node can record its span.
struct TriggerParser<'a> {
    src: &'a str,
}

impl<'a> TriggerParser<'a> {
    /// Byte offset of `rest`, which must be a suffix of the source.
    fn offset(&self, rest: &str) -> usize {
        self.src.len() - rest.len()
    }

    fn trigger(&self, input: &'a str) -> Res<'a, Node> {
        let (mut input, mut node) = self.and(input)?;

        loop {
            let Some(after_op) = operator(input, '+') else {
                return Ok((input, node));
            };
            let (after_rhs, rhs) = commit(self.and(after_op))?;
            node = Node {
                span: Span::new(node.span.start, rhs.span.end),
                kind: NodeKind::Or(Box::new(node), Box::new(rhs)),
            };
            input = after_rhs;
        }
    }

    fn and(&self, input: &'a str) -> Res<'a, Node> {
        let (mut input, mut node) = self.unit(input)?;

        loop {
            let Some(after_op) = operator(input, '&') else {
                return Ok((input, node));
            };
            let (after_rhs, rhs) = commit(self.unit(after_op))?;
            node = Node {
                span: Span::new(node.span.start, rhs.span.end),
                kind: NodeKind::And(Box::new(node), Box::new(rhs)),
            };
            input = after_rhs;
        }
    }

    fn unit(&self, input: &'a str) -> Res<'a, Node> {
        let start = self.offset(input);

        if let Some(after_paren) = input.strip_prefix('(') {
            let (rest, _) = space0(after_paren)?;
            let (rest, inner) = commit(self.trigger(rest))?;
            let (rest, _) = space0(rest)?;
            let Some(rest) = rest.strip_prefix(')') else {
                return failure(rest, "expected ')'");
            };
            return Ok((
                rest,
                Node {
                    kind: NodeKind::Group(Box::new(inner)),
                    span: Span::new(start, self.offset(rest)),
                },
            ));
        }

        match input.chars().next() {
            Some(c) if c.is_ascii_digit() => self.date_trigger(input),
            Some(c) if is_ident_start(c) => self.expr_trigger(input),
            _ => Err(nom::Err::Error(parse_error(
                input,
                "expected a date or expression",
            ))),
        }
    }

    fn date_trigger(&self, input: &'a str) -> Res<'a, Node> {
        let start = self.offset(input);
        let (rest, date) = date_literal::<ParseErrorInfo<&str>>(input)
            .map_err(|_| nom::Err::Error(parse_error(input, "expected a date")))?;
        let date_span = Span::new(start, self.offset(rest));
        let (rest, suffix) = self.suffix(rest)?;
        let span = Span::new(start, suffix.span.end);

        Ok((
            rest,
            Node {
                kind: NodeKind::Date(DateTrigger {
                    date,
                    date_span,
                    suffix,
                }),
                span,
            },
        ))
    }

    fn expr_trigger(&self, input: &'a str) -> Res<'a, Node> {
        let start = self.offset(input);
        let (rest, name) = identifier(input)?;
        let Some(after_paren) = rest.strip_prefix('(') else {
            return Err(nom::Err::Error(parse_error(
                rest,
                format!("expected '(' after '{name}'"),
            )));
        };

        let (rest, args) = commit(self.arguments(after_paren))?;
        let call_span = Span::new(start, self.offset(rest));
        let (rest, suffix) = self.suffix(rest)?;
        let span = Span::new(start, suffix.span.end);

        Ok((
            rest,
            Node {
                kind: NodeKind::Expr(ExprTrigger {
                    name,
                    args,
                    call_span,
                    suffix,
                }),
                span,
            },
        ))
    }

    /// Parse the arguments after an opening parenthesis, through the closing one.
    fn arguments(&self, input: &'a str) -> Res<'a, Vec<ArgNode>> {
        let (mut input, _) = space0(input)?;
        let mut args = Vec::new();

        if let Some(rest) = input.strip_prefix(')') {
            return Ok((rest, args));
        }

        loop {
            let (rest, arg) = self.argument(input)?;
            args.push(arg);

            let (rest, _) = space0(rest)?;
            if let Some(rest) = rest.strip_prefix(')') {
                return Ok((rest, args));
            }
            let Some(rest) = rest.strip_prefix(',') else {
                return failure(rest, "expected ',' or ')'");
            };
            let (rest, _) = space0(rest)?;
            input = rest;
        }
    }

    fn argument(&self, input: &'a str) -> Res<'a, ArgNode> {
        let start = self.offset(input);

        if input.starts_with(['"', '\'']) {
            let (rest, value) = commit(string_literal(input))?;
            return Ok((
                rest,
                ArgNode::Quoted {
                    value,
                    span: Span::new(start, self.offset(rest)),
                },
            ));
        }

        // A trigger only counts if the argument ends right after it, otherwise the text is a word
        // that merely starts like one (e.g. `2020x`).
        match self.trigger(input) {
            Ok((rest, node)) if at_argument_end(rest) => return Ok((rest, ArgNode::Trigger(node))),
            Ok(_) | Err(nom::Err::Error(_)) => {}
            Err(err) => return Err(err),
        }

        let (rest, word) = bareword(input)
            .map_err(|_| nom::Err::Failure(parse_error(input, "expected an argument")))?;
        Ok((
            rest,
            ArgNode::Bare {
                value: word.to_string(),
                span: Span::new(start, self.offset(rest)),
            },
        ))
    }

    fn suffix(&self, input: &'a str) -> Res<'a, Suffix> {
        let start = self.offset(input);
        let (input, time) = time_of_day(input)?;
        let (input, effective) = opt((char('E'), period_literal))
            .map(|found| found.map(|(_, period)| period))
            .parse(input)?;
        let (input, priority) = priority(input)?;
        let (input, repeat) = opt((char('P'), opt(char('!')), opt(period_literal)))
            .map(|found| {
                found.map(|(_, forced, period)| Repeat {
                    forced: forced.is_some(),
                    period: period.unwrap_or_default(),
                })
            })
            .parse(input)?;

        Ok((
            input,
            Suffix {
                time,
                effective,
                priority,
                repeat,
                span: Span::new(start, self.offset(input)),
            },
        ))
    }
}

/// Consume an operator with optional surrounding spaces, or return `None` if it isn't next.
fn operator(input: &str, op: char) -> Option<&str> {
    let rest = input.trim_start_matches([' ', '\t']).strip_prefix(op)?;
    Some(rest.trim_start_matches([' ', '\t']))
}

fn at_argument_end(rest: &str) -> bool {
    rest.trim_start_matches([' ', '\t']).starts_with([',', ')'])
}

/// Turn a recoverable error into a hard failure once a construct is unambiguous.
fn commit<T>(result: Res<'_, T>) -> Res<'_, T> {
    result.map_err(|err| match err {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    })
}

fn failure<'a, T>(input: &'a str, message: &str) -> Res<'a, T> {
    Err(nom::Err::Failure(parse_error(input, message)))
}

/// `THH:MM`. Only commits once a `T` is directly followed by a digit.
fn time_of_day(input: &str) -> Res<'_, Option<NaiveTime>> {
    let Some(rest) = input.strip_prefix('T') else {
        return Ok((input, None));
    };
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok((input, None));
    }

    let parsed: Res<'_, (u32, char, u32)> =
        (fixed_digits(2), char(':'), fixed_digits(2)).parse(rest);
    let (after, (hour, _, minute)) = parsed
        .map_err(|_| nom::Err::Failure(parse_error(rest, "expected a time as THH:MM")))?;
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => Ok((after, Some(time))),
        None => failure(rest, "expected a valid time of day"),
    }
}

fn priority(input: &str) -> Res<'_, Option<u32>> {
    let Some(rest) = input.strip_prefix('#') else {
        return Ok((input, None));
    };
    let Ok((after, digits)) = digit1::<_, ParseErrorInfo<&str>>(rest) else {
        return Ok((input, None));
    };
    match digits.parse::<u32>() {
        Ok(priority) => Ok((after, Some(priority))),
        Err(_) => failure(rest, "priority is out of range"),
    }
}

fn bareword(input: &str) -> Res<'_, &str> {
    take_while1(|c: char| !c.is_whitespace() && !matches!(c, ',' | '(' | ')' | '"' | '\''))
        .parse(input)
}

fn string_literal(input: &str) -> Res<'_, String> {
    let quote = if input.starts_with('\'') { '\'' } else { '"' };
    delimited(
        char(quote),
        opt(escape_string(quote)).map(Option::unwrap_or_default),
        cut(char(quote)),
    )
    .parse(input)
    .map_err(|err| match err {
        nom::Err::Failure(_) => nom::Err::Failure(parse_error(input, "unterminated string")),
        other => other,
    })
}

/// Parse the contents of a string literal. `\\` and an escaped quote are the only escapes, since
/// names cannot contain control characters anyway.
fn escape_string<'a>(quote: char) -> impl FnMut(&'a str) -> Res<'a, String> {
    let forbidden_chars = match quote {
        '"' => r#"\""#,
        _ => r"\'",
    };
    let quote_char_str = quote.to_string();

    move |input: &'a str| {
        escaped_transform(
            none_of(forbidden_chars),
            '\\',
            alt_escape(quote_char_str.as_str()),
        )
        .parse(input)
    }
}

fn alt_escape<'a, 'q>(
    quote: &'q str,
) -> impl Parser<&'a str, Output = &'q str, Error = ParseErrorInfo<&'a str>> {
    nom::branch::alt((value(r"\", tag(r"\")), value(quote, tag(quote))))
}

fn identifier(input: &str) -> Res<'_, String> {
    let mut chars = input.char_indices();
    let Some((_, first)) = chars.next() else {
        return Err(nom::Err::Error(parse_error(input, "expected an identifier")));
    };

    if !is_ident_start(first) {
        return Err(nom::Err::Error(parse_error(input, "expected an identifier")));
    }

    let mut end = first.len_utf8();

    for (idx, ch) in chars {
        if is_ident_continue(ch) {
            end = idx + ch.len_utf8();
        } else {
            break;
        }
    }
    Ok((&input[end..], input[..end].to_string()))
}

fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphabetic()
}

fn is_ident_continue(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphanumeric()
}
