//! `rules.mk` cascade parser.
//!
//! Only variable assignments are understood. Conditionals, includes, recipe
//! lines and anything else make would accept are skipped without complaint,
//! since keyboard rules files routinely mix them in.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::map::{AssignOp, RulesMap};

/// One parsed `NAME op value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub op: AssignOp,
    pub value: String,
}

fn assignment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // (?s) so values joined from continuation lines keep their newlines
        Regex::new(r"(?s)^(\w+)\s*(:=|\+=|\?=|=)\s*(.+)$").expect("assignment pattern is valid")
    })
}

/// Drop everything from the first `#` not preceded by a backslash.
///
/// `\#` is unescaped to a literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                chars.next();
                out.push('#');
            }
            '#' => break,
            _ => out.push(c),
        }
    }
    out
}

/// Split file contents into logical lines.
///
/// Comments are stripped and trailing whitespace removed first. A line that
/// then ends in `\` continues onto the next physical line; the backslash is
/// dropped and the pieces are joined with `\n`.
pub fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;

    for raw in text.lines() {
        let stripped = strip_comment(raw);
        let stripped = stripped.trim_end();
        let (body, continues) = match stripped.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (stripped, false),
        };

        let joined = match pending.take() {
            Some(mut acc) => {
                acc.push('\n');
                acc.push_str(body);
                acc
            }
            None => body.to_string(),
        };

        if continues {
            pending = Some(joined);
        } else {
            lines.push(joined);
        }
    }

    // continuation on the last line of the file
    if let Some(acc) = pending {
        lines.push(acc);
    }

    lines
}

/// Parse a logical line as an assignment, or `None` for anything else.
pub fn parse_assignment(line: &str) -> Option<Assignment> {
    let caps = assignment_regex().captures(line)?;
    let op = AssignOp::from_token(caps.get(2)?.as_str())?;
    Some(Assignment {
        name: caps.get(1)?.as_str().to_string(),
        op,
        value: caps.get(3)?.as_str().to_string(),
    })
}

/// Fold one file's contents into a running map.
pub fn parse_rules_into(map: &mut RulesMap, text: &str) {
    for line in logical_lines(text) {
        if let Some(assignment) = parse_assignment(&line) {
            map.apply(&assignment.name, assignment.op, &assignment.value);
        }
    }
}

/// Resolve a whole cascade, most general file first.
pub fn parse_cascade<S: AsRef<str>>(contents: &[S]) -> RulesMap {
    let mut map = RulesMap::new();
    for text in contents {
        parse_rules_into(&mut map, text.as_ref());
    }
    map
}
