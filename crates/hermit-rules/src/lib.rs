//! Text-level parsers used by qmk-hermit.
//!
//! Everything in this crate works on string contents only. Reading files,
//! walking the keyboard hierarchy and deciding what to do with the results
//! is left to the caller, so both parsers can be tested against literals.

mod layout;
mod map;
mod rules;

pub use layout::{infer_layout_variant, layout_occurrences};
pub use map::{AssignOp, RulesMap};
pub use rules::{logical_lines, parse_assignment, parse_cascade, parse_rules_into, Assignment};
