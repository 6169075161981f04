//! Layout family inference from keymap source text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex_lite::Regex;

fn layout_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"LAYOUT_(\w+)\s*\(").expect("layout pattern is valid"))
}

/// Every `LAYOUT_<variant>(` call site in `text`, in order of appearance.
pub fn layout_occurrences(text: &str) -> Vec<&str> {
    layout_call_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Guess the layout family implemented by a set of source files.
///
/// A keymap may call more than one layout macro, so the variant with the most
/// call sites across all texts wins. Ties go to the variant seen first.
/// Returns `None` when no call site exists.
pub fn infer_layout_variant<I, S>(texts: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    // variant -> (count, first seen)
    let mut tally: HashMap<String, (usize, usize)> = HashMap::new();
    let mut seen = 0usize;

    for text in texts {
        for variant in layout_occurrences(text.as_ref()) {
            let entry = tally.entry(variant.to_string()).or_insert((0, seen));
            entry.0 += 1;
            seen += 1;
        }
    }

    tally
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(variant, _)| variant)
}
