//! Keyword section matching.
//!
//! Pure scoring over a settings snapshot: no I/O, deterministic for a fixed
//! section list and submission.

use crate::settings::Section;

/// The winning section for a submission, with its score for logging.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub section: &'a Section,
    pub score: f64,
    pub keyword_hits: usize,
}

/// Select the best-matching enabled section for a submission.
///
/// The haystack is the lowercased subject and message joined with a
/// newline. Score is keyword substring hits plus `priority * 0.01` as a
/// tie-break boost; a section needs at least one keyword hit to be
/// eligible, so priority alone never wins. Strictly-greater comparison
/// keeps the first-evaluated section on ties, which makes the result
/// deterministic for a fixed section order.
pub fn best_match<'a>(sections: &'a [Section], subject: &str, message: &str) -> Option<RuleMatch<'a>> {
    let haystack = format!("{subject}\n{message}").to_lowercase();

    let mut best: Option<RuleMatch<'a>> = None;
    for section in sections {
        if !section.enabled {
            continue;
        }
        let hits = section
            .keywords
            .iter()
            .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
            .count();
        if hits == 0 {
            continue;
        }
        let score = hits as f64 + f64::from(section.priority) * 0.01;
        if best.map_or(true, |b| score > b.score) {
            best = Some(RuleMatch {
                section,
                score,
                keyword_hits: hits,
            });
        }
    }
    best
}
