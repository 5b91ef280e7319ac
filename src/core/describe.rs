//! Human-readable deployment descriptions.
//!
//! The description is posted to the monitoring service as the deployment
//! annotation. It names the bugs a changelog fixes, notes a redeploy of the
//! same revision, or falls back to a placeholder line.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use rand::seq::IndexedRandom;
use regex::Regex;

/// Placeholder descriptions for pushes with no bug references.
pub const FALLBACK_DESCRIPTIONS: [&str; 4] = [
    "No bugfixes--must be adding infinite loops.",
    "No bugfixes--must be rot13ing function names for code security.",
    "No bugfixes--must be demonstrating our elite push technology.",
    "No bugfixes--must be testing james.",
];

fn bug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i-u)\bbug\s+([0-9]+)\b").expect("Invalid regex pattern")
    })
}

/// Describe a push from `old_revision` to `new_revision`.
///
/// A new revision that starts with the old one is a redeploy. Otherwise bug
/// numbers found in `changelog` are listed; with none found, a random
/// placeholder is returned.
pub fn describe(old_revision: &str, new_revision: &str, changelog: &str) -> String {
    if new_revision.starts_with(old_revision) {
        return format!("Pushing {} again", new_revision);
    }

    let bugs = extract_bugs(changelog);
    if bugs.is_empty() {
        return random_description().to_string();
    }

    let bugs: Vec<String> = bugs.iter().map(|bug| format!("bug #{}", bug)).collect();
    format!("Fixing: {}", bugs.join(", "))
}

/// Extract bug numbers from `git log --oneline` output.
///
/// Deduplicated and sorted as strings, so "10" comes before "2".
pub fn extract_bugs(changelog: &str) -> Vec<String> {
    let pattern = bug_pattern();
    let bugs: BTreeSet<String> = changelog
        .lines()
        .flat_map(|line| {
            pattern
                .captures_iter(line)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect();

    bugs.into_iter().collect()
}

/// Pick one of the placeholder descriptions uniformly at random.
pub fn random_description() -> &'static str {
    FALLBACK_DESCRIPTIONS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_DESCRIPTIONS[0])
}
