//! Deterministic collapse of duplicate raw facts.
//!
//! Within one filing, facts sharing (concept, period end, dimensions) form
//! an equivalence class. One canonical fact is selected per class: the
//! highest `decimals` precision wins, then the lowest fact id. Classes
//! whose numeric values actually disagree are flagged and surfaced as an
//! error-severity issue, but a canonical fact is still selected so
//! normalization can proceed — the conflict is reported, never silently
//! resolved.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use normalize_core::{
    CanonicalFact, Dimensions, IssueKind, QualityIssue, RawFact, Severity,
};

/// Summary counts from one dedup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Number of equivalence classes (canonical facts).
    pub total_classes: usize,
    /// Classes whose values disagreed beyond tolerance.
    pub conflicted_classes: usize,
    /// Raw facts absorbed into another fact's class.
    pub absorbed_facts: usize,
}

/// The result of deduplicating one filing's facts.
#[derive(Clone, Debug)]
pub struct DedupOutcome {
    /// One canonical fact per equivalence class, in key order.
    pub facts: Vec<CanonicalFact>,
    /// One issue per conflicted class.
    pub issues: Vec<QualityIssue>,
    /// Summary counts, consumed by the quality scorer.
    pub stats: DedupStats,
}

/// Collapses one filing's raw facts into canonical facts.
///
/// Idempotent and deterministic: the same input always selects the same
/// canonical facts and emits the same issues in the same order.
#[must_use]
pub fn dedup_facts(facts: Vec<RawFact>, tolerance: f64) -> DedupOutcome {
    // BTreeMap keeps class iteration (and therefore issue order) stable.
    let mut classes: BTreeMap<(String, NaiveDate, Dimensions), Vec<RawFact>> = BTreeMap::new();
    for fact in facts {
        let key = (
            fact.concept_name.clone(),
            fact.period_end,
            fact.dimensions.clone(),
        );
        classes.entry(key).or_default().push(fact);
    }

    let mut canonical = Vec::with_capacity(classes.len());
    let mut issues = Vec::new();
    let mut stats = DedupStats {
        total_classes: classes.len(),
        ..DedupStats::default()
    };

    for ((concept, period_end, _), mut members) in classes {
        if members.len() == 1 {
            canonical.push(CanonicalFact::single(members.pop().expect("non-empty class")));
            continue;
        }

        stats.absorbed_facts += members.len() - 1;
        let conflicted = has_conflict(&members, tolerance);

        // Highest precision first, then lowest id. Stable across runs.
        members.sort_by(|a, b| {
            b.decimals
                .unwrap_or(i32::MIN)
                .cmp(&a.decimals.unwrap_or(i32::MIN))
                .then(a.fact_id.cmp(&b.fact_id))
        });

        if conflicted {
            stats.conflicted_classes += 1;
            let values: Vec<String> = members
                .iter()
                .filter_map(|f| f.value.map(|v| v.to_string()))
                .collect();
            issues.push(QualityIssue::new(
                Severity::Error,
                IssueKind::ConflictingValues,
                members[0].accession_number.clone(),
                format!(
                    "{} duplicate facts for {concept} at {period_end} carry conflicting values: [{}]; kept fact {}",
                    members.len(),
                    values.join(", "),
                    members[0].fact_id,
                ),
                members.len() as u64,
            ));
        }

        let mut iter = members.into_iter();
        let keeper = iter.next().expect("non-empty class");
        let absorbed = iter.map(|f| f.fact_id).collect();
        canonical.push(CanonicalFact {
            fact: keeper,
            absorbed,
            conflicted,
        });
    }

    if stats.absorbed_facts > 0 {
        debug!(
            classes = stats.total_classes,
            absorbed = stats.absorbed_facts,
            conflicted = stats.conflicted_classes,
            "Deduplicated facts"
        );
    }

    DedupOutcome {
        facts: canonical,
        issues,
        stats,
    }
}

/// True if any two numeric values in the class differ beyond the relative
/// tolerance. Text-only facts never conflict.
fn has_conflict(members: &[RawFact], tolerance: f64) -> bool {
    let values: Vec<f64> = members.iter().filter_map(|f| f.value).collect();
    for (i, a) in values.iter().enumerate() {
        for b in &values[i + 1..] {
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > tolerance * scale {
                return true;
            }
        }
    }
    false
}
