//! Aggregate coverage computation
//!
//! A parent's coverage is the mean of its relations' coverage values,
//! weighted by each relation's section length. Overlapping sections are
//! not deduplicated by character range: each relation contributes its
//! full section weight. The unmatched-section marker weighs in at the
//! marker string's own length, so an explicit "no matching section"
//! claim still dilutes the average.

use crate::models::MappingRelation;

/// Rounds to one decimal place, the display precision for coverage.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Full-precision weighted coverage in `[0.0, 1.0]` for a parent's
/// relations. An empty relation set is defined as 0.0, not NaN.
pub fn weighted_coverage<'a, I>(relations: I) -> f64
where
    I: IntoIterator<Item = &'a MappingRelation>,
{
    let mut total_len = 0usize;
    let mut acc = 0.0f64;
    let weighted: Vec<(usize, u32)> = relations
        .into_iter()
        .map(|r| (r.section_len(), r.coverage))
        .collect();

    for (len, _) in &weighted {
        total_len += len;
    }
    if total_len == 0 {
        return 0.0;
    }
    for (len, coverage) in &weighted {
        acc += (*len as f64 / total_len as f64) * (f64::from(*coverage) / 100.0);
    }
    acc
}

/// Aggregate coverage percentage for a parent, rounded to one decimal
/// for display. Further aggregation (library rollup) consumes these
/// already-rounded values, not the raw relations.
pub fn aggregate_coverage<'a, I>(relations: I) -> f64
where
    I: IntoIterator<Item = &'a MappingRelation>,
{
    round1(weighted_coverage(relations) * 100.0)
}

/// Library-level rollup: a plain unweighted mean of each API's
/// already-rounded aggregate coverage.
pub fn library_coverage(api_aggregates: &[f64]) -> f64 {
    if api_aggregates.is_empty() {
        return 0.0;
    }
    round1(api_aggregates.iter().sum::<f64>() / api_aggregates.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        MappingRelation, ParentKind, ParentRef, WorkItemKind, WorkItemRef, UNMATCHED_SECTION,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn relation(id: u32, section: &str, offset: usize, coverage: u32) -> MappingRelation {
        MappingRelation {
            relation_id: id,
            parent: ParentRef {
                kind: ParentKind::Api,
                id: 1,
            },
            child: WorkItemRef {
                kind: WorkItemKind::Requirement,
                id: id,
            },
            section: section.to_string(),
            offset,
            coverage,
            created_at: Utc::now(),
            created_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_zero_relations_is_zero_not_nan() {
        let empty: Vec<MappingRelation> = Vec::new();
        assert_eq!(aggregate_coverage(&empty), 0.0);
        assert_eq!(weighted_coverage(&empty), 0.0);
    }

    #[test]
    fn test_single_full_coverage_relation_is_one_hundred() {
        let text = "The component shall validate every input frame.";
        let rels = vec![relation(1, text, 0, 100)];
        assert_eq!(aggregate_coverage(&rels), 100.0);
    }

    #[test]
    fn test_equal_halves_average_to_fifty() {
        // Two disjoint equal-length halves at 100 and 0 percent.
        let rels = vec![relation(1, "aaaaaaaaaa", 0, 100), relation(2, "bbbbbbbbbb", 10, 0)];
        assert_eq!(aggregate_coverage(&rels), 50.0);
    }

    #[test]
    fn test_weighted_mean_end_to_end_scenario() {
        // 100-char text: [0,40) fully covered, [40,100) half covered.
        let first = "a".repeat(40);
        let second = "b".repeat(60);
        let rels = vec![relation(1, &first, 0, 100), relation(2, &second, 40, 50)];
        assert!((weighted_coverage(&rels) - 0.70).abs() < 1e-12);
        assert_eq!(aggregate_coverage(&rels), 70.0);
    }

    #[test]
    fn test_coverage_stays_within_bounds() {
        let cases = vec![
            vec![relation(1, "abc", 0, 0)],
            vec![relation(1, "abc", 0, 100), relation(2, "defgh", 3, 100)],
            vec![relation(1, "a", 0, 37), relation(2, "bb", 1, 99), relation(3, "c", 3, 1)],
        ];
        for rels in cases {
            let agg = aggregate_coverage(&rels);
            assert!((0.0..=100.0).contains(&agg), "{} out of bounds", agg);
        }
    }

    #[test]
    fn test_overlapping_sections_are_not_deduplicated() {
        // Both relations claim the same ten characters. The weighted mean
        // treats them as independent weights: (10*1.0 + 10*0.0) / 20.
        let rels = vec![relation(1, "same chars", 0, 100), relation(2, "same chars", 0, 0)];
        assert_eq!(aggregate_coverage(&rels), 50.0);
    }

    #[test]
    fn test_unmatched_section_dilutes_the_average() {
        let text = "a".repeat(UNMATCHED_SECTION.chars().count());
        let rels = vec![
            relation(1, &text, 0, 100),
            relation(2, UNMATCHED_SECTION, 0, 0),
        ];
        // Marker weighs the same as the real section of equal length.
        assert_eq!(aggregate_coverage(&rels), 50.0);
    }

    #[test]
    fn test_library_rollup_is_unweighted_mean_of_rounded_inputs() {
        assert_eq!(library_coverage(&[70.0, 50.0]), 60.0);
        assert_eq!(library_coverage(&[100.0]), 100.0);
        assert_eq!(library_coverage(&[]), 0.0);
        // 33.3 and 66.7 were each rounded upstream; the rollup averages
        // the rounded values as-is.
        assert_eq!(library_coverage(&[33.3, 66.7]), 50.0);
    }
}
