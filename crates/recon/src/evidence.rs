use std::collections::BTreeMap;

use crate::model::{FamilyTag, ShortlistRecord, SourceTag, UnionRecord};
use crate::shortlist::combination;

/// Pairwise overlap counts (`duke&eive` keys) over the configured sources,
/// plus the number of ids present in every one of them.
pub fn overlap_counts(
    union: &[UnionRecord],
    configured: &[SourceTag],
) -> (BTreeMap<String, usize>, usize) {
    let mut pairwise = BTreeMap::new();
    for (i, a) in configured.iter().enumerate() {
        for b in &configured[i + 1..] {
            let n = union
                .iter()
                .filter(|u| u.is_present(*a) && u.is_present(*b))
                .count();
            pairwise.insert(format!("{a}&{b}"), n);
        }
    }

    let all = if configured.is_empty() {
        0
    } else {
        union
            .iter()
            .filter(|u| configured.iter().all(|t| u.is_present(*t)))
            .count()
    };

    (pairwise, all)
}

/// Qualification-combination breakdown over every evaluated record.
pub fn combination_counts(evaluated: &[ShortlistRecord]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for r in evaluated {
        *counts.entry(combination(r)).or_insert(0) += 1;
    }
    counts
}

/// Ids qualifying per family, indexed by `FamilyTag::index`.
pub fn qualifying_counts(evaluated: &[ShortlistRecord]) -> [usize; 3] {
    let mut out = [0; 3];
    for family in FamilyTag::ALL {
        out[family.index()] = evaluated.iter().filter(|r| r.qualifies_via(family)).count();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn union_rec(id: &str, present: &[SourceTag]) -> UnionRecord {
        let mut presence = [false; 5];
        for t in present {
            presence[t.index()] = true;
        }
        UnionRecord {
            canonical_id: id.into(),
            display_name: id.into(),
            sources: present.to_vec(),
            source_count: present.len(),
            presence,
        }
    }

    fn short(id: &str, qualifies: [bool; 3]) -> ShortlistRecord {
        ShortlistRecord {
            canonical_id: id.into(),
            display_name: id.into(),
            counts: qualifies.map(|q| if q { 3 } else { 0 }),
            qualifies,
            shortlist_flag: qualifies.iter().any(|q| *q),
        }
    }

    #[test]
    fn overlaps_over_configured_sources() {
        use SourceTag::*;
        let union = vec![
            union_rec("a", &[Duke, Eive, Mabberly]),
            union_rec("b", &[Duke, Eive]),
            union_rec("c", &[Mabberly]),
        ];
        let (pairs, all) = overlap_counts(&union, &[Duke, Eive, Mabberly]);
        assert_eq!(pairs["duke&eive"], 2);
        assert_eq!(pairs["duke&mabberly"], 1);
        assert_eq!(pairs["eive&mabberly"], 1);
        assert_eq!(pairs.len(), 3);
        assert_eq!(all, 1);
    }

    #[test]
    fn combination_breakdown() {
        let evaluated = vec![
            short("a", [true, true, false]),
            short("b", [false, false, true]),
            short("c", [false, false, false]),
            short("d", [true, true, false]),
        ];
        let combos = combination_counts(&evaluated);
        assert_eq!(combos["eive+try"], 2);
        assert_eq!(combos["aus_only"], 1);
        assert_eq!(combos["none"], 1);
        assert_eq!(qualifying_counts(&evaluated), [2, 2, 1]);
    }
}
