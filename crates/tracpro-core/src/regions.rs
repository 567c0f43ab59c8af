//! Region hierarchy collaborator and pollrun coverage predicates.
//!
//! Regions form a tree per org. The repository layer loads the (id, parent)
//! edges; [`RegionTree`] answers the ancestor/descendant/family queries that
//! pollrun coverage and response scoping need.

use std::collections::{HashMap, HashSet};

use crate::polls::PollRunType;

/// In-memory region hierarchy for one org.
#[derive(Debug, Default, Clone)]
pub struct RegionTree {
    parents: HashMap<i64, Option<i64>>,
    children: HashMap<i64, Vec<i64>>,
}

impl RegionTree {
    /// Builds a tree from (region id, parent id) edges. A missing or `None`
    /// parent marks a root.
    #[must_use]
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (i64, Option<i64>)>,
    {
        let mut tree = RegionTree::default();
        for (id, parent) in edges {
            tree.parents.insert(id, parent);
            if let Some(parent) = parent {
                tree.children.entry(parent).or_default().push(id);
            }
        }
        tree
    }

    /// Strict ancestors of `id`, nearest first.
    #[must_use]
    pub fn ancestors(&self, id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut current = id;
        while let Some(&Some(parent)) = self.parents.get(&current) {
            // Guard against a malformed cycle in stored data.
            if out.contains(&parent) || parent == id {
                break;
            }
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Strict descendants of `id` (the whole subtree below it).
    #[must_use]
    pub fn descendants(&self, id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(kids) = self.children.get(&next) {
                for &kid in kids {
                    out.push(kid);
                    stack.push(kid);
                }
            }
        }
        out
    }

    /// `id` plus all of its descendants.
    #[must_use]
    pub fn descendants_inclusive(&self, id: i64) -> Vec<i64> {
        let mut out = vec![id];
        out.extend(self.descendants(id));
        out
    }

    /// Ancestors, `id` itself, and descendants.
    #[must_use]
    pub fn family(&self, id: i64) -> Vec<i64> {
        let mut out = self.ancestors(id);
        out.push(id);
        out.extend(self.descendants(id));
        out
    }
}

/// Whether a pollrun covers the given region.
///
/// An absent filter region, or an exact region match, short-circuits to
/// covered before any hierarchy traversal. Universal and spoofed pollruns
/// cover everything; regional pollruns cover only ancestors of their region
/// (when sub-regions are included); propagated pollruns cover the full
/// family, or only strict descendants when sub-regions are excluded.
#[must_use]
pub fn covers_region(
    pollrun_type: PollRunType,
    pollrun_region: Option<i64>,
    region: Option<i64>,
    include_subregions: bool,
    tree: &RegionTree,
) -> bool {
    let Some(region) = region else {
        return true;
    };
    if pollrun_region == Some(region) {
        return true;
    }

    match pollrun_type {
        PollRunType::Universal | PollRunType::Spoofed => true,
        PollRunType::Regional => {
            let Some(own) = pollrun_region else {
                return false;
            };
            include_subregions && tree.ancestors(own).contains(&region)
        }
        PollRunType::Propagated => {
            let Some(own) = pollrun_region else {
                return false;
            };
            if include_subregions {
                tree.family(own).contains(&region)
            } else {
                tree.descendants(own).contains(&region)
            }
        }
    }
}

/// Whether a pollrun shows up in region-filtered pollrun listings.
///
/// This is the listing-side counterpart of [`covers_region`]: a pollrun is
/// visible from `region` if it targeted that region, targeted no region at
/// all, propagated down from an ancestor, or (when sub-regions are included)
/// targeted any descendant.
#[must_use]
pub fn visible_from_region(
    pollrun_type: PollRunType,
    pollrun_region: Option<i64>,
    region: Option<i64>,
    include_subregions: bool,
    tree: &RegionTree,
) -> bool {
    let Some(region) = region else {
        return true;
    };
    let Some(own) = pollrun_region else {
        return true;
    };
    if own == region {
        return true;
    }
    if pollrun_type == PollRunType::Propagated && tree.ancestors(region).contains(&own) {
        return true;
    }
    include_subregions && tree.descendants(region).contains(&own)
}

/// Resolves the contact-region scope for a response query: the filter
/// region plus its descendants when sub-regions are included.
#[must_use]
pub fn response_region_scope(
    region: Option<i64>,
    include_subregions: bool,
    tree: &RegionTree,
) -> Option<HashSet<i64>> {
    region.map(|r| {
        if include_subregions {
            tree.descendants_inclusive(r).into_iter().collect()
        } else {
            HashSet::from([r])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 → {2, 3}; 2 → {4}; 5 is a separate root.
    fn tree() -> RegionTree {
        RegionTree::from_edges(vec![
            (1, None),
            (2, Some(1)),
            (3, Some(1)),
            (4, Some(2)),
            (5, None),
        ])
    }

    #[test]
    fn ancestors_are_nearest_first() {
        assert_eq!(tree().ancestors(4), vec![2, 1]);
        assert!(tree().ancestors(1).is_empty());
    }

    #[test]
    fn descendants_cover_the_subtree() {
        let mut d = tree().descendants(1);
        d.sort_unstable();
        assert_eq!(d, vec![2, 3, 4]);
        assert!(tree().descendants(5).is_empty());
    }

    #[test]
    fn family_includes_both_directions() {
        let mut f = tree().family(2);
        f.sort_unstable();
        assert_eq!(f, vec![1, 2, 4]);
    }

    #[test]
    fn universal_covers_everything() {
        let t = tree();
        for ty in [PollRunType::Universal, PollRunType::Spoofed] {
            assert!(covers_region(ty, None, Some(3), true, &t));
            assert!(covers_region(ty, None, Some(5), false, &t));
        }
    }

    #[test]
    fn no_filter_region_always_covers() {
        let t = tree();
        assert!(covers_region(PollRunType::Regional, Some(4), None, false, &t));
    }

    #[test]
    fn exact_region_short_circuits() {
        let t = tree();
        assert!(covers_region(PollRunType::Regional, Some(4), Some(4), false, &t));
    }

    #[test]
    fn regional_covers_ancestors_only_with_subregions() {
        let t = tree();
        // Pollrun in 4; visible when asking about ancestor 1 with subregions.
        assert!(covers_region(PollRunType::Regional, Some(4), Some(1), true, &t));
        assert!(!covers_region(PollRunType::Regional, Some(4), Some(1), false, &t));
        assert!(!covers_region(PollRunType::Regional, Some(4), Some(3), true, &t));
    }

    #[test]
    fn propagated_covers_family_with_subregions() {
        let t = tree();
        // Pollrun propagated from 2: family is {1, 2, 4}.
        assert!(covers_region(PollRunType::Propagated, Some(2), Some(4), true, &t));
        assert!(covers_region(PollRunType::Propagated, Some(2), Some(1), true, &t));
        assert!(!covers_region(PollRunType::Propagated, Some(2), Some(5), true, &t));
    }

    #[test]
    fn propagated_without_subregions_covers_strict_descendants_only() {
        let t = tree();
        assert!(covers_region(PollRunType::Propagated, Some(2), Some(4), false, &t));
        assert!(!covers_region(PollRunType::Propagated, Some(2), Some(1), false, &t));
    }

    #[test]
    fn visibility_includes_propagated_ancestors() {
        let t = tree();
        // A pollrun propagated from 1 is visible from descendant 4.
        assert!(visible_from_region(PollRunType::Propagated, Some(1), Some(4), false, &t));
        // A regional pollrun in 1 is not.
        assert!(!visible_from_region(PollRunType::Regional, Some(1), Some(4), false, &t));
        // Sub-region pollruns only appear when requested.
        assert!(visible_from_region(PollRunType::Regional, Some(4), Some(1), true, &t));
        assert!(!visible_from_region(PollRunType::Regional, Some(4), Some(1), false, &t));
        // Region-less pollruns always appear.
        assert!(visible_from_region(PollRunType::Universal, None, Some(4), false, &t));
    }

    #[test]
    fn response_scope_resolution() {
        let t = tree();
        assert_eq!(response_region_scope(None, true, &t), None);

        let scope = response_region_scope(Some(2), true, &t).unwrap();
        assert_eq!(scope, HashSet::from([2, 4]));

        let scope = response_region_scope(Some(2), false, &t).unwrap();
        assert_eq!(scope, HashSet::from([2]));
    }
}
