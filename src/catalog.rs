//! Key-based join over a catalog version tree.
//!
//! A catalog version keeps makes, model families and body-style groups in
//! three sibling collections. Families point at their make and body-style
//! groups point at their model only through `_id` equality, so resolving a
//! legacy (make, model, bodyStyle) triple means filtering the cross product of
//! matching nodes down to the combinations whose links agree.

use std::collections::HashSet;

use crate::domain::{AttributeCode, CanonicalAssignment, ValidatedCandidate, VehicleCatalogVersion};

/// Legacy codes rendered as catalog keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogKeys {
    pub make: String,
    pub model: String,
    pub body_style: String,
}

impl CatalogKeys {
    pub fn new(make: &AttributeCode, model: &AttributeCode, body_style: &AttributeCode) -> Self {
        Self {
            make: make.as_key(),
            model: model.as_key(),
            body_style: body_style.as_key(),
        }
    }
}

impl From<&ValidatedCandidate> for CatalogKeys {
    fn from(candidate: &ValidatedCandidate) -> Self {
        Self::new(&candidate.make, &candidate.model, &candidate.body_style)
    }
}

/// All assignments in `version` satisfying the keys and the make/model linkage.
///
/// Results follow catalog order (make, family, model, group, body style).
/// Identical triples reached through repeated nodes are reported once.
pub fn join(version: &VehicleCatalogVersion, keys: &CatalogKeys) -> Vec<CanonicalAssignment> {
    join_all(std::iter::once(version), keys)
}

/// Joins across every version document sharing a (versionId, year).
pub fn join_all<'a, I>(versions: I, keys: &CatalogKeys) -> Vec<CanonicalAssignment>
where
    I: IntoIterator<Item = &'a VehicleCatalogVersion>,
{
    let mut seen = HashSet::new();
    let mut matches = Vec::new();
    for version in versions {
        walk(version, keys, |assignment| {
            if seen.insert(assignment.clone()) {
                matches.push(assignment);
            }
        });
    }
    matches
}

fn walk<F>(version: &VehicleCatalogVersion, keys: &CatalogKeys, mut emit: F)
where
    F: FnMut(CanonicalAssignment),
{
    for make in version.makes.iter().filter(|m| m.key == keys.make) {
        for family in version.models.iter().filter(|f| f.make_id == make.id) {
            for model in family.models.iter().filter(|m| m.key == keys.model) {
                for group in version.body_styles.iter().filter(|g| g.model_id == model.id) {
                    for body_style in group.body_styles.iter().filter(|b| b.key == keys.body_style) {
                        emit(CanonicalAssignment {
                            make_id: make.id.clone(),
                            model_id: model.id.clone(),
                            body_style_id: body_style.id.clone(),
                        });
                    }
                }
            }
        }
    }
}
