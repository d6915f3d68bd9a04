//! Query-side identifier normalization.
//!
//! Service and partner identifiers were historically written either as plain
//! strings or as native ObjectIds, and both shapes survive in the store.
//! Every filter that touches an id field goes through these helpers so a
//! lookup matches regardless of which shape a given document carries.

use crate::models::RecordId;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use std::collections::HashSet;

/// All storage shapes a raw identifier may appear under.
///
/// Always includes the input string; when the input parses as an ObjectId,
/// the native form and the lowercase hex spelling are added too. Malformed
/// input never fails, it just matches fewer shapes.
pub fn id_candidates(raw: &str) -> Vec<Bson> {
    let mut candidates = vec![Bson::String(raw.to_string())];
    if let Ok(oid) = ObjectId::parse_str(raw) {
        let hex = oid.to_hex();
        if hex != raw {
            candidates.push(Bson::String(hex));
        }
        candidates.push(Bson::ObjectId(oid));
    }
    candidates
}

/// Equality filter on `field` that matches either storage shape of `raw`.
pub fn id_filter(field: &str, raw: &str) -> Document {
    doc! { field: { "$in": id_candidates(raw) } }
}

/// Membership filter on `field` covering every shape of every id in `raws`.
pub fn ids_filter<I, S>(field: &str, raws: I) -> Document
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let all: Vec<Bson> = raws
        .into_iter()
        .flat_map(|raw| id_candidates(raw.as_ref()))
        .collect();
    doc! { field: { "$in": all } }
}

/// True when two raw identifiers refer to the same record.
pub fn forms_match(a: &str, b: &str) -> bool {
    RecordId::canonicalize(a) == RecordId::canonicalize(b)
}

/// Drop duplicate ids by canonical form, keeping first-seen order.
pub fn dedup_ids(ids: &[RecordId]) -> Vec<RecordId> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.canonical()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "64b7a1f0c2d3e4f5a6b7c8d9";

    #[test]
    fn hex_input_yields_string_and_oid_candidates() {
        let candidates = id_candidates(HEX);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], Bson::String(HEX.to_string()));
        assert_eq!(
            candidates[1],
            Bson::ObjectId(ObjectId::parse_str(HEX).unwrap())
        );
    }

    #[test]
    fn uppercase_hex_adds_canonical_spelling() {
        let upper = HEX.to_uppercase();
        let candidates = id_candidates(&upper);
        assert_eq!(candidates.len(), 3);
        assert!(candidates.contains(&Bson::String(upper)));
        assert!(candidates.contains(&Bson::String(HEX.to_string())));
    }

    #[test]
    fn legacy_string_yields_single_candidate() {
        let candidates = id_candidates("partner-42");
        assert_eq!(candidates, vec![Bson::String("partner-42".to_string())]);
    }

    #[test]
    fn ids_filter_collects_all_shapes() {
        let filter = ids_filter("service_ids", [HEX, "legacy-1"]);
        let shapes = filter
            .get_document("service_ids")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(shapes.len(), 3);
    }

    #[test]
    fn forms_match_bridges_representations() {
        assert!(forms_match(HEX, &HEX.to_uppercase()));
        assert!(forms_match("legacy-1", "legacy-1"));
        assert!(!forms_match(HEX, "legacy-1"));
    }

    #[test]
    fn dedup_collapses_mixed_forms() {
        let ids = vec![
            RecordId::Plain(HEX.to_string()),
            RecordId::from(HEX),
            RecordId::Plain("legacy-1".to_string()),
        ];
        let deduped = dedup_ids(&ids);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].canonical(), HEX);
        assert_eq!(deduped[1].canonical(), "legacy-1");
    }
}
