use crate::similarity::display_value;
use record_dedup_service::dto::{DetectionResult, DuplicateEntry, DuplicateGroup, Record};
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const KEY_DELIMITER: &str = "|";

/// Content key used by the merges: every non id-like field as
/// `field:value`, sorted by field name and joined with `|`.
pub fn canonical_key(record: &Record) -> String {
    let mut pairs: Vec<(&String, &Value)> = record
        .iter()
        .filter(|(field, _)| !field.to_lowercase().contains("id"))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(field, value)| format!("{}:{}", field, display_value(value)))
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

/// Full record serialized with its fields sorted by name, so independently
/// built records with the same content compare equal.
pub fn structural_key(record: &Record) -> String {
    let sorted: BTreeMap<&String, &Value> = record.iter().collect();
    let object: Map<String, Value> = sorted
        .into_iter()
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    Value::Object(object).to_string()
}

/// Records in first-seen order, at most one per canonical key.
#[derive(Default)]
struct UniqueRecords {
    seen: FxHashSet<String>,
    records: Vec<Record>,
}

impl UniqueRecords {
    fn add(&mut self, record: &Record) -> bool {
        if self.seen.insert(canonical_key(record)) {
            self.records.push(record.clone());
            true
        } else {
            false
        }
    }

    fn add_above(&mut self, duplicates: &[DuplicateEntry], threshold: f64) {
        for dup in duplicates.iter().filter(|d| d.similarity.value() >= threshold) {
            self.add(&dup.record);
        }
    }
}

fn is_selected(selected: Option<&[u64]>, group: &DuplicateGroup) -> bool {
    selected.map_or(true, |ids| ids.contains(&group.group_id))
}

///
/// Merge restricted to the selected groups.
///
/// A selected group contributes its original and every duplicate at or above
/// `merge_threshold`, each only when its canonical key is new. Unselected
/// groups contribute nothing. `None` selects every group.
///
pub fn selective_merge(
    result: &DetectionResult,
    selected: Option<&[u64]>,
    merge_threshold: f64,
) -> Vec<Record> {
    let mut merged = UniqueRecords::default();
    for group in result.duplicate_groups.iter().filter(|g| is_selected(selected, g)) {
        merged.add(&group.original);
        merged.add_above(&group.duplicates, merge_threshold);
    }
    merged.records
}

///
/// Merge used for exports in the source format.
///
/// Every group keeps its original. Selected groups also keep duplicates at or
/// above `merge_threshold`, highest similarity first, while unselected groups
/// drop all of their duplicates. `None` selects every group.
///
pub fn export_merge(
    result: &DetectionResult,
    selected: Option<&[u64]>,
    merge_threshold: f64,
) -> Vec<Record> {
    let mut merged = UniqueRecords::default();
    for group in &result.duplicate_groups {
        merged.add(&group.original);
        if is_selected(selected, group) {
            let mut duplicates = group.duplicates.clone();
            duplicates.sort_by(|a, b| b.similarity.value().total_cmp(&a.similarity.value()));
            merged.add_above(&duplicates, merge_threshold);
        }
    }
    merged.records
}

fn group_records<'a>(
    groups: impl IntoIterator<Item = &'a DuplicateGroup>,
) -> impl Iterator<Item = &'a Record> {
    groups.into_iter().flat_map(|group| {
        std::iter::once(&group.original).chain(group.duplicates.iter().map(|d| &d.record))
    })
}

/// Every record of every group, originals followed by their duplicates.
pub fn collect_group_records(groups: &[DuplicateGroup]) -> Vec<Record> {
    group_records(groups).cloned().collect()
}

#[derive(Debug)]
pub struct IgnoreOutcome {
    /// Active groups with the ignored ones removed
    pub groups: Vec<DuplicateGroup>,
    /// Distinct records across the ignored groups
    pub ignored_count: usize,
    /// Groups that were actually found and removed
    pub ignored_groups: usize,
}

/// Removes the selected groups from the active set. Ids with no matching
/// group are skipped.
pub fn ignore_groups(result: &DetectionResult, selected: &[u64]) -> IgnoreOutcome {
    for id in selected {
        if !result.duplicate_groups.iter().any(|g| g.group_id == *id) {
            debug!(group_id = id, "ignoring unknown group");
        }
    }
    let (ignored, groups): (Vec<&DuplicateGroup>, Vec<&DuplicateGroup>) = result
        .duplicate_groups
        .iter()
        .partition(|g| selected.contains(&g.group_id));
    let distinct: FxHashSet<String> = group_records(ignored.iter().copied())
        .map(structural_key)
        .collect();
    IgnoreOutcome {
        groups: groups.into_iter().cloned().collect(),
        ignored_count: distinct.len(),
        ignored_groups: ignored.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::find_duplicates;
    use record_dedup_service::dto::Similarity;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn detected(rows: Vec<Value>, threshold: f64) -> DetectionResult {
        let records: Vec<Record> = rows.into_iter().map(record).collect();
        let groups = find_duplicates(&records, threshold);
        DetectionResult::new(records.len(), groups, "json")
    }

    fn people() -> DetectionResult {
        detected(
            vec![
                json!({ "id": 1, "name": "Alice", "age": 30 }),
                json!({ "id": 2, "name": "Alice", "age": 30 }),
                json!({ "id": 3, "name": "Bob", "age": 40 }),
            ],
            70.0,
        )
    }

    fn group(group_id: u64, original: Value, duplicates: Vec<(Value, f64)>) -> DuplicateGroup {
        DuplicateGroup {
            group_id,
            original: record(original),
            duplicates: duplicates
                .into_iter()
                .enumerate()
                .map(|(i, (r, score))| DuplicateEntry {
                    record: record(r),
                    similarity: Similarity::new(score),
                    source_index: i + 1,
                })
                .collect(),
        }
    }

    fn two_groups() -> DetectionResult {
        DetectionResult::new(
            6,
            vec![
                group(
                    1,
                    json!({ "id": 1, "name": "Ann", "city": "Oslo" }),
                    vec![
                        (json!({ "id": 2, "name": "Anne", "city": "Oslo" }), 85.0),
                        (json!({ "id": 3, "name": "Anna", "city": "Olso" }), 72.5),
                    ],
                ),
                group(
                    2,
                    json!({ "id": 4, "name": "Bob", "city": "Lima" }),
                    vec![
                        (json!({ "id": 5, "name": "Bobby", "city": "Lima" }), 90.0),
                        (json!({ "id": 6, "name": "Bob", "city": "Lima" }), 80.0),
                    ],
                ),
            ],
            "csv",
        )
    }

    #[test]
    fn canonical_key_skips_id_fields_and_sorts() {
        let r = record(json!({ "userId": 9, "name": "Alice", "age": 30, "ID": "x" }));
        assert_eq!(canonical_key(&r), "age:30|name:Alice");
        assert_eq!(canonical_key(&record(json!({ "id": 1 }))), "");
    }

    #[test]
    fn structural_key_ignores_field_order() {
        let a = record(json!({ "id": 1, "name": "Alice" }));
        let b = record(json!({ "name": "Alice", "id": 1 }));
        assert_eq!(structural_key(&a), structural_key(&b));
        assert_ne!(structural_key(&a), structural_key(&record(json!({ "id": 2, "name": "Alice" }))));
    }

    #[test]
    fn merging_alice_group_collapses_to_one_record() {
        let merged = selective_merge(&people(), Some(&[1]), 70.0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["id"], json!(1));
    }

    #[test]
    fn selective_merge_skips_unselected_groups() {
        let merged = selective_merge(&two_groups(), Some(&[2]), 70.0);
        let ids: Vec<&Value> = merged.iter().map(|r| &r["id"]).collect();
        // id 6 shares its key with the original
        assert_eq!(ids, vec![&json!(4), &json!(5)]);
    }

    #[test]
    fn selective_merge_without_selection_takes_every_group() {
        let merged = selective_merge(&two_groups(), None, 70.0);
        let ids: Vec<&Value> = merged.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3), &json!(4), &json!(5)]);
    }

    #[test]
    fn selective_merge_keys_are_unique() {
        let merged = selective_merge(&two_groups(), None, 0.0);
        let keys: FxHashSet<String> = merged.iter().map(canonical_key).collect();
        assert_eq!(keys.len(), merged.len());
    }

    #[test]
    fn export_merge_keeps_unselected_originals() {
        let merged = export_merge(&two_groups(), Some(&[1]), 80.0);
        let ids: Vec<&Value> = merged.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(4)]);
    }

    #[test]
    fn export_merge_orders_duplicates_by_similarity() {
        let mut result = two_groups();
        result.duplicate_groups[0].duplicates.reverse();
        let merged = export_merge(&result, None, 0.0);
        let ids: Vec<&Value> = merged.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3), &json!(4), &json!(5)]);
    }

    #[test]
    fn merges_never_touch_the_detection_result() {
        let result = two_groups();
        let before = serde_json::to_value(&result).unwrap();
        selective_merge(&result, None, 0.0);
        export_merge(&result, Some(&[2]), 0.0);
        ignore_groups(&result, &[1]);
        assert_eq!(serde_json::to_value(&result).unwrap(), before);
    }

    #[test]
    fn ignoring_alice_group_empties_active_set() {
        let outcome = ignore_groups(&people(), &[1]);
        assert_eq!(outcome.groups.len(), 0);
        assert_eq!(outcome.ignored_count, 2);
        assert_eq!(outcome.ignored_groups, 1);
    }

    #[test]
    fn ignoring_unknown_group_is_a_no_op() {
        let result = two_groups();
        let outcome = ignore_groups(&result, &[42]);
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.ignored_count, 0);
        assert_eq!(outcome.ignored_groups, 0);

        let outcome = ignore_groups(&result, &[2, 42, 2]);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].group_id, 1);
    }

    #[test]
    fn ignored_count_deduplicates_structurally() {
        let result = DetectionResult::new(
            3,
            vec![group(
                1,
                json!({ "name": "Ann", "age": 3 }),
                vec![
                    (json!({ "age": 3, "name": "Ann" }), 100.0),
                    (json!({ "name": "Anne", "age": 3 }), 90.0),
                ],
            )],
            "json",
        );
        assert_eq!(ignore_groups(&result, &[1]).ignored_count, 2);
    }

    #[test]
    fn collects_every_group_record() {
        let records = collect_group_records(&two_groups().duplicate_groups);
        let ids: Vec<&Value> = records.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3), &json!(4), &json!(5), &json!(6)]);
    }
}
