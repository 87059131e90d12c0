// Copyright 2026 Evidex Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Subcategory facets over significant records.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::ResultRecord;
use crate::significance::CategoryRule;

/// Ordered set of strings: first insertion wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FacetSet {
    values: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl FacetSet {
    pub fn insert(&mut self, value: &str) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        self.seen.insert(value.to_string());
        self.values.push(value.to_string());
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.seen.contains(value)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetFamily {
    pub category: String,
    pub values: FacetSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FacetIndex {
    pub families: Vec<FacetFamily>,
    /// Union of every family, in first-seen order.
    pub all: FacetSet,
}

impl FacetIndex {
    pub fn family(&self, category: &str) -> Option<&FacetSet> {
        self.families
            .iter()
            .find(|family| family.category == category)
            .map(|family| &family.values)
    }

    /// The index reduced to one category's family.
    pub fn restrict(&self, category: &str) -> FacetIndex {
        let mut only = FacetIndex::default();
        if let Some(values) = self.family(category) {
            for value in values.as_slice() {
                only.all.insert(value);
            }
            only.families.push(FacetFamily {
                category: category.to_string(),
                values: values.clone(),
            });
        }
        only
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

fn record_facets(record: &ResultRecord) -> Vec<String> {
    match record.detection() {
        Some(result) => CategoryRule::for_category(&record.category).facet_values(result),
        None => Vec::new(),
    }
}

/// Derive facets from scratch for `records`.
pub fn facets(records: &[ResultRecord]) -> FacetIndex {
    let mut index = FacetIndex::default();
    for record in records {
        let values = record_facets(record);
        if values.is_empty() {
            continue;
        }
        let pos = match index
            .families
            .iter()
            .position(|family| family.category == record.category)
        {
            Some(pos) => pos,
            None => {
                index.families.push(FacetFamily {
                    category: record.category.clone(),
                    values: FacetSet::default(),
                });
                index.families.len() - 1
            }
        };
        for value in &values {
            index.families[pos].values.insert(value);
            index.all.insert(value);
        }
    }
    index
}

/// Keep records whose facets cover every selected facet.
///
/// An empty selection keeps everything. Records from categories without
/// facets never survive a non-empty selection.
pub fn narrow(records: &[ResultRecord], selected: &[String]) -> Vec<ResultRecord> {
    if selected.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|record| {
            let own = record_facets(record);
            !own.is_empty() && selected.iter().all(|facet| own.contains(facet))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(category: &str, file: &str, result: serde_json::Value) -> ResultRecord {
        ResultRecord {
            file_id: file.to_string(),
            category: category.to_string(),
            result: serde_json::from_value(result).expect("payload"),
            filename: file.to_string(),
            image_data: None,
        }
    }

    fn sel(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn sample() -> Vec<ResultRecord> {
        vec![
            record(
                "weapons",
                "a.jpg",
                json!({"detections": [{"label": "Gun"}, {"label": "Knife"}]}),
            ),
            record("weapons", "b.jpg", json!({"detections": [{"label": "Gun"}]})),
            record("object", "c.jpg", json!({"assets": [{"class": "watch"}, {"class": "Gun"}]})),
            record(
                "obscenity",
                "d.jpg",
                json!({"regions": [{"description": "Exposed feet", "label": "EXPOSED_FEET"}]}),
            ),
            record("content", "e.txt", json!({"danger_words": ["knife"]})),
            record("people", "f.jpg", json!({"detections": [{"label": "person"}]})),
        ]
    }

    #[test]
    fn facets_are_deduplicated_in_first_seen_order() {
        let index = facets(&sample());
        assert_eq!(
            index.all.as_slice(),
            &sel(&["Gun", "Knife", "watch", "Exposed feet"])[..]
        );
        assert_eq!(
            index.family("weapons").map(FacetSet::as_slice),
            Some(&sel(&["Gun", "Knife"])[..])
        );
        assert_eq!(
            index.family("object").map(FacetSet::as_slice),
            Some(&sel(&["watch", "Gun"])[..])
        );
        assert!(index.family("people").is_none());
        assert!(index.family("content").is_none());
    }

    #[test]
    fn restrict_keeps_one_family() {
        let index = facets(&sample()).restrict("object");
        assert_eq!(index.families.len(), 1);
        assert_eq!(index.all.as_slice(), &sel(&["watch", "Gun"])[..]);
        assert_eq!(index.all.len(), 2);
        assert!(index.all.contains("watch"));
        assert!(!index.all.contains("Knife"));

        assert!(facets(&sample()).restrict("people").is_empty());
    }

    #[test]
    fn narrowing_by_knife_keeps_only_knife_records() {
        let records = sample();
        let narrowed = narrow(&records, &sel(&["Knife"]));
        let files: Vec<&str> = narrowed.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(files, vec!["a.jpg"]);
    }

    #[test]
    fn empty_selection_is_identity() {
        let records = sample();
        assert_eq!(narrow(&records, &[]), records);
    }

    #[test]
    fn unfaceted_categories_drop_out_once_a_facet_is_selected() {
        let records = sample();
        let narrowed = narrow(&records, &sel(&["Gun"]));
        assert!(narrowed.iter().all(|r| r.category != "content" && r.category != "people"));
        let files: Vec<&str> = narrowed.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(files, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn adding_a_facet_never_grows_the_result() {
        let records = sample();
        let order = ["Gun", "Knife", "watch", "Exposed feet", "absent"];
        let mut selected = Vec::new();
        let mut previous = narrow(&records, &selected).len();
        for facet in order {
            selected.push(facet.to_string());
            let size = narrow(&records, &selected).len();
            assert!(size <= previous, "{selected:?}");
            previous = size;
        }
    }

    #[test]
    fn recomputation_is_deterministic() {
        let records = sample();
        assert_eq!(facets(&records), facets(&records));
    }
}
