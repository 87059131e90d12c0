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

//! Per-category significance rules and the free-text query.

use crate::model::DetectionResult;
use crate::model::ResultRecord;

pub const SUICIDAL_LABEL: &str = "suicidal";
pub const SUICIDAL_SCORE_THRESHOLD: f64 = 0.65;

/// How a category's payload is read. Chosen once per record by
/// [`CategoryRule::for_category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRule {
    /// Extracted text with self-harm scoring and flagged words.
    Content,
    /// Object detector output. `faceted` is false for people, whose labels
    /// are not offered as facets.
    Detections { faceted: bool },
    /// Valuable-object detector output.
    Assets,
    /// Explicit-content detector output.
    Explicit,
    Unrecognized,
}

/// Category names the detection service understands, with a short note.
pub const KNOWN_CATEGORIES: &[(&str, &str)] = &[
    ("weapons", "Guns, knives, dangerous objects"),
    ("object", "Handbags, wallets, watches, suitcases"),
    ("content", "Sensitive text and self-harm signals"),
    ("vehicles", "Cars, motorcycles, buses, trucks, boats, plates"),
    ("people", "Faces, gatherings"),
    ("technology", "TVs, laptops, keyboards, phones"),
    ("appearance", "Explicit content (nudity flag)"),
    ("obscenity", "Explicit content (regions)"),
];

impl CategoryRule {
    pub fn for_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "content" => CategoryRule::Content,
            "weapons" | "vehicles" | "technology" => CategoryRule::Detections { faceted: true },
            "people" => CategoryRule::Detections { faceted: false },
            "object" => CategoryRule::Assets,
            "appearance" | "obscenity" => CategoryRule::Explicit,
            _ => CategoryRule::Unrecognized,
        }
    }

    pub fn is_significant(self, result: &DetectionResult) -> bool {
        match self {
            CategoryRule::Content => {
                let suicidal = result.suicidal_label.as_deref() == Some(SUICIDAL_LABEL)
                    && result
                        .suicidal_score
                        .is_some_and(|score| score > SUICIDAL_SCORE_THRESHOLD);
                suicidal || non_empty(&result.danger_words)
            }
            CategoryRule::Detections { .. } => non_empty(&result.detections),
            CategoryRule::Assets => non_empty(&result.assets),
            CategoryRule::Explicit => {
                result.nudity_detected == Some(true) || non_empty(&result.regions)
            }
            CategoryRule::Unrecognized => false,
        }
    }

    /// Facet values in payload order; duplicates are left to the caller.
    pub fn facet_values(self, result: &DetectionResult) -> Vec<String> {
        match self {
            CategoryRule::Detections { faceted: true } => {
                result.detection_labels().map(str::to_string).collect()
            }
            CategoryRule::Assets => result
                .assets
                .iter()
                .flatten()
                .filter_map(|asset| asset.class.clone())
                .collect(),
            CategoryRule::Explicit => result
                .regions
                .iter()
                .flatten()
                .filter_map(|region| region.name().map(str::to_string))
                .collect(),
            CategoryRule::Content
            | CategoryRule::Detections { faceted: false }
            | CategoryRule::Unrecognized => Vec::new(),
        }
    }

    pub fn participates_in_facets(self) -> bool {
        matches!(
            self,
            CategoryRule::Detections { faceted: true } | CategoryRule::Assets | CategoryRule::Explicit
        )
    }
}

fn non_empty<T>(items: &Option<Vec<T>>) -> bool {
    items.as_ref().is_some_and(|items| !items.is_empty())
}

pub fn is_significant(record: &ResultRecord) -> bool {
    match record.detection() {
        Some(result) => CategoryRule::for_category(&record.category).is_significant(result),
        None => false,
    }
}

/// Case-insensitive substring match over category, name, detection labels,
/// and extracted text. An empty query matches everything.
pub fn matches_query(record: &ResultRecord, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    let hit = |text: &str| text.to_lowercase().contains(&needle);

    if hit(record.category.as_str()) || hit(record.display_name()) {
        return true;
    }
    let Some(result) = record.detection() else {
        return false;
    };
    result.detection_labels().any(hit)
        || result.highlighted_text.as_deref().is_some_and(hit)
        || result.detected_text.as_deref().is_some_and(hit)
}

/// Significant records of `records` that match `query`, in input order.
pub fn select(records: &[ResultRecord], query: &str) -> Vec<ResultRecord> {
    records
        .iter()
        .filter(|record| is_significant(record) && matches_query(record, query))
        .cloned()
        .collect()
}
