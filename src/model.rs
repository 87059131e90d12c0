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

//! Shared domain types used across planning, detection, filtering, and export.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;

/// One (file, category) unit of submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub file_id: String,
    pub category: String,
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Region {
    /// Display name of the region: the description, else the raw label.
    pub fn name(&self) -> Option<&str> {
        self.description.as_deref().or(self.label.as_deref())
    }
}

/// Category-shaped payload returned by the detection service.
///
/// Every field is optional; which ones are present decides how a record is
/// read downstream. Fields outside the recognized set, and recognized fields
/// whose value has an unexpected type, are kept in `extra` so they survive
/// storage and export unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Detection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<Asset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<Region>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danger_words: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suicidal_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suicidal_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nudity_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DetectionResult {
    /// Read a detector object without ever failing.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        Self {
            detections: take_field(&mut map, "detections"),
            assets: take_field(&mut map, "assets"),
            regions: take_field(&mut map, "regions"),
            danger_words: take_field(&mut map, "danger_words"),
            suicidal_label: take_field(&mut map, "suicidal_label"),
            suicidal_score: take_field(&mut map, "suicidal_score"),
            nudity_detected: take_field(&mut map, "nudity_detected"),
            highlighted_text: take_field(&mut map, "highlighted_text"),
            detected_text: take_field(&mut map, "detected_text"),
            extra: map,
        }
    }

    pub fn detection_labels(&self) -> impl Iterator<Item = &str> {
        self.detections
            .iter()
            .flatten()
            .filter_map(|d| d.label.as_deref())
    }
}

impl<'de> Deserialize<'de> for DetectionResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Self::from_map)
    }
}

/// Move `key` out of `map` if it parses as `T`; otherwise leave it there.
fn take_field<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let parsed = T::deserialize(map.get(key)?).ok()?;
    map.remove(key);
    Some(parsed)
}

/// The detector's payload, the error message it sent back, or a payload of
/// some other JSON shape that is kept verbatim but never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordPayload {
    Detection(DetectionResult),
    Error(String),
    Raw(Value),
}

impl RecordPayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => RecordPayload::Detection(DetectionResult::from_map(map)),
            Value::String(message) => RecordPayload::Error(message),
            other => RecordPayload::Raw(other),
        }
    }

    pub fn detection(&self) -> Option<&DetectionResult> {
        match self {
            RecordPayload::Detection(result) => Some(result),
            RecordPayload::Error(_) | RecordPayload::Raw(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RecordPayload::Error(message) => Some(message),
            RecordPayload::Detection(_) | RecordPayload::Raw(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for RecordPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub file_id: String,
    pub category: String,
    pub result: RecordPayload,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl ResultRecord {
    /// Name used for display and search; falls back to the file id.
    pub fn display_name(&self) -> &str {
        if self.filename.is_empty() {
            &self.file_id
        } else {
            &self.filename
        }
    }

    pub fn detection(&self) -> Option<&DetectionResult> {
        self.result.detection()
    }
}

/// Records of one submission, committed as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultBatch {
    pub id: String,
    pub committed_at: String,
    pub records: Vec<ResultRecord>,
}

impl ResultBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
