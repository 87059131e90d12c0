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

use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::client::Detector;
use crate::error::BatchSubmissionError;
use crate::model::ResultBatch;
use crate::model::ResultRecord;
use crate::model::WorkItem;

/// Resolve `items` one at a time, in order.
///
/// The returned batch only exists if every item succeeded; on the first
/// failure the records gathered so far are dropped.
pub async fn run_batch(
    detector: &dyn Detector,
    items: &[WorkItem],
) -> Result<ResultBatch, BatchSubmissionError> {
    let total = items.len();
    let mut buffer = Vec::with_capacity(total);
    for (pos, item) in items.iter().enumerate() {
        match detector.detect(item).await {
            Ok(record) => {
                tracing::info!(
                    item = pos + 1,
                    total,
                    file = %item.file_id,
                    category = %item.category,
                    "resolved work item"
                );
                buffer.push(record);
            }
            Err(source) => {
                tracing::warn!(
                    item = pos + 1,
                    total,
                    error = %source,
                    "work item failed; discarding batch"
                );
                return Err(BatchSubmissionError::Request {
                    index: pos + 1,
                    total,
                    source,
                });
            }
        }
    }
    Ok(seal(buffer))
}

/// Stamp a fully resolved record list as a batch.
pub fn seal(records: Vec<ResultRecord>) -> ResultBatch {
    let now = OffsetDateTime::now_utc();
    let committed_at = now.format(&Rfc3339).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(now.unix_timestamp_nanos().to_le_bytes());
    for record in &records {
        hasher.update(record.file_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.category.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    ResultBatch {
        id: format!("batch-{}", hex::encode(&digest[..6])),
        committed_at,
        records,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::DetectionRequestError;
    use crate::error::RequestFailure;

    /// Answers every item with one detection labelled after the file, failing
    /// at a chosen 1-based call.
    pub(crate) struct ScriptedDetector {
        pub fail_at: Option<usize>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedDetector {
        pub fn new(fail_at: Option<usize>) -> Self {
            Self {
                fail_at,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }
    }

    #[async_trait]
    impl Detector for ScriptedDetector {
        async fn detect(&self, item: &WorkItem) -> Result<ResultRecord, DetectionRequestError> {
            let call = {
                let mut calls = self.calls.lock().expect("calls lock");
                calls.push((item.file_id.clone(), item.category.clone()));
                calls.len()
            };
            tokio::task::yield_now().await;
            if self.fail_at == Some(call) {
                return Err(DetectionRequestError::new(
                    item,
                    RequestFailure::Transport("connection reset".to_string()),
                ));
            }
            Ok(ResultRecord {
                file_id: item.file_id.clone(),
                category: item.category.clone(),
                result: serde_json::from_value(json!({
                    "detections": [{"label": item.file_name.clone(), "confidence": 0.9}]
                }))
                .expect("payload"),
                filename: item.file_name.clone(),
                image_data: None,
            })
        }
    }

    pub(crate) fn items(pairs: &[(&str, &str)]) -> Vec<WorkItem> {
        pairs
            .iter()
            .map(|(file, category)| WorkItem {
                file_id: file.to_string(),
                category: category.to_string(),
                path: PathBuf::from(file),
                file_name: file.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn resolves_items_sequentially_in_order() {
        let detector = ScriptedDetector::new(None);
        let work = items(&[("a.jpg", "weapons"), ("a.jpg", "content"), ("b.jpg", "weapons")]);
        let batch = run_batch(&detector, &work).await.expect("batch");

        let got: Vec<(&str, &str)> = batch
            .records
            .iter()
            .map(|r| (r.file_id.as_str(), r.category.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![("a.jpg", "weapons"), ("a.jpg", "content"), ("b.jpg", "weapons")]
        );
        assert!(batch.id.starts_with("batch-"));
        assert!(!batch.committed_at.is_empty());
    }

    #[tokio::test]
    async fn failure_stops_the_run_and_reports_position() {
        let detector = ScriptedDetector::new(Some(2));
        let work = items(&[("a.jpg", "weapons"), ("b.jpg", "weapons"), ("c.jpg", "weapons")]);
        let err = run_batch(&detector, &work).await.unwrap_err();
        match err {
            BatchSubmissionError::Request {
                index,
                total,
                source,
            } => {
                assert_eq!(index, 2);
                assert_eq!(total, 3);
                assert_eq!(source.item.file_id, "b.jpg");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(detector.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_item_list_yields_empty_batch() {
        let detector = ScriptedDetector::new(None);
        let batch = run_batch(&detector, &[]).await.expect("batch");
        assert!(batch.is_empty());
    }
}
