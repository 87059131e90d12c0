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

//! One investigator's review state: the committed batch, the query, the
//! selected facets, and the flag that keeps submissions single-flight.

use std::path::Path;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::aggregate;
use crate::client::Detector;
use crate::error::BatchSubmissionError;
use crate::error::ExportError;
use crate::error::SubmitError;
use crate::export;
use crate::export::ExportReport;
use crate::facets;
use crate::facets::FacetIndex;
use crate::model::ResultBatch;
use crate::model::ResultRecord;
use crate::model::WorkItem;
use crate::plan;
use crate::plan::EvidenceFile;
use crate::significance;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub query: String,
    pub selected_facets: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AnalysisSession {
    processing: AtomicBool,
    current: RwLock<Arc<ResultBatch>>,
    view: RwLock<ViewState>,
}

/// Clears the processing flag when the batch run ends, however it ends.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(batch: ResultBatch) -> Self {
        Self {
            current: RwLock::new(Arc::new(batch)),
            ..Self::default()
        }
    }

    /// Snapshot of the committed batch.
    pub fn current(&self) -> Arc<ResultBatch> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn view(&self) -> ViewState {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self) -> Result<ProcessingGuard<'_>, BatchSubmissionError> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BatchSubmissionError::InFlight)?;
        Ok(ProcessingGuard {
            flag: &self.processing,
        })
    }

    /// Plan and run a batch for the selections.
    pub async fn submit(
        &self,
        detector: &dyn Detector,
        files: &[EvidenceFile],
        categories: &[String],
    ) -> Result<Arc<ResultBatch>, SubmitError> {
        let items = plan::plan(files, categories)?;
        Ok(self.run(detector, &items).await?)
    }

    /// Run `items` and, only if all succeed, make the result the current
    /// batch. A failed run leaves the previous batch in place.
    pub async fn run(
        &self,
        detector: &dyn Detector,
        items: &[WorkItem],
    ) -> Result<Arc<ResultBatch>, BatchSubmissionError> {
        let _guard = self.begin()?;
        let batch = aggregate::run_batch(detector, items).await?;
        Ok(self.commit(batch))
    }

    /// Replace the current batch wholesale. Facet selection is reset since
    /// the facets are derived from the old batch.
    pub fn commit(&self, batch: ResultBatch) -> Arc<ResultBatch> {
        let batch = Arc::new(batch);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = batch.clone();
        self.view
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_facets
            .clear();
        tracing::info!(batch = %batch.id, records = batch.len(), "committed batch");
        batch
    }

    pub fn set_query(&self, query: &str) {
        self.view.write().unwrap_or_else(PoisonError::into_inner).query = query.to_string();
    }

    /// Select a facet if it is not selected yet.
    pub fn select_facet(&self, facet: &str) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        if !view.selected_facets.iter().any(|f| f == facet) {
            view.selected_facets.push(facet.to_string());
        }
    }

    /// Significant records matching the query.
    pub fn significant(&self) -> Vec<ResultRecord> {
        let batch = self.current();
        significance::select(&batch.records, &self.view().query)
    }

    pub fn facets(&self) -> FacetIndex {
        facets::facets(&self.significant())
    }

    /// What the investigator currently sees: significant, query-matched,
    /// narrowed by the selected facets.
    pub fn visible(&self) -> Vec<ResultRecord> {
        let view = self.view();
        facets::narrow(&self.significant(), &view.selected_facets)
    }

    pub fn export(&self, destination: &Path) -> Result<ExportReport, ExportError> {
        export::export_results(&self.visible(), destination)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::aggregate::tests::ScriptedDetector;
    use crate::aggregate::tests::items;
    use crate::error::ValidationError;

    fn record(category: &str, file: &str, result: serde_json::Value) -> ResultRecord {
        ResultRecord {
            file_id: file.to_string(),
            category: category.to_string(),
            result: serde_json::from_value(result).expect("payload"),
            filename: file.to_string(),
            image_data: None,
        }
    }

    #[tokio::test]
    async fn successful_run_replaces_the_batch() {
        let session = AnalysisSession::new();
        assert!(session.current().is_empty());

        let detector = ScriptedDetector::new(None);
        let batch = session
            .run(&detector, &items(&[("a.jpg", "weapons"), ("b.jpg", "weapons")]))
            .await
            .expect("run");
        assert_eq!(batch.len(), 2);
        assert!(Arc::ptr_eq(&batch, &session.current()));
        assert!(session.begin().is_ok());
    }

    #[tokio::test]
    async fn failed_run_keeps_previous_batch() {
        let session = AnalysisSession::new();
        let first = session
            .run(&ScriptedDetector::new(None), &items(&[("old.jpg", "weapons")]))
            .await
            .expect("first run");

        let detector = ScriptedDetector::new(Some(3));
        let work = items(&[
            ("a.jpg", "weapons"),
            ("b.jpg", "weapons"),
            ("c.jpg", "weapons"),
            ("d.jpg", "weapons"),
        ]);
        let err = session.run(&detector, &work).await.unwrap_err();
        assert!(matches!(err, BatchSubmissionError::Request { index: 3, total: 4, .. }));

        let current = session.current();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.records[0].file_id, "old.jpg");
        assert!(session.begin().is_ok());
    }

    #[tokio::test]
    async fn failure_on_first_submission_leaves_empty_batch() {
        let session = AnalysisSession::new();
        let detector = ScriptedDetector::new(Some(1));
        let err = session
            .run(&detector, &items(&[("a.jpg", "weapons")]))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchSubmissionError::Request { .. }));
        assert!(session.current().is_empty());
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() {
        let session = AnalysisSession::new();
        let detector = ScriptedDetector::new(None);
        let files = vec![EvidenceFile::from_path(Path::new("a.jpg"))];

        let err = session.submit(&detector, &files, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::NoCategories)
        ));
        let err = session
            .submit(&detector, &[], &["weapons".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(ValidationError::NoFiles)));
        assert_eq!(detector.call_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_submission_is_refused() {
        let session = AnalysisSession::new();
        let slow = ScriptedDetector::new(None);
        let other = ScriptedDetector::new(None);
        let work = items(&[("a.jpg", "weapons"), ("b.jpg", "weapons")]);

        let (first, second) = tokio::join!(session.run(&slow, &work), session.run(&other, &work));
        assert!(first.is_ok());
        assert!(matches!(second, Err(BatchSubmissionError::InFlight)));
        assert_eq!(other.call_count(), 0);
        assert!(session.begin().is_ok());
    }

    #[test]
    fn view_combines_query_and_facets() {
        let session = AnalysisSession::with_batch(aggregate::seal(vec![
            record(
                "weapons",
                "a.jpg",
                json!({"detections": [{"label": "Gun"}, {"label": "Knife"}]}),
            ),
            record("weapons", "b.jpg", json!({"detections": [{"label": "Gun"}]})),
            record("vehicles", "c.jpg", json!({"detections": []})),
            record("content", "d.txt", json!({"danger_words": ["knife"]})),
        ]));

        assert_eq!(session.significant().len(), 3);
        assert_eq!(session.facets().all.as_slice(), &["Gun".to_string(), "Knife".to_string()][..]);

        session.select_facet("Knife");
        let files: Vec<String> = session.visible().into_iter().map(|r| r.file_id).collect();
        assert_eq!(files, vec!["a.jpg"]);

        session.select_facet("Gun");
        session.select_facet("Gun");
        assert_eq!(
            session.view().selected_facets,
            vec!["Knife".to_string(), "Gun".to_string()]
        );
        let files: Vec<String> = session.visible().into_iter().map(|r| r.file_id).collect();
        assert_eq!(files, vec!["a.jpg"]);

        let fresh = AnalysisSession::with_batch(session.current().as_ref().clone());
        fresh.set_query("gun");
        let files: Vec<String> = fresh.visible().into_iter().map(|r| r.file_id).collect();
        assert_eq!(files, vec!["a.jpg", "b.jpg"]);
        assert_eq!(fresh.facets().all.len(), 2);
    }

    #[tokio::test]
    async fn commit_resets_facet_selection() {
        let session = AnalysisSession::new();
        session.select_facet("Gun");
        session
            .run(&ScriptedDetector::new(None), &items(&[("a.jpg", "weapons")]))
            .await
            .expect("run");
        assert!(session.view().selected_facets.is_empty());
    }

    #[test]
    fn export_writes_visible_records() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let session = AnalysisSession::with_batch(aggregate::seal(vec![
            record("weapons", "a.jpg", json!({"detections": [{"label": "Gun"}]})),
            record("vehicles", "b.jpg", json!({"detections": []})),
        ]));
        let report = session.export(dir.path())?;
        assert_eq!(report.records, 1);
        let text = std::fs::read_to_string(dir.path().join("results/analysis_results.json"))?;
        assert!(text.contains("a.jpg"));
        assert!(!text.contains("b.jpg"));
        Ok(())
    }
}
