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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::WorkItem;

/// Selections that cannot start a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no evidence files selected")]
    NoFiles,
    #[error("no detection categories selected")]
    NoCategories,
}

#[derive(Debug, Error)]
pub enum RequestFailure {
    /// Local file could not be read for upload.
    #[error("read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Connect, timeout, or body transfer failure.
    #[error("transport: {0}")]
    Transport(String),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One work item's call to the detection service failed.
#[derive(Debug, Error)]
#[error("detection of {} as '{}' failed: {failure}", .item.file_id, .item.category)]
pub struct DetectionRequestError {
    pub item: WorkItem,
    #[source]
    pub failure: RequestFailure,
}

impl DetectionRequestError {
    pub fn new(item: &WorkItem, failure: RequestFailure) -> Self {
        Self {
            item: item.clone(),
            failure,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchSubmissionError {
    #[error("a batch is already in flight")]
    InFlight,
    #[error("work item {index} of {total} failed; batch discarded: {source}")]
    Request {
        index: usize,
        total: usize,
        #[source]
        source: DetectionRequestError,
    },
}

/// Failure anywhere between picking files and committing a batch.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Batch(#[from] BatchSubmissionError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decode image for {file_id}: {reason}")]
    Decode { file_id: String, reason: String },
    #[error("serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::CreateDir { .. } | ExportError::Write { .. } => "export_io",
            ExportError::Decode { .. } => "export_decode",
            ExportError::Serialize(_) => "export_serialize",
        }
    }
}
