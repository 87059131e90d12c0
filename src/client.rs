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

//! Boundary to the external detection service.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::multipart::Part;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::DetectionRequestError;
use crate::error::RequestFailure;
use crate::model::RecordPayload;
use crate::model::ResultRecord;
use crate::model::WorkItem;

/// Resolves one work item into a record.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, item: &WorkItem) -> Result<ResultRecord, DetectionRequestError>;
}

/// Body of a `/detect` response. `success` is sent by the service but unused.
/// `result` is taken as any JSON value; its shape is interpreted later.
#[derive(Debug, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
}

impl DetectResponse {
    /// Normalize into a record; `result` wins over `error` when both are set.
    pub fn into_record(self, item: &WorkItem) -> Result<ResultRecord, RequestFailure> {
        let result = match (self.result, self.error) {
            (Some(result), _) => RecordPayload::from_value(result),
            (None, Some(error)) => RecordPayload::Error(error),
            (None, None) => {
                return Err(RequestFailure::Malformed(
                    "response carries neither result nor error".to_string(),
                ));
            }
        };
        let filename = self
            .filename
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| item.file_name.clone());
        Ok(ResultRecord {
            file_id: item.file_id.clone(),
            category: item.category.clone(),
            result,
            filename,
            image_data: self.image_data.filter(|data| !data.is_empty()),
        })
    }
}

pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(endpoint: &str, config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, item: &WorkItem) -> Result<ResultRecord, RequestFailure> {
        let bytes = tokio::fs::read(&item.path)
            .await
            .map_err(|source| RequestFailure::ReadFile {
                path: item.path.clone(),
                source,
            })?;
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(item.file_name.clone()))
            .text("category", item.category.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|err| RequestFailure::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RequestFailure::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(RequestFailure::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let parsed: DetectResponse = serde_json::from_str(&body)
            .map_err(|err| RequestFailure::Malformed(err.to_string()))?;
        parsed.into_record(item)
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, item: &WorkItem) -> Result<ResultRecord, DetectionRequestError> {
        tracing::debug!(
            file = %item.file_id,
            category = %item.category,
            endpoint = %self.endpoint,
            "sending detection request"
        );
        self.send(item)
            .await
            .map_err(|failure| DetectionRequestError::new(item, failure))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
