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

//! Writes reviewed records to disk: one directory per category holding the
//! decoded images, plus `analysis_results.json` with every record.

use std::path::Path;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::ExportError;
use crate::model::ResultRecord;

pub const RESULTS_DIR: &str = "results";
pub const SUMMARY_FILE: &str = "analysis_results.json";
const DEFAULT_MIME: &str = "image/png";
const UNCATEGORIZED: &str = "uncategorized";
const IMAGE_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

#[derive(Debug, Clone, Serialize)]
pub struct ExportedImage {
    pub file_id: String,
    pub category: String,
    pub path: PathBuf,
    pub mime: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub root: PathBuf,
    pub summary: PathBuf,
    pub records: usize,
    pub categories: Vec<String>,
    pub images: Vec<ExportedImage>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Parse `data:<mime>;base64,<payload>` or bare base64 (taken as PNG).
pub fn decode_image(data: &str) -> Result<DecodedImage, String> {
    let (mime, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "data URI has no payload".to_string())?;
            let mime = header.split(';').next().unwrap_or_default();
            let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
            (mime.to_string(), payload)
        }
        None => (DEFAULT_MIME.to_string(), data),
    };
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|err| err.to_string())?;
    Ok(DecodedImage { mime, bytes })
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitized image file name ending in `.png`, `.jpg`, or `.jpeg`.
///
/// A recognized extension is kept (lower-cased); anything else gets `.png`
/// appended. Empty names fall back to a token derived from the image bytes.
pub fn image_file_name(filename: &str, bytes: &[u8]) -> String {
    let base = if filename.is_empty() {
        fallback_name(bytes)
    } else {
        filename.to_string()
    };
    let mut name = sanitize(&base);
    let lower = name.to_ascii_lowercase();
    match IMAGE_EXTENSIONS.iter().find(|ext| lower.ends_with(*ext)) {
        Some(ext) if name.len() > ext.len() => {
            name.truncate(name.len() - ext.len());
            name.push_str(ext);
        }
        _ => name.push_str(".png"),
    }
    name
}

fn fallback_name(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let token = hex::encode(&digest[..6]);
    format!("suspect_{token}.png")
}

fn category_dir_name(category: &str) -> String {
    let name = sanitize(category);
    // "", "." and ".." would escape or collapse into `results/`.
    if name.chars().all(|c| c == '.') {
        UNCATEGORIZED.to_string()
    } else {
        name
    }
}

fn ensure_dir(path: &Path) -> Result<(), ExportError> {
    std::fs::create_dir_all(path).map_err(|source| ExportError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    std::fs::write(path, bytes).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Export `records` under `<destination>/results/`.
///
/// Stops at the first failure; files already written stay on disk.
pub fn export_results(
    records: &[ResultRecord],
    destination: &Path,
) -> Result<ExportReport, ExportError> {
    let root = destination.join(RESULTS_DIR);
    ensure_dir(&root)?;

    let mut groups: Vec<(String, Vec<&ResultRecord>)> = Vec::new();
    for record in records {
        let dir_name = category_dir_name(&record.category);
        match groups.iter_mut().find(|(name, _)| *name == dir_name) {
            Some((_, members)) => members.push(record),
            None => groups.push((dir_name, vec![record])),
        }
    }

    let mut images = Vec::new();
    for (dir_name, members) in &groups {
        let dir = root.join(dir_name);
        ensure_dir(&dir)?;
        for record in members {
            let Some(data) = record.image_data.as_deref() else {
                continue;
            };
            let decoded = decode_image(data).map_err(|reason| ExportError::Decode {
                file_id: record.file_id.clone(),
                reason,
            })?;
            let path = dir.join(image_file_name(&record.filename, &decoded.bytes));
            write_file(&path, &decoded.bytes)?;
            tracing::debug!(path = %path.display(), mime = %decoded.mime, "wrote image");
            images.push(ExportedImage {
                file_id: record.file_id.clone(),
                category: record.category.clone(),
                path,
                mime: decoded.mime,
                bytes: decoded.bytes.len(),
            });
        }
    }

    let summary = root.join(SUMMARY_FILE);
    let text = serde_json::to_string_pretty(records)?;
    write_file(&summary, text.as_bytes())?;
    tracing::info!(
        records = records.len(),
        images = images.len(),
        root = %root.display(),
        "export complete"
    );

    Ok(ExportReport {
        root,
        summary,
        records: records.len(),
        categories: groups.into_iter().map(|(name, _)| name).collect(),
        images,
    })
}
