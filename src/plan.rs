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

//! Input acquisition and work-item planning.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use walkdir::WalkDir;

use crate::error::ValidationError;
use crate::model::WorkItem;

/// A file picked for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceFile {
    pub file_id: String,
    pub path: PathBuf,
    pub file_name: String,
}

impl EvidenceFile {
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            file_id: path.to_string_lossy().into_owned(),
            path: path.to_path_buf(),
            file_name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub glob: Option<String>,
    pub ignore: Vec<String>,
    /// Lower-case extensions without the dot; empty accepts everything.
    pub extensions: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Collected {
    pub files: Vec<EvidenceFile>,
    pub warnings: Vec<String>,
}

/// Flatten paths into a file listing.
///
/// Explicit files are kept as given. Directory entries are walked in file
/// name order and only kept when their extension is accepted.
pub fn collect_files(paths: &[PathBuf], opts: &CollectOptions) -> Result<Collected> {
    let include_set = build_globset(opts.glob.as_deref())?;
    let ignore_set = build_ignore_set(&opts.ignore)?;

    let mut collected = Collected::default();
    for path in paths {
        if path.is_file() {
            if is_selected(path, &include_set, &ignore_set) {
                collected.files.push(EvidenceFile::from_path(path));
            }
        } else if path.is_dir() {
            let walker = WalkDir::new(path).sort_by_file_name();
            for entry in walker.into_iter() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        collected.warnings.push(format!("skip unreadable entry: {err}"));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let file = entry.path();
                if has_accepted_extension(file, &opts.extensions)
                    && is_selected(file, &include_set, &ignore_set)
                {
                    collected.files.push(EvidenceFile::from_path(file));
                }
            }
        } else {
            collected
                .warnings
                .push(format!("path not found: {}", path.display()));
        }
    }
    Ok(collected)
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>> {
    if let Some(pat) = pattern {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pat)?);
        let set = builder.build()?;
        Ok(Some(set))
    } else {
        Ok(None)
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_selected(path: &Path, include_set: &Option<GlobSet>, ignore_set: &GlobSet) -> bool {
    if !ignore_set.is_empty() && ignore_set.is_match(path) {
        return false;
    }
    match include_set {
        Some(set) => set.is_match(path),
        None => true,
    }
}

fn has_accepted_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|accepted| *accepted == ext))
}

/// Build the work items for `files × categories`, file-major, keeping the
/// first occurrence of every (file_id, category) pair.
pub fn plan(files: &[EvidenceFile], categories: &[String]) -> Result<Vec<WorkItem>, ValidationError> {
    if files.is_empty() {
        return Err(ValidationError::NoFiles);
    }
    if categories.is_empty() {
        return Err(ValidationError::NoCategories);
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(files.len() * categories.len());
    let mut items = Vec::new();
    for file in files {
        for category in categories {
            if !seen.insert((file.file_id.as_str(), category.as_str())) {
                continue;
            }
            items.push(WorkItem {
                file_id: file.file_id.clone(),
                category: category.clone(),
                path: file.path.clone(),
                file_name: file.file_name.clone(),
            });
        }
    }
    tracing::debug!(
        files = files.len(),
        categories = categories.len(),
        items = items.len(),
        "planned batch"
    );
    Ok(items)
}
