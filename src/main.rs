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

mod aggregate;
mod cli;
mod client;
mod config;
mod error;
mod export;
mod facets;
mod logging;
mod model;
mod output;
mod plan;
mod session;
mod significance;
mod store;

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::Shell;
use serde_json::Value;
use serde_json::json;

use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::SubmitArgs;
use crate::cli::ViewArgs;
use crate::client::HttpDetector;
use crate::config::ConfigCtx;
use crate::error::BatchSubmissionError;
use crate::error::ExportError;
use crate::error::SubmitError;
use crate::error::ValidationError;
use crate::model::RecordPayload;
use crate::model::ResultBatch;
use crate::model::ResultRecord;
use crate::output::JsonResponse;
use crate::output::StatsOut;
use crate::output::print_json;
use crate::plan::CollectOptions;
use crate::session::AnalysisSession;
use crate::significance::CategoryRule;
use crate::store::Store;
use crate::store::StoreMode;

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Submit(args) => {
            let json = args.json;
            handle_result(cmd_submit(args), json)
        }
        Commands::Import(args) => handle_result(cmd_import(&args.path, args.json), args.json),
        Commands::Results(args) => handle_result(cmd_results(&args.view, args.json), args.json),
        Commands::Facets(args) => handle_result(
            cmd_facets(&args.query, args.category.as_deref(), args.json),
            args.json,
        ),
        Commands::Export(args) => {
            handle_result(cmd_export(&args.out, &args.view, args.json), args.json)
        }
        Commands::Stats { json } => handle_result(cmd_stats(json), json),
        Commands::Categories { json } => handle_result(cmd_categories(json), json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let resp = error_response(&err);
                print_json(&resp)?;
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn error_response(err: &anyhow::Error) -> JsonResponse {
    let message = err.to_string();
    let validation = err.downcast_ref::<ValidationError>().or_else(|| {
        match err.downcast_ref::<SubmitError>() {
            Some(SubmitError::Validation(inner)) => Some(inner),
            _ => None,
        }
    });
    if let Some(validation) = validation {
        let hint = match validation {
            ValidationError::NoFiles => "pass at least one existing file or directory",
            ValidationError::NoCategories => "pass at least one -c/--category",
        };
        return JsonResponse::error("validation", &message).with_hint(Some(hint));
    }
    let in_flight = matches!(
        err.downcast_ref::<BatchSubmissionError>(),
        Some(BatchSubmissionError::InFlight)
    ) || matches!(
        err.downcast_ref::<SubmitError>(),
        Some(SubmitError::Batch(BatchSubmissionError::InFlight))
    );
    if in_flight {
        return JsonResponse::error("batch_submission", &message)
            .with_hint(Some("wait for the running submission to finish"));
    }
    if err.downcast_ref::<BatchSubmissionError>().is_some()
        || err.downcast_ref::<SubmitError>().is_some()
    {
        return JsonResponse::error("batch_submission", &message)
            .with_hint(Some("the previous batch is unchanged"));
    }
    if let Some(export_err) = err.downcast_ref::<ExportError>() {
        return JsonResponse::error("export", &message)
            .with_details(Some(export_err.code().to_string()));
    }
    JsonResponse::error("error", &message)
}

fn cmd_init(path: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&root).with_context(|| format!("create dir {root:?}"))?;

    let config = config::load_global_config()?;
    let store_path = if config.store_path.is_absolute() {
        config.store_path.clone()
    } else {
        root.join(&config.store_path)
    };
    Store::init(&store_path)?;

    println!("Initialized evidex store at {}", store_path.display());
    Ok(())
}

fn load_session(ctx: &ConfigCtx) -> Result<AnalysisSession> {
    let store = Store::open(&ctx.store_path(), StoreMode::ReadOnly)?;
    Ok(AnalysisSession::with_batch(store.load_batch()?))
}

/// Apply query and facets; returns a warning per facet no visible record has.
fn apply_view(session: &AnalysisSession, view: &ViewArgs) -> Vec<String> {
    session.set_query(&view.query);
    let available = session.facets();
    let mut warnings = Vec::new();
    for facet in &view.facets {
        if !available.all.contains(facet) {
            warnings.push(format!("facet '{facet}' matches no significant result"));
        }
        session.select_facet(facet);
    }
    warnings
}

fn batch_stats(batch: &ResultBatch, session: &AnalysisSession) -> StatsOut {
    StatsOut {
        batch_id: (!batch.id.is_empty()).then(|| batch.id.clone()),
        committed_at: (!batch.committed_at.is_empty()).then(|| batch.committed_at.clone()),
        total_records: batch.len(),
        significant: Some(session.significant().len()),
        ..StatsOut::default()
    }
}

fn cmd_submit(args: SubmitArgs) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let store_path = ctx.store_path();

    let opts = CollectOptions {
        glob: args.glob,
        ignore: args.ignore,
        extensions: ctx.config.extensions.clone(),
    };
    let collected = plan::collect_files(&args.paths, &opts)?;
    let endpoint = args
        .endpoint
        .unwrap_or_else(|| ctx.config.endpoint.clone());
    let detector = HttpDetector::new(&endpoint, &ctx.config)?;

    let _submit_lock = Store::acquire_submit_lock(&store_path)?;
    let session = load_session(&ctx)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    tracing::info!(endpoint = detector.endpoint(), files = collected.files.len(), "submitting");
    let batch = runtime.block_on(session.submit(&detector, &collected.files, &args.categories))?;

    let store = Store::open(&store_path, StoreMode::ReadWrite)?;
    store.replace_batch(&batch)?;

    let stats = batch_stats(&batch, &session);
    if args.json {
        let resp = JsonResponse::ok()
            .with_stats(stats)
            .with_warnings(collected.warnings);
        print_json(&resp)?;
    } else {
        println!(
            "Committed batch {} with {} records ({} significant)",
            batch.id,
            batch.len(),
            stats.significant.unwrap_or(0)
        );
        for warn in collected.warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_import(path: &Path, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let records: Vec<ResultRecord> =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;

    let store_path = ctx.store_path();
    let _submit_lock = Store::acquire_submit_lock(&store_path)?;
    let session = AnalysisSession::new();
    let batch = session.commit(aggregate::seal(records));
    let store = Store::open(&store_path, StoreMode::ReadWrite)?;
    store.replace_batch(&batch)?;

    let stats = batch_stats(&batch, &session);
    if json {
        print_json(&JsonResponse::ok().with_stats(stats))?;
    } else {
        println!(
            "Imported batch {} with {} records ({} significant)",
            batch.id,
            batch.len(),
            stats.significant.unwrap_or(0)
        );
    }
    Ok(())
}

/// Record as listed: image payloads are replaced by a flag.
fn listing_value(record: &ResultRecord) -> Result<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("image_data");
        obj.insert("has_image".to_string(), json!(record.image_data.is_some()));
    }
    Ok(value)
}

fn describe(record: &ResultRecord) -> String {
    let result = match &record.result {
        RecordPayload::Detection(result) => result,
        RecordPayload::Error(message) => return message.clone(),
        RecordPayload::Raw(_) => return "unrecognized result".to_string(),
    };
    let facets = CategoryRule::for_category(&record.category).facet_values(result);
    if !facets.is_empty() {
        return facets.join(", ");
    }
    if let Some(words) = result.danger_words.as_ref().filter(|w| !w.is_empty()) {
        return format!("danger words: {}", words.join(", "));
    }
    if let (Some(label), Some(score)) = (&result.suicidal_label, result.suicidal_score) {
        return format!("{label} ({score:.2})");
    }
    if result.nudity_detected == Some(true) {
        return "nudity detected".to_string();
    }
    let labels: Vec<&str> = result.detection_labels().collect();
    if labels.is_empty() {
        "-".to_string()
    } else {
        labels.join(", ")
    }
}

fn cmd_results(view: &ViewArgs, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let session = load_session(&ctx)?;
    let warnings = apply_view(&session, view);
    let batch = session.current();
    let visible = session.visible();

    if json {
        let results = visible
            .iter()
            .map(listing_value)
            .collect::<Result<Vec<_>>>()?;
        let mut stats = batch_stats(&batch, &session);
        stats.visible = Some(visible.len());
        let resp = JsonResponse::ok()
            .with_query(&view.query, &view.facets)
            .with_results(results)
            .with_stats(stats)
            .with_warnings(warnings);
        print_json(&resp)?;
    } else {
        for warn in &warnings {
            eprintln!("warning: {warn}");
        }
        if visible.is_empty() {
            println!("No significant results");
        }
        for record in &visible {
            println!(
                "{}\t{}\t{}",
                record.category,
                record.display_name(),
                describe(record)
            );
        }
    }
    Ok(())
}

fn cmd_facets(query: &str, category: Option<&str>, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let session = load_session(&ctx)?;
    session.set_query(query);
    let index = match category {
        Some(category) => session.facets().restrict(category),
        None => session.facets(),
    };

    if json {
        let resp = JsonResponse::ok()
            .with_query(query, &[])
            .with_facets(serde_json::to_value(&index)?);
        print_json(&resp)?;
    } else {
        if index.is_empty() {
            println!("No facets");
        }
        for family in &index.families {
            println!(
                "{} ({}): {}",
                family.category,
                family.values.len(),
                family.values.as_slice().join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_export(out: &Path, view: &ViewArgs, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let session = load_session(&ctx)?;
    let warnings = apply_view(&session, view);
    let report = session.export(out)?;

    if json {
        let resp = JsonResponse::ok()
            .with_query(&view.query, &view.facets)
            .with_export(serde_json::to_value(&report)?)
            .with_warnings(warnings);
        print_json(&resp)?;
    } else {
        for warn in &warnings {
            eprintln!("warning: {warn}");
        }
        println!(
            "Exported {} records ({} images) to {}",
            report.records,
            report.images.len(),
            report.root.display()
        );
    }
    Ok(())
}

fn cmd_stats(json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let store = Store::open(&ctx.store_path(), StoreMode::ReadOnly)?;
    let stats = store.stats()?;
    let session = AnalysisSession::with_batch(store.load_batch()?);
    let significant = session.significant().len();

    if json {
        let resp = JsonResponse::ok().with_stats(StatsOut {
            batch_id: stats.batch_id,
            committed_at: stats.committed_at,
            total_records: stats.record_count.max(0) as usize,
            significant: Some(significant),
            visible: None,
            error_records: Some(stats.error_count.max(0) as usize),
            categories: Some(stats.categories),
            db_size_bytes: Some(stats.db_size_bytes),
        });
        print_json(&resp)?;
    } else {
        match (&stats.batch_id, &stats.committed_at) {
            (Some(id), Some(at)) => println!("Batch: {id} (committed {at})"),
            _ => println!("Batch: none"),
        }
        println!("Records: {}", stats.record_count);
        println!("Significant: {significant}");
        println!("Errors: {}", stats.error_count);
        for count in &stats.categories {
            println!("  {}: {}", count.category, count.records);
        }
        println!("DB size: {} bytes", stats.db_size_bytes);
        println!("Endpoint: {}", ctx.config.endpoint);
    }
    Ok(())
}

fn cmd_categories(json: bool) -> Result<()> {
    if json {
        let categories = significance::KNOWN_CATEGORIES
            .iter()
            .map(|(name, description)| {
                json!({
                    "name": name,
                    "description": description,
                    "faceted": CategoryRule::for_category(name).participates_in_facets(),
                })
            })
            .collect();
        print_json(&JsonResponse::ok().with_categories(categories))?;
    } else {
        for (name, description) in significance::KNOWN_CATEGORIES {
            println!("{name:<12}{description}");
        }
    }
    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "evidex", &mut std::io::stdout());
    Ok(())
}
