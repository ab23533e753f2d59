mod dedup;
mod export;
mod resolve;
mod similarity;
mod util;

use lambda_runtime::{run, service_fn, Context, Error, LambdaEvent};
use lazy_static::lazy_static;
use record_dedup_service::dto::{
    DetectRequest, DetectionResult, DownloadMergedRequest, DownloadOriginalRequest,
    ExportSummary, IgnoreRequest, IgnoreSummary, MergeRequest, MergeSummary, Operation,
};
use record_dedup_service::error::ServiceError;
use record_dedup_service::response::make_response_payload;
use record_dedup_service::util::{get_env_or, parse_threshold};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

lazy_static! {
    // Detection pool size, 0 lets rayon decide
    static ref WORKERS: usize = get_env_or("DETECT_WORKERS", 0);
    // Detection is cancelled this long before the invocation deadline
    static ref DEADLINE_MARGIN_MS: u64 = get_env_or("DEADLINE_MARGIN_MS", 1000);
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    run(service_fn(process)).await?;
    Ok(())
}

async fn process(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let (payload, context) = event.into_parts();
    let result = match serde_json::from_value::<Operation>(payload) {
        Ok(operation) => handle(operation, &context).await,
        Err(err) => Err(ServiceError::bad_request(err)),
    };
    make_response_payload(result)
}

async fn handle(operation: Operation, context: &Context) -> Result<Value, ServiceError> {
    match operation {
        Operation::Detect(request) => detect(request, context).await,
        Operation::Merge(request) => merge(request),
        Operation::Ignore(request) => ignore(request),
        Operation::DownloadOriginal(request) => download_original(request),
        Operation::DownloadMerged(request) => download_merged(request),
    }
}

async fn detect(request: DetectRequest, context: &Context) -> Result<Value, ServiceError> {
    let threshold = parse_threshold(request.threshold.as_ref());
    let start = Instant::now();
    let data = util::pull_data_file(&request.file)?;
    info!(
        "File ingested in {:.4} secs",
        start.elapsed().as_secs_f64()
    );
    if data.records.is_empty() {
        warn!(file = %request.file.name, "dataset is empty");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let watchdog = cancel_before_deadline(context.deadline, cancel.clone());
    let start = Instant::now();
    let records = data.records;
    let outcome = tokio::task::spawn_blocking(move || {
        let groups = dedup::detect(&records, threshold, *WORKERS, &cancel);
        (records.len(), groups)
    })
    .await;
    watchdog.abort();
    let (total, groups) = outcome.map_err(ServiceError::internal_server_error)?;
    let groups = groups?;
    info!(
        records = total,
        groups = groups.len(),
        threshold,
        "Dedupe completed in {:.4} secs",
        start.elapsed().as_secs_f64()
    );
    to_body(DetectionResult::new(total, groups, &data.format))
}

// Flags `cancel` once the invocation is about to run out of time
fn cancel_before_deadline(deadline_ms: u64, cancel: Arc<AtomicBool>) -> JoinHandle<()> {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let remaining = deadline_ms
        .saturating_sub(now)
        .saturating_sub(*DEADLINE_MARGIN_MS);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(remaining)).await;
        warn!("Invocation deadline approaching, cancelling detection");
        cancel.store(true, Ordering::Relaxed);
    })
}

fn merge(request: MergeRequest) -> Result<Value, ServiceError> {
    let merged = resolve::selective_merge(
        &request.data,
        request.selected_groups.as_deref(),
        request.similarity_threshold,
    );
    let exported = util::push_result_file(&merged, &request.output_format, "merged")?;
    info!(merged = merged.len(), file = %exported.file_name, "Merged selected groups");
    to_body(MergeSummary {
        success: true,
        file_name: exported.file_name,
        merged_count: merged.len(),
        original_count: request.data.total_records,
        content: exported.content,
    })
}

fn ignore(request: IgnoreRequest) -> Result<Value, ServiceError> {
    let outcome = resolve::ignore_groups(&request.data, &request.selected_groups);
    to_body(IgnoreSummary {
        success: true,
        message: format!("Ignored {} groups", outcome.ignored_groups),
        remaining_groups: outcome.groups.len(),
        ignored_count: outcome.ignored_count,
        duplicate_groups: outcome.groups,
    })
}

fn download_original(request: DownloadOriginalRequest) -> Result<Value, ServiceError> {
    let records = resolve::collect_group_records(&request.duplicate_groups);
    let exported = util::push_result_file(&records, &request.output_format, "original")?;
    to_body(ExportSummary {
        success: true,
        file_name: exported.file_name,
        content: exported.content,
    })
}

fn download_merged(request: DownloadMergedRequest) -> Result<Value, ServiceError> {
    let merged = resolve::export_merge(
        &request.data,
        request.selected_groups.as_deref(),
        request.similarity_threshold,
    );
    let exported = util::push_result_file(&merged, &request.data.source_format, "merged")?;
    to_body(ExportSummary {
        success: true,
        file_name: exported.file_name,
        content: exported.content,
    })
}

fn to_body<T: Serialize>(body: T) -> Result<Value, ServiceError> {
    serde_json::to_value(body).map_err(ServiceError::internal_server_error)
}
