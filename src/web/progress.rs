//! Progress Streamer (§4.F): one push channel per client per crawl id.
//!
//! Split-sink/stream `tokio::select!` multiplexing lifted structurally from
//! the reference's deleted admin WebSocket handler; unlike that handler's
//! event-buffer-driven push model, this uses a literal 1 Hz polling tick
//! against the Crawl State Store (a deliberate choice, see design notes).

use std::collections::HashSet;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::models::{Document, ScrapeJob, ScrapeJobStatus, StoredCrawl};
use crate::error::AppError;
use crate::state::AppState;
use crate::web::auth::extract_team_id;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Frame {
    #[serde(rename = "catchup")]
    Catchup { data: CrawlStatusFrame },
    #[serde(rename = "document")]
    Document { data: Document },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { error: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStateEntry {
    id: Uuid,
    status: ScrapeJobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlStatusFrame {
    status: &'static str,
    total: i64,
    completed: i64,
    credits_used: i64,
    expires_at: String,
    data: Vec<JobStateEntry>,
}

/// `GET /v1/crawl/:jobId`
pub async fn stream_crawl(
    ws: WebSocketUpgrade,
    Path(crawl_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, crawl_id, params, headers, state))
}

async fn close_with(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    code: u16,
    reason: String,
) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Sends a frame; returns `false` if the connection is dead.
async fn send_frame(sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), frame: &Frame) -> bool {
    let Ok(text) = serde_json::to_string(frame) else {
        return false;
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

async fn send_error(sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), message: String) -> bool {
    send_frame(sink, &Frame::Error { error: message }).await
}

/// A job is throttled ("prioritized") once the crawl's `max_concurrency`
/// budget for in-flight jobs is exhausted by jobs that queued earlier.
fn compute_throttled(jobs: &[ScrapeJob], max_concurrency: i32) -> HashSet<Uuid> {
    let mut ordered: Vec<&ScrapeJob> = jobs.iter().filter(|j| j.completed_at.is_none()).collect();
    ordered.sort_by_key(|j| j.queued_at);

    let mut budget_used = 0i32;
    let mut throttled = HashSet::new();
    for job in ordered {
        if job.locked_at.is_some() {
            budget_used += 1;
            continue;
        }
        if budget_used < max_concurrency {
            budget_used += 1;
        } else {
            throttled.insert(job.id);
        }
    }
    throttled
}

fn classify(jobs: &[ScrapeJob], throttled: &HashSet<Uuid>) -> Vec<JobStateEntry> {
    jobs.iter()
        .filter_map(|job| {
            let is_throttled = throttled.contains(&job.id);
            let status = job.status(is_throttled);
            if !is_throttled && matches!(status, ScrapeJobStatus::Failed | ScrapeJobStatus::Unknown) {
                return None;
            }
            Some(JobStateEntry { id: job.id, status })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::ScrapeMode;
    use chrono::Utc;

    fn job(queued_secs_ago: i64, locked: bool, completed: bool) -> ScrapeJob {
        let now = Utc::now();
        ScrapeJob {
            id: Uuid::new_v4(),
            mode: ScrapeMode::SingleUrls,
            team_id: "team-1".into(),
            target_payload: serde_json::json!({}),
            priority: 10,
            crawl_id: None,
            locked_at: if locked { Some(now) } else { None },
            queued_at: now - chrono::Duration::seconds(queued_secs_ago),
            created_at: now,
            completed_at: if completed { Some(now) } else { None },
            retry_count: 0,
            max_retries: 3,
            return_value: None,
            error: None,
        }
    }

    #[test]
    fn jobs_within_concurrency_budget_are_not_throttled() {
        let jobs = vec![job(3, false, false), job(2, false, false)];
        let throttled = compute_throttled(&jobs, 2);
        assert!(throttled.is_empty());
    }

    #[test]
    fn jobs_beyond_concurrency_budget_are_throttled_in_queue_order() {
        let earliest = job(10, false, false);
        let middle = job(5, false, false);
        let latest = job(1, false, false);
        let jobs = vec![latest.clone(), earliest.clone(), middle.clone()];

        let throttled = compute_throttled(&jobs, 2);
        assert!(!throttled.contains(&earliest.id));
        assert!(!throttled.contains(&middle.id));
        assert!(throttled.contains(&latest.id));
    }

    #[test]
    fn already_locked_jobs_consume_budget_but_are_never_throttled() {
        let locked = job(5, true, false);
        let waiting = job(1, false, false);
        let jobs = vec![locked.clone(), waiting.clone()];

        let throttled = compute_throttled(&jobs, 1);
        assert!(!throttled.contains(&locked.id));
        assert!(throttled.contains(&waiting.id));
    }

    #[test]
    fn completed_jobs_are_excluded_from_the_budget_computation() {
        let done = job(20, false, true);
        let waiting = job(1, false, false);
        let jobs = vec![done, waiting.clone()];

        let throttled = compute_throttled(&jobs, 1);
        assert!(!throttled.contains(&waiting.id), "a completed job must not consume budget");
    }

    #[test]
    fn classify_hides_non_throttled_failures() {
        let mut failed = job(5, false, false);
        failed.completed_at = Some(Utc::now());
        failed.error = Some("boom".into());
        let jobs = vec![failed];

        let entries = classify(&jobs, &HashSet::new());
        assert!(entries.is_empty(), "an untthrottled failed job is a terminal failure, omitted from the live frame");
    }

    #[test]
    fn classify_reports_prioritized_status_for_throttled_jobs() {
        let waiting = job(1, false, false);
        let mut throttled = HashSet::new();
        throttled.insert(waiting.id);

        let entries = classify(&[waiting.clone()], &throttled);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ScrapeJobStatus::Prioritized);
    }
}

async fn handle_stream(
    socket: WebSocket,
    crawl_id: Uuid,
    params: StreamParams,
    headers: HeaderMap,
    state: AppState,
) {
    let (mut sink, mut stream) = socket.split();

    let team_id = match extract_team_id(&headers, params.token.as_deref(), &state.config) {
        Ok(team_id) => team_id,
        Err(e) => {
            let (code, reason) = e.ws_close();
            close_with(&mut sink, code, reason).await;
            return;
        }
    };

    let crawl = match state.db.crawls().get_crawl(crawl_id).await {
        Ok(Some(crawl)) => crawl,
        Ok(None) => {
            let (code, reason) = AppError::JobNotFound.ws_close();
            close_with(&mut sink, code, reason).await;
            return;
        }
        Err(e) => {
            let (code, reason) = e.ws_close();
            close_with(&mut sink, code, reason).await;
            return;
        }
    };

    if crawl.team_id != team_id {
        let (code, reason) = AppError::ForbiddenTeam.ws_close();
        close_with(&mut sink, code, reason).await;
        return;
    }

    let mut done_job_ids: HashSet<Uuid> = HashSet::new();

    let finished = match send_catchup(&mut sink, &state, &crawl, &mut done_job_ids).await {
        Ok(finished) => finished,
        Err(msg) => {
            if send_error(&mut sink, msg).await {
                close_with(&mut sink, 1011, "Unexpected error".to_string()).await;
            }
            return;
        }
    };
    if finished {
        if send_frame(&mut sink, &Frame::Done).await {
            close_with(&mut sink, 1000, "Done".to_string()).await;
        }
        return;
    }

    let mut ticker = tokio::time::interval(state.config.poll_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll_iteration(&mut sink, &state, &crawl, &mut done_job_ids).await {
                    Ok(true) => {
                        if send_frame(&mut sink, &Frame::Done).await {
                            close_with(&mut sink, 1000, "Done".to_string()).await;
                        }
                        return;
                    }
                    Ok(false) => {}
                    Err(msg) => {
                        if send_error(&mut sink, msg).await {
                            close_with(&mut sink, 1011, "Unexpected error".to_string()).await;
                        }
                        return;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}

async fn send_catchup(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    state: &AppState,
    crawl: &StoredCrawl,
    done_job_ids: &mut HashSet<Uuid>,
) -> Result<bool, String> {
    let full_set = state.db.crawls().get_crawl_jobs(crawl.id).await.map_err(|e| {
        tracing::error!(error = %e, crawl_id = %crawl.id, "catchup: failed to load crawl jobs");
        "failed to load crawl state".to_string()
    })?;
    let jobs = state.db.scrape_jobs().get_many(&full_set).await.map_err(|e| {
        tracing::error!(error = %e, crawl_id = %crawl.id, "catchup: failed to load job states");
        "failed to load job states".to_string()
    })?;

    let max_concurrency = crawl.max_concurrency.unwrap_or(i32::MAX);
    let throttled = compute_throttled(&jobs, max_concurrency);
    let data = classify(&jobs, &throttled);

    let done_count = jobs.iter().filter(|j| j.completed_at.is_some()).count() as i64;
    for job in jobs.iter().filter(|j| j.completed_at.is_some()) {
        done_job_ids.insert(job.id);
    }

    let finished = crawl.cancelled || (!full_set.is_empty() && done_count == full_set.len() as i64);
    let status = if crawl.cancelled {
        "cancelled"
    } else if finished {
        "completed"
    } else {
        "scraping"
    };

    let ok = send_frame(
        sink,
        &Frame::Catchup {
            data: CrawlStatusFrame {
                status,
                total: full_set.len() as i64,
                completed: done_count,
                credits_used: full_set.len() as i64,
                expires_at: crawl.expires_at.to_rfc3339(),
                data,
            },
        },
    )
    .await;
    if !ok {
        return Err("connection closed".to_string());
    }

    Ok(finished)
}

/// One polling tick: refresh the child set, push document frames for newly
/// terminal jobs, and report whether the crawl is now finished.
async fn poll_iteration(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    state: &AppState,
    crawl: &StoredCrawl,
    done_job_ids: &mut HashSet<Uuid>,
) -> Result<bool, String> {
    let full_set = state.db.crawls().get_crawl_jobs(crawl.id).await.map_err(|e| {
        tracing::error!(error = %e, crawl_id = %crawl.id, "poll: failed to load crawl jobs");
        "failed to load crawl state".to_string()
    })?;

    if !full_set.is_empty() && full_set.len() == done_job_ids.len() {
        return Ok(true);
    }

    let undone: Vec<Uuid> = full_set
        .iter()
        .filter(|id| !done_job_ids.contains(id))
        .copied()
        .collect();
    let jobs = state.db.scrape_jobs().get_many(&undone).await.map_err(|e| {
        tracing::error!(error = %e, crawl_id = %crawl.id, "poll: failed to load job states");
        "failed to load job states".to_string()
    })?;

    let mut newly_done = Vec::new();
    for job in &jobs {
        if job.completed_at.is_some() {
            newly_done.push(job.clone());
        }
    }

    for job in &newly_done {
        if job.error.is_none() {
            if let Some(value) = job.return_value.clone() {
                if let Ok(document) = serde_json::from_value::<Document>(value) {
                    if !send_frame(sink, &Frame::Document { data: document }).await {
                        return Err("connection closed".to_string());
                    }
                }
            }
        }
        done_job_ids.insert(job.id);
    }

    let is_finished = state.db.crawls().is_finished(crawl.id).await.map_err(|e| {
        tracing::error!(error = %e, crawl_id = %crawl.id, "poll: failed to check crawl completion");
        "failed to check crawl completion".to_string()
    })?;

    Ok(is_finished)
}
