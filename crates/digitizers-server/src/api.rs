//! REST API endpoints
//!
//! All endpoints are under /api/v1/ and return JSON.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use digitizers_core::stages::{PostMortemData, SignalMetadata};
use digitizers_core::stats::{RunningStats, WindowSummary};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

/// Number of dropped-trigger events returned by the stats endpoint
const RECENT_DROPS: usize = 100;

/// Number of window summaries returned by the stats endpoint
const RECENT_WINDOWS: usize = 20;

/// Application status response
#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub build_date: String,
    pub running: bool,
    pub sample_rate: f64,
    pub decimation: usize,
    pub pre_trigger: u64,
    pub post_trigger: u64,
    pub trigger_period: u64,
}

/// Statistics response
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: RunningStats,
    /// Most recent dropped triggers, newest first
    pub dropped_triggers: Vec<DropEventResponse>,
    /// Most recent extracted windows, newest first
    pub recent_windows: Vec<WindowSummary>,
}

/// Dropped trigger for API
#[derive(Serialize)]
pub struct DropEventResponse {
    /// Timestamp as ISO 8601 string
    pub timestamp: String,
    pub trigger_offset: u64,
    pub reason: String,
}

/// Post-mortem buffer description
#[derive(Serialize)]
pub struct PostMortemResponse {
    #[serde(flatten)]
    pub metadata: SignalMetadata,
    pub buffer_size: usize,
    pub frozen: bool,
    pub nitems_written: u64,
}

/// Generic action response
#[derive(Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

/// Query of the post-mortem data endpoint
#[derive(Deserialize)]
pub struct DrainQuery {
    /// Samples to read, defaults to the whole buffer
    pub items: Option<usize>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pipeline = &state.pipeline;
    Json(StatusResponse {
        version: digitizers_core::VERSION.to_string(),
        build_date: digitizers_core::BUILD_DATE.to_string(),
        running: state.running.load(Ordering::Relaxed),
        sample_rate: pipeline.sample_rate,
        decimation: pipeline.effective_decimation(),
        pre_trigger: pipeline.pre_trigger,
        post_trigger: pipeline.post_trigger,
        trigger_period: pipeline.trigger_period,
    })
}

/// GET /api/v1/stats
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let store = state.stats.lock().map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to acquire lock on stats store".to_string(),
        )
    })?;

    let dropped_triggers = store
        .latest_drops(RECENT_DROPS)
        .into_iter()
        .map(|e| DropEventResponse {
            timestamp: e.timestamp.to_rfc3339(),
            trigger_offset: e.trigger_offset,
            reason: e.reason.to_string(),
        })
        .collect();
    let recent_windows = store
        .recent_windows()
        .iter()
        .rev()
        .take(RECENT_WINDOWS)
        .cloned()
        .collect();

    Ok(Json(StatsResponse {
        stats: store.stats().clone(),
        dropped_triggers,
        recent_windows,
    }))
}

/// POST /api/v1/reset
///
/// Resets statistics counters without clearing the event history.
pub async fn reset_stats(State(state): State<AppState>) -> Json<ActionResponse> {
    if let Ok(mut store) = state.stats.lock() {
        store.reset_counters();
        Json(ActionResponse {
            success: true,
            message: "Counters reset successfully. Event history preserved.".to_string(),
        })
    } else {
        Json(ActionResponse {
            success: false,
            message: "Failed to acquire lock on stats store.".to_string(),
        })
    }
}

/// GET /api/v1/postmortem
pub async fn get_post_mortem(State(state): State<AppState>) -> Json<PostMortemResponse> {
    Json(PostMortemResponse {
        metadata: state.sink.metadata(),
        buffer_size: state.sink.buffer_size(),
        frozen: state.sink.is_frozen(),
        nitems_written: state.sink.nitems_written(),
    })
}

/// POST /api/v1/postmortem/freeze
pub async fn freeze_post_mortem(State(state): State<AppState>) -> Json<ActionResponse> {
    state.sink.freeze();
    Json(ActionResponse {
        success: true,
        message: "Post-mortem buffer frozen.".to_string(),
    })
}

/// GET /api/v1/postmortem/data?items=N
///
/// Drains the frozen buffer and unfreezes it. Responds with 409 when the
/// buffer has not been frozen.
pub async fn get_post_mortem_data(
    State(state): State<AppState>,
    Query(query): Query<DrainQuery>,
) -> Result<Json<PostMortemData>, (StatusCode, String)> {
    let items = query.items.unwrap_or(state.sink.buffer_size());
    state.sink.try_drain(items).map(Json).ok_or((
        StatusCode::CONFLICT,
        "Post-mortem buffer is not frozen".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_router, ServerConfig};
    use axum::body::Body;
    use axum::http::Request;
    use digitizers_core::config::PipelineConfig;
    use digitizers_core::pipeline::PipelineHandle;
    use digitizers_core::stages::{DropReason, PostMortemSink};
    use digitizers_core::stats::StatsStore;
    use digitizers_core::tags::{AcqInfo, SidebandTag};
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(
            PostMortemSink::new(100, "beam_current", "mA").unwrap(),
            Arc::new(Mutex::new(StatsStore::new())),
            Arc::new(AtomicBool::new(true)),
            PipelineConfig::default(),
            ServerConfig::default(),
        )
    }

    async fn send(state: AppState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_status() {
        let (status, json) = send(state(), "GET", "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], true);
        assert_eq!(json["pre_trigger"], 100);
        assert_eq!(json["version"], digitizers_core::VERSION);
    }

    #[tokio::test]
    async fn test_status_reports_exited_pipeline() {
        let mut handle = PipelineHandle::spawn(PipelineConfig {
            realtime: false,
            ..Default::default()
        })
        .unwrap();
        let state = AppState::new(
            handle.post_mortem(),
            handle.stats(),
            handle.running_flag(),
            PipelineConfig::default(),
            ServerConfig::default(),
        );

        let (_, json) = send(state.clone(), "GET", "/api/v1/status").await;
        assert_eq!(json["running"], true);

        handle.stop();
        let (_, json) = send(state, "GET", "/api/v1/status").await;
        assert_eq!(json["running"], false);
    }

    #[tokio::test]
    async fn test_security_headers() {
        let response = build_router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_stats_include_dropped_triggers() {
        let state = state();
        state
            .stats
            .lock()
            .unwrap()
            .record_drop(42, DropReason::HistoryExhausted);

        let (status, json) = send(state, "GET", "/api/v1/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["triggers_dropped"], 1);
        assert_eq!(json["dropped_triggers"][0]["trigger_offset"], 42);
        assert_eq!(json["dropped_triggers"][0]["reason"], "history exhausted");
    }

    #[tokio::test]
    async fn test_reset() {
        let state = state();
        state.stats.lock().unwrap().record_chunk(10);

        let (status, json) = send(state.clone(), "POST", "/api/v1/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(state.stats.lock().unwrap().stats().samples_processed, 0);
    }

    #[tokio::test]
    async fn test_post_mortem_metadata() {
        let (status, json) = send(state(), "GET", "/api/v1/postmortem").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "beam_current");
        assert_eq!(json["unit"], "mA");
        assert_eq!(json["buffer_size"], 100);
        assert_eq!(json["frozen"], false);
    }

    #[tokio::test]
    async fn test_drain_requires_freeze() {
        let (status, _) = send(state(), "GET", "/api/v1/postmortem/data").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_freeze_then_drain() {
        let state = state();
        let info = AcqInfo {
            timestamp: 1_000,
            timebase: 1e-9,
            status: 2,
            ..Default::default()
        };
        state
            .sink
            .append(&[1.0, 2.0, 3.0, 4.0], None, &[SidebandTag::acq_info(0, &info)]);

        let (status, _) = send(state.clone(), "POST", "/api/v1/postmortem/freeze").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.sink.is_frozen());

        let (status, json) = send(state.clone(), "GET", "/api/v1/postmortem/data?items=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["values"], serde_json::json!([3.0, 4.0]));
        assert_eq!(json["info"]["status"], 2);
        assert_eq!(json["info"]["timestamp"], 1_002);
        assert_eq!(json["info"]["post_trigger_samples"], 2);
        assert!(!state.sink.is_frozen());
    }
}
