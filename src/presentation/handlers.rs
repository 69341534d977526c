// HTTP request handlers
use crate::application::series_context::ContextId;
use crate::application::stats_engine::{EngineError, EngineStatus, Selection};
use crate::application::visibility_gate::{GateState, Visibility};
use crate::domain::node::{DisplayPreferences, NodeStats};
use crate::infrastructure::chunked_frames::stream_from_frames;
use crate::infrastructure::http_response::{accepts_brotli, encoded_response, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct FrameQuery {
    /// Window slot to read values at, like hovering the chart
    pub focus: Option<usize>,
}

#[derive(Deserialize)]
pub struct VisibilityUpdate {
    pub hidden: bool,
}

#[derive(Serialize)]
struct SelectionView {
    metric: String,
    interval: u32,
    refresh: u64,
}

#[derive(Serialize)]
struct ContextView {
    id: ContextId,
    running: bool,
}

#[derive(Serialize)]
struct StatsView {
    status: EngineStatus,
    preferences: DisplayPreferences,
    selection: SelectionView,
    visibility: GateState,
    context: Option<ContextView>,
    nodes: Vec<String>,
    stats: Vec<NodeStats>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn engine_error(err: EngineError) -> Response {
    let status = match err {
        EngineError::InvalidSelection(_) => StatusCode::BAD_REQUEST,
        EngineError::NotReady => StatusCode::CONFLICT,
        EngineError::PreferencesLoad(_) | EngineError::RosterLoad(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Aggregate snapshot, current selection and engine status
pub async fn get_stats(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let view = {
        let engine = state.engine.lock().await;
        StatsView {
            status: engine.status().clone(),
            preferences: engine.preferences().clone(),
            selection: SelectionView {
                metric: engine.selector().metric_name().to_string(),
                interval: engine.selector().step_seconds(),
                refresh: engine.refresh().as_millis(),
            },
            visibility: engine.gate_state(),
            context: engine.context().map(|ctx| ContextView {
                id: ctx.id(),
                running: ctx.is_running(),
            }),
            nodes: engine.roster().nodes().to_vec(),
            stats: engine.stats().to_vec(),
        }
    };

    match json_response(&view, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Latest horizon frame as JSON, or the focused values when `?focus=` is given
pub async fn get_frame(
    Query(query): Query<FrameQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let frame = state.latest_frame();
    let compress = accepts_brotli(&headers);

    let response = match query.focus {
        Some(slot) => json_response(&frame.focus(slot), compress).await,
        None => json_response(frame.as_ref(), compress).await,
    };
    match response {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Latest horizon frame rendered as SVG
pub async fn get_frame_svg(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let svg = state.latest_frame().to_svg();
    match encoded_response(svg.into_bytes(), "image/svg+xml", accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Chunked stream of frames, one chunk per redraw
pub async fn stream_frames(headers: HeaderMap, State(state): State<AppState>) -> impl IntoResponse {
    stream_from_frames(state.frames.clone(), accepts_brotli(&headers))
}

/// Metric, interval or refresh-rate change from the page controls
pub async fn update_selection(
    State(state): State<AppState>,
    Json(selection): Json<Selection>,
) -> Response {
    let mut engine = state.engine.lock().await;
    match engine.apply_selection(selection).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::warn!("Rejected selection: {}", e);
            engine_error(e)
        }
    }
}

/// Page visibility change
pub async fn update_visibility(
    State(state): State<AppState>,
    Json(update): Json<VisibilityUpdate>,
) -> StatusCode {
    let mut engine = state.engine.lock().await;
    engine.set_visibility(Visibility::from_hidden(update.hidden));
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stats_engine::{EngineSettings, StatsEngine};
    use crate::application::test_support::{FakeStatsApi, ManualClock};
    use axum::body::to_bytes;
    use std::sync::Arc;
    use std::time::Duration;

    async fn state(api: Arc<FakeStatsApi>) -> AppState {
        let mut engine = StatsEngine::new(
            api,
            Arc::new(ManualClock::new(3_600)),
            EngineSettings {
                window_size: 12,
                ..EngineSettings::default()
            },
        );
        let _ = engine.init().await;
        AppState::new(engine)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reports_selection_and_nodes() {
        let state = state(Arc::new(FakeStatsApi::new(&["node-a", "node-b"]))).await;

        let body = body_json(get_stats(HeaderMap::new(), State(state)).await).await;
        assert_eq!(body["status"]["state"], "ready");
        assert_eq!(body["selection"]["metric"], "deltaPacketsPerSec");
        assert_eq!(body["selection"]["interval"], 5);
        assert_eq!(body["visibility"], "active");
        assert_eq!(body["context"]["id"], 1);
        assert_eq!(body["context"]["running"], true);
        assert_eq!(body["nodes"], serde_json::json!(["node-a", "node-b"]));
        assert_eq!(body["stats"][1]["nodeName"], "node-b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_and_focus() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.fill("node-a", 9.0);
        let state = state(api).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frame = body_json(
            get_frame(Query(FrameQuery { focus: None }), HeaderMap::new(), State(state.clone())).await,
        )
        .await;
        assert_eq!(frame["rows"][0]["node_id"], "node-a");

        let focus = body_json(
            get_frame(Query(FrameQuery { focus: Some(11) }), HeaderMap::new(), State(state)).await,
        )
        .await;
        assert_eq!(focus[0]["value"], 9.0);
        assert_eq!(focus[0]["timestamp"], 3_595);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_selection_is_rejected() {
        let state = state(Arc::new(FakeStatsApi::new(&["node-a"]))).await;

        let response = update_selection(
            State(state.clone()),
            Json(Selection {
                interval: Some(0),
                ..Selection::default()
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = update_selection(
            State(state.clone()),
            Json(Selection {
                interval: Some(60),
                ..Selection::default()
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.engine.lock().await.selector().step_seconds(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_update_suspends_engine() {
        let state = state(Arc::new(FakeStatsApi::new(&["node-a"]))).await;

        let status = update_visibility(State(state.clone()), Json(VisibilityUpdate { hidden: true })).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.engine.lock().await.gate_state(), GateState::Suspended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_renders_error_svg() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.set_stats_available(false);
        let state = state(api).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = get_frame_svg(HeaderMap::new(), State(state)).await;
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let svg = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(svg.contains("failed to load node stats"));
    }
}
