use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use once_cell::sync::OnceCell;
use regex::Regex;
use tower::ServiceExt as _;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::registry::{CacheEntry, CacheState, TargetRegistry};
use crate::target::TargetId;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TargetRegistry>,
    pub static_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(registry: Arc<TargetRegistry>, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            static_dir: Arc::new(static_dir.into()),
        }
    }
}

/// `/seats{N}` for every registered target, diagnostics, and static files for
/// everything else. Handlers only read the registry.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/targets", get(list_targets));

    for id in state.registry.ids() {
        router = router.route(
            &format!("/seats{id}"),
            get(move |State(state): State<AppState>| async move { seats_response(&state.registry, id) }),
        );
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    router
        .fallback(fallback)
        .layer(cors)
        .with_state(state)
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatsResp {
    available_seats: i64,
}

#[derive(serde::Serialize)]
struct ErrorResp {
    error: String,
}

fn seats_response(registry: &TargetRegistry, id: TargetId) -> Response {
    match registry.last_value(id) {
        Some(available_seats) => Json(SeatsResp { available_seats }).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResp {
                error: format!("Seat data for Event {id} is not yet available"),
            }),
        )
            .into_response(),
    }
}

/// `/seats17` → `Some(17)`.
fn parse_seats_path(path: &str) -> Option<TargetId> {
    static RE_SEATS: OnceCell<Regex> = OnceCell::new();
    let re = RE_SEATS.get_or_init(|| Regex::new(r"^/seats([1-9]\d*)$").unwrap());
    re.captures(path)?.get(1)?.as_str().parse().ok()
}

/// Unregistered `/seats{N}` still answers 503; anything else is a static file.
async fn fallback(State(state): State<AppState>, req: Request) -> Response {
    if let Some(id) = parse_seats_path(req.uri().path()) {
        tracing::debug!(target: "api", id, "seat query for unregistered target");
        return seats_response(&state.registry, id);
    }
    match ServeDir::new(state.static_dir.as_path()).oneshot(req).await {
        Ok(resp) => resp.into_response(),
        Err(never) => match never {},
    }
}

#[derive(serde::Serialize)]
struct TargetStatus {
    id: TargetId,
    url: String,
    selector: String,
    state: CacheState,
    entry: CacheEntry,
}

async fn list_targets(State(state): State<AppState>) -> Json<Vec<TargetStatus>> {
    let out = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(t, e)| TargetStatus {
            id: t.id,
            url: t.source_url.clone(),
            selector: t.content_selector.clone(),
            state: e.state(),
            entry: CacheEntry::clone(&e),
        })
        .collect();
    Json(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seats_path_parsing() {
        assert_eq!(parse_seats_path("/seats1"), Some(1));
        assert_eq!(parse_seats_path("/seats42"), Some(42));
        assert_eq!(parse_seats_path("/seats"), None);
        assert_eq!(parse_seats_path("/seats1/x"), None);
        assert_eq!(parse_seats_path("/index.html"), None);
        assert_eq!(parse_seats_path("/seats01"), None);
        assert_eq!(parse_seats_path("/seats0"), None);
    }
}
