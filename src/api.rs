use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use tracing::info;

use crate::{
    app_state::AppState,
    models::{AnswerPayload, QueryRequest},
    rag,
};

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/", post(answer_handler))
        .route("/api", post(answer_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Siempre responde 200 con `{answer, links}`; los fallos internos ya
/// vienen degradados desde `rag::answer_query`.
#[axum::debug_handler]
async fn answer_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Json<AnswerPayload> {
    info!(
        "Pregunta recibida ({} caracteres, imagen: {})",
        payload.question.len(),
        payload.image.is_some()
    );
    Json(rag::answer_query(&state.context, &payload).await)
}
