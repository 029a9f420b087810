use std::sync::Arc;

use axum::Router;
use course_forum_rag::{
    api,
    app_state::AppState,
    config,
    rag::RetrievalContext,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Cargar índice + metadatos una sola vez; sólo lectura a partir de aquí
    let context = RetrievalContext::from_config(&cfg)?;

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        context: Arc::new(context),
    };

    // 5. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
