use std::sync::{Arc, RwLock};

use taskwise_server::{
    api,
    assistant::TaskAssistant,
    auth::{AppState, SharedState, TokenConfig},
    config::Settings,
    persist,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load().expect("Failed to load settings");

    // ── Boot the World ─────────────────────────────────────────
    let save_file = persist::SaveFile::open(&settings.database_path)
        .expect("Failed to open save file");

    let mut world = save_file.load_world()
        .expect("Failed to load world from save file");

    if save_file
        .ensure_default_user(&mut world, &settings.default_admin_username, &settings.default_admin_password)
        .expect("Failed to seed user")
    {
        tracing::info!(username = %settings.default_admin_username, "created default admin user");
    }

    tracing::info!(
        tasks = world.tasks.len(),
        users = world.users.len(),
        categories = world.categories.len(),
        insights = world.insights.len(),
        revision = world.revision,
        "world loaded"
    );

    // ── Shared state ───────────────────────────────────────────
    let state: SharedState = Arc::new(AppState {
        world: RwLock::new(world),
        save_file,
        assistant: TaskAssistant::from_settings(&settings.completion),
        tokens: TokenConfig {
            secret: settings.jwt_secret.clone(),
            expiry_minutes: settings.jwt_expiration_in_minutes,
        },
    });

    let app = api::router(state);

    // ── Start ──────────────────────────────────────────────────
    let addr = settings.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!(%addr, "server running");
    tracing::info!("  Login: POST http://{addr}/api/auth/login");

    axum::serve(listener, app).await.expect("Server error");
}
