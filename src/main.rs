use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use chrono::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use reviewware::api::{self, AppState};
use reviewware::config::Config;
use reviewware::email::{EmailService, EmailTransport, MemoryTransport, ResendTransport};
use reviewware::store::ReviewStore;
use reviewware::tokens::TokenService;
use reviewware::workflow::WorkflowManager;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::from_env();

    let store = Arc::new(ReviewStore::new(&config.data_dir));
    store.init().await.expect("failed to create review directories");

    let tokens = Arc::new(TokenService::new(&config.data_dir));
    tokens.init().await.expect("failed to create token directory");

    let transport: Arc<dyn EmailTransport> = match config.resend_api_key.clone() {
        Some(api_key) => Arc::new(ResendTransport::new(api_key)),
        None => {
            warn!("RESEND_API_KEY not set, emails will be recorded in memory only");
            Arc::new(MemoryTransport::default())
        }
    };
    let email = Arc::new(
        EmailService::new(&config, transport)
            .await
            .expect("failed to initialize email service"),
    );

    let workflow = Arc::new(WorkflowManager::new(
        &config.data_dir,
        store.clone(),
        tokens,
        email,
        config.token_expiry_hours,
    ));
    workflow.init().await.expect("failed to create workflow directory");

    // retention sweep for finished workflows
    match workflow
        .cleanup_old_workflows(Duration::days(config.workflow_retention_days))
        .await
    {
        Ok(removed) if removed > 0 => info!("startup cleanup removed {removed} workflow files"),
        Ok(_) => {}
        Err(e) => warn!("startup workflow cleanup failed: {e}"),
    }

    let state = web::Data::new(AppState {
        store,
        workflow,
    });

    info!("listening on http://{}", config.bind_addr);
    HttpServer::new(move || {
        App::new().app_data(state.clone()).service(
            web::scope("/api/reviews")
                .route("/submit", web::post().to(api::submit_review))
                .route("/verify", web::get().to(api::verify_review))
                .route("/display", web::get().to(api::display_reviews))
                .route("/moderate", web::post().to(api::moderate_review)),
        )
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
