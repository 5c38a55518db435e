use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use hood::config::AppConfig;
use hood::models::NewNeighborhood;
use hood::openapi::ApiDoc;
use hood::rate_limit::RateLimiterFacade;
use hood::repo::Repo;
use hood::{service, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; deployments set the
    // environment themselves.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping hood server");
    info!(frontend = %config.frontend_url, "CORS origin");

    let repo = build_repo(&config).await?;

    if let Some(path) = &config.neighborhoods_file {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let records: Vec<NewNeighborhood> =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        service::seed_neighborhoods(repo.as_ref(), records).await?;
    }

    let limits = RateLimiterFacade::new(config.rate_limits.clone());
    let openapi = ApiDoc::openapi();
    let frontend = config.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(AppState { repo: repo.clone(), limits: limits.clone() }))
            .configure(hood::config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("binding {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "listening");
    server.run().await?;
    Ok(())
}

#[cfg(not(feature = "postgres-store"))]
async fn build_repo(config: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use hood::repo::inmem::InMemRepo;
    info!(dir = %config.data_dir.display(), "Using in-memory repository backend");
    Ok(Arc::new(InMemRepo::with_data_dir(&config.data_dir)))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(config: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use hood::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let url = config.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(url)
        .await
        .context("connecting to Postgres")?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}
