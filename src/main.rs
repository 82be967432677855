use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use blogmod::auth::TokenIssuer;
use blogmod::autorespond::{AutoResponseGenerator, AutoResponseScheduler, JobRunner};
use blogmod::llm::{GeminiClient, TextModel};
use blogmod::moderation::{ModerationGateway, ToxicityClassifier};
use blogmod::openapi::ApiDoc;
use blogmod::repo::Repo;
use blogmod::{config, AppConfig, AppState, BlogService};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let cfg = AppConfig::from_env();
    let problems = cfg.validate();
    if !problems.is_empty() {
        for p in &problems {
            eprintln!("{p}");
        }
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping blog server");
    if cfg.gemini.api_key.is_empty() {
        warn!("GEMINI_API_KEY is not set; moderation calls will fail");
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let repo = build_repo(&cfg)?;

    let model: Arc<dyn TextModel> = Arc::new(GeminiClient::new(cfg.gemini.clone()));
    let gateway = ModerationGateway::new(ToxicityClassifier::new(model.clone(), cfg.classifier_retry));
    let runner = JobRunner::new(repo.clone(), AutoResponseGenerator::new(model, cfg.generator_retry));
    let scheduler = AutoResponseScheduler::spawn(runner);
    let tokens = TokenIssuer::new(cfg.jwt_secret.clone(), cfg.token_ttl);

    let state = AppState {
        blog: Arc::new(BlogService::new(repo, gateway, scheduler, tokens.clone(), cfg.respond_time_unit)),
        metrics: Some(prometheus),
    };

    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            // during local dev allow React/Vite default ports
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(tokens.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);
    server.run().await?;
    Ok(())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use blogmod::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => {
            let path = std::path::Path::new(dir).join("blog.json");
            info!("Using in-memory repository backend with snapshot {}", path.display());
            InMemRepo::with_snapshot(path)
        }
        None => {
            info!("Using in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(db_url)
        .context("failed to create Pg pool")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(blogmod::repo::pg::PgRepo::new(pool)))
}

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable either the `inmem-store` or the `postgres-store` feature");
