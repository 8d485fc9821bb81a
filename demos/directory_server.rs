use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use org_directory::api::{self, DirectoryApp, HasPool};
use org_directory::db::create_directory_tables;
use org_directory::search::ElasticIndex;
use org_directory::sync::{DirectorySync, PgOrganizationStore};

#[derive(Clone)]
struct ServerApp {
    pool: Arc<PgPool>,
    sync: Arc<DirectorySync>,
    api_token: String,
}

impl HasPool for ServerApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl DirectoryApp for ServerApp {
    fn sync(&self) -> Arc<DirectorySync> {
        Arc::clone(&self.sync)
    }

    fn api_token(&self) -> String {
        self.api_token.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url = env::var("DATABASE_URL")
        .context("DATABASE_URL is required to run demos/directory_server.rs")?;
    let elasticsearch_url =
        env::var("ELASTICSEARCH_URL").unwrap_or_else(|_| "http://127.0.0.1:9200".to_string());
    let api_token =
        env::var("DIRECTORY_API_TOKEN").context("DIRECTORY_API_TOKEN is required")?;
    let bind = env::var("DIRECTORY_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid DIRECTORY_BIND '{}'", bind))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    create_directory_tables(&pool)
        .await
        .context("failed to run directory migrations")?;

    let index = ElasticIndex::new(elasticsearch_url);
    index
        .ensure_index()
        .await
        .context("failed to prepare the search index")?;

    let pool = Arc::new(pool);
    let sync = Arc::new(DirectorySync::new(
        Arc::new(PgOrganizationStore::new(Arc::clone(&pool))),
        Arc::new(index),
    ));

    let app = ServerApp {
        pool,
        sync,
        api_token,
    };
    let router: Router = api::routes().with_state(app);

    tracing::info!(%bind_addr, "directory server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    axum::serve(listener, router)
        .await
        .context("server exited with an error")?;

    Ok(())
}
