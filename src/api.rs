use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::db;
use crate::error::{ErrorKind, LibError};
use crate::models::{
    BuildingId, CategoryId, CreateBuildingPayload, CreateCategoryPayload,
    CreateOrganizationPayload, ForestQuery, OrganizationId, SearchQuery, UpdateCategoryPayload,
    UpdateOrganizationPayload,
};
use crate::sync::DirectorySync;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::DepthExceeded => StatusCode::FORBIDDEN,
            ErrorKind::InvalidReparent => StatusCode::FORBIDDEN,
            ErrorKind::HasChildren => StatusCode::CONFLICT,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            // Distinct from primary-store 500s so operators can spot
            // mirror drift from the status alone.
            ErrorKind::SyncFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source,
            "directory api request failed");
        (
            status,
            Json(json!({ "code": self.0.code, "message": self.0.public })),
        )
            .into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

pub trait DirectoryApp: HasPool {
    fn sync(&self) -> Arc<DirectorySync>;
    /// Shared bearer token every request must present.
    fn api_token(&self) -> String;
}

/// Extractor guard: checks the shared bearer token before any handler runs.
pub struct Authorized;

impl<S> FromRequestParts<S> for Authorized
where
    S: DirectoryApp + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError(LibError::unauthorized(
                    "Missing bearer token",
                    anyhow!("request without authorization header"),
                ))
            })?;

        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        if token != state.api_token() {
            return Err(AppError(LibError::unauthorized(
                "Invalid bearer token",
                anyhow!("request with mismatched bearer token"),
            )));
        }

        Ok(Authorized)
    }
}

async fn get_forest_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Query(query): Query<ForestQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let forest = db::get_forest(&app.pool(), query.max_depth()).await?;
    Ok(Json(forest))
}

async fn get_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(category_id): Path<CategoryId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let category = db::get_category(&app.pool(), category_id).await?;
    Ok(Json(category))
}

async fn create_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Json(payload): Json<CreateCategoryPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let category = db::create_category(&app.pool(), payload.normalize()?).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(category_id): Path<CategoryId>,
    Json(payload): Json<UpdateCategoryPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let category = db::update_category(&app.pool(), category_id, payload.normalize()?).await?;
    Ok(Json(category))
}

async fn delete_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(category_id): Path<CategoryId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    db::delete_category(&app.pool(), category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_organizations_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organizations = db::list_organizations(&app.pool()).await?;
    Ok(Json(organizations))
}

async fn get_organization_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let detail = db::get_organization_detail(&app.pool(), organization_id).await?;
    Ok(Json(detail))
}

async fn create_organization_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Json(payload): Json<CreateOrganizationPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organization = app.sync().create_organization(payload.normalize()?).await?;
    Ok((StatusCode::CREATED, Json(organization)))
}

async fn update_organization_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(organization_id): Path<OrganizationId>,
    Json(payload): Json<UpdateOrganizationPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organization = app
        .sync()
        .update_organization(organization_id, payload.normalize()?)
        .await?;
    Ok(Json(organization))
}

async fn delete_organization_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(organization_id): Path<OrganizationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    app.sync().delete_organization(organization_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_organization_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path((organization_id, category_id)): Path<(OrganizationId, CategoryId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    db::add_organization_category(&app.pool(), organization_id, category_id).await?;
    let detail = db::get_organization_detail(&app.pool(), organization_id).await?;
    Ok(Json(detail))
}

async fn remove_organization_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path((organization_id, category_id)): Path<(OrganizationId, CategoryId)>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    db::remove_organization_category(&app.pool(), organization_id, category_id).await?;
    let detail = db::get_organization_detail(&app.pool(), organization_id).await?;
    Ok(Json(detail))
}

async fn organizations_by_building_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(building_id): Path<BuildingId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organizations = db::organizations_by_building(&app.pool(), building_id).await?;
    Ok(Json(organizations))
}

async fn organizations_by_category_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(category_id): Path<CategoryId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organizations = db::organizations_by_category(&app.pool(), category_id).await?;
    Ok(Json(organizations))
}

async fn organizations_by_category_tree_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Path(category_id): Path<CategoryId>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    db::ensure_root_category(&app.pool(), category_id).await?;
    let organizations = db::organizations_by_category_tree(&app.pool(), category_id).await?;
    Ok(Json(organizations))
}

async fn search_organizations_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let organizations = app
        .sync()
        .search_organizations(&query.name, query.limit())
        .await?;
    Ok(Json(organizations))
}

async fn reindex_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let count = app.sync().reindex_all().await?;
    Ok(Json(json!({ "indexed": count })))
}

async fn create_building_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
    Json(payload): Json<CreateBuildingPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let building = db::create_building(&app.pool(), payload.normalize()?).await?;
    Ok((StatusCode::CREATED, Json(building)))
}

async fn list_buildings_handler<S>(
    State(app): State<S>,
    _auth: Authorized,
) -> Result<impl IntoResponse, AppError>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    let buildings = db::list_buildings(&app.pool()).await?;
    Ok(Json(buildings))
}

pub fn routes<S>() -> Router<S>
where
    S: DirectoryApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /categories [GET,POST]");
    tracing::info!("Registering route /categories/{{category_id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /organizations [GET,POST]");
    tracing::info!("Registering route /organizations/{{organization_id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /buildings [GET,POST]");

    Router::new()
        .route(
            "/categories",
            get(get_forest_handler::<S>).post(create_category_handler::<S>),
        )
        .route(
            "/categories/{category_id}",
            get(get_category_handler::<S>)
                .patch(update_category_handler::<S>)
                .delete(delete_category_handler::<S>),
        )
        .route(
            "/organizations",
            get(list_organizations_handler::<S>).post(create_organization_handler::<S>),
        )
        .route(
            "/organizations/search",
            get(search_organizations_handler::<S>),
        )
        .route("/organizations/reindex", post(reindex_handler::<S>))
        .route(
            "/organizations/by-building/{building_id}",
            get(organizations_by_building_handler::<S>),
        )
        .route(
            "/organizations/by-category/{category_id}",
            get(organizations_by_category_handler::<S>),
        )
        .route(
            "/organizations/by-category-tree/{category_id}",
            get(organizations_by_category_tree_handler::<S>),
        )
        .route(
            "/organizations/{organization_id}",
            get(get_organization_handler::<S>)
                .patch(update_organization_handler::<S>)
                .delete(delete_organization_handler::<S>),
        )
        .route(
            "/organizations/{organization_id}/categories/{category_id}",
            post(add_organization_category_handler::<S>)
                .delete(remove_organization_category_handler::<S>),
        )
        .route(
            "/buildings",
            get(list_buildings_handler::<S>).post(create_building_handler::<S>),
        )
}
