use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool};

use crate::error::{LibError, Result};
use crate::models::{
    Building, BuildingId, Category, CategoryChanges, CategoryEdge, CategoryId, CategoryTree,
    NewBuilding, NewCategory, Organization, OrganizationChanges, OrganizationDetail,
    OrganizationDraft, OrganizationId,
};
use crate::tree;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_directory_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct CategoryRow {
    id: i32,
    name: String,
    level: i32,
}

#[derive(Debug, Clone, FromRow)]
struct CategoryEdgeRow {
    parent_id: i32,
    child_id: i32,
}

#[derive(Debug, Clone, FromRow)]
struct OrganizationRow {
    id: i32,
    name: String,
    phones: Vec<String>,
    building_id: Option<i32>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct BuildingRow {
    id: i32,
    address: String,
    latitude: f64,
    longitude: f64,
}

impl From<CategoryRow> for Category {
    fn from(value: CategoryRow) -> Self {
        Self {
            id: CategoryId(value.id),
            name: value.name,
            level: value.level,
        }
    }
}

impl From<CategoryEdgeRow> for CategoryEdge {
    fn from(value: CategoryEdgeRow) -> Self {
        Self {
            parent_id: CategoryId(value.parent_id),
            child_id: CategoryId(value.child_id),
        }
    }
}

impl From<OrganizationRow> for Organization {
    fn from(value: OrganizationRow) -> Self {
        Self {
            id: OrganizationId(value.id),
            name: value.name,
            phones: value.phones,
            building_id: value.building_id.map(BuildingId),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<BuildingRow> for Building {
    fn from(value: BuildingRow) -> Self {
        Self {
            id: BuildingId(value.id),
            address: value.address,
            latitude: value.latitude,
            longitude: value.longitude,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

/// Maps uniqueness/foreign-key violations onto the client-facing taxonomy;
/// everything else stays a database error.
fn constraint_err(public: &'static str, err: sqlx::Error) -> LibError {
    let constraint = match &err {
        sqlx::Error::Database(db) => db.constraint().map(|name| name.to_string()),
        _ => None,
    };

    match constraint.as_deref() {
        Some("organizations_building_id_fkey") => {
            LibError::not_found("Building not found", anyhow!(err))
        }
        Some("organization_categories_unique_pair") => LibError::conflict(
            "Category is already linked to this organization",
            anyhow!(err),
        ),
        Some("category_edges_unique_pair") | Some("category_edges_unique_child") => {
            LibError::conflict("Category hierarchy link already exists", anyhow!(err))
        }
        Some(_) => LibError::conflict("Data conflicts with an existing record", anyhow!(err)),
        None => db_err(public, err),
    }
}

async fn fetch_category<'e, E>(executor: E, category_id: CategoryId) -> Result<Option<CategoryRow>>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT id, name, level
        FROM directory.categories
        WHERE id = $1
        "#,
    )
    .bind(category_id.0)
    .fetch_optional(executor)
    .await
    .map_err(|err| db_err("Failed to query category", err))
}

pub async fn get_category(pool: &PgPool, category_id: CategoryId) -> Result<Category> {
    let row = fetch_category(pool, category_id).await?;
    row.map(Category::from).ok_or_else(|| {
        LibError::not_found(
            "Category not found",
            anyhow!("category {} not found", category_id),
        )
    })
}

pub async fn list_categories(pool: &PgPool) -> Result<Vec<Category>> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT id, name, level
        FROM directory.categories
        ORDER BY level ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list categories", err))?;

    Ok(rows.into_iter().map(Category::from).collect())
}

pub async fn list_category_edges(pool: &PgPool) -> Result<Vec<CategoryEdge>> {
    let rows = sqlx::query_as::<_, CategoryEdgeRow>(
        r#"
        SELECT parent_id, child_id
        FROM directory.category_edges
        ORDER BY parent_id ASC, child_id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list category edges", err))?;

    Ok(rows.into_iter().map(CategoryEdge::from).collect())
}

/// Loads a snapshot of the hierarchy and reconstructs the root-rooted forest.
pub async fn get_forest(pool: &PgPool, max_depth: u32) -> Result<Vec<CategoryTree>> {
    let categories = list_categories(pool).await?;
    let edges = list_category_edges(pool).await?;
    Ok(tree::build_forest(&categories, &edges, max_depth))
}

/// Creates a category. With a parent the node and its inbound edge are
/// written in one transaction; the node never exists without the edge.
pub async fn create_category(pool: &PgPool, payload: NewCategory) -> Result<Category> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let level = match payload.parent_id {
        Some(parent_id) => {
            let parent = fetch_category(&mut *tx, parent_id).await?.ok_or_else(|| {
                LibError::not_found(
                    "Parent category not found",
                    anyhow!("parent category {} not found", parent_id),
                )
            })?;
            tree::child_level(parent.level)?
        }
        None => 1,
    };

    let row = sqlx::query_as::<_, CategoryRow>(
        r#"
        INSERT INTO directory.categories (name, level)
        VALUES ($1, $2)
        RETURNING id, name, level
        "#,
    )
    .bind(&payload.name)
    .bind(level)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| constraint_err("Failed to create category", err))?;

    if let Some(parent_id) = payload.parent_id {
        sqlx::query(
            r#"
            INSERT INTO directory.category_edges (parent_id, child_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(parent_id.0)
        .bind(row.id)
        .execute(&mut *tx)
        .await
        .map_err(|err| constraint_err("Failed to link category to parent", err))?;
    }

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(Category::from(row))
}

/// Renames and/or reparents a category. Reparenting is a lateral move: the
/// node keeps its level and only its single inbound edge is redirected.
pub async fn update_category(
    pool: &PgPool,
    category_id: CategoryId,
    changes: CategoryChanges,
) -> Result<Category> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let current = fetch_category(&mut *tx, category_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Category not found",
            anyhow!("category {} not found", category_id),
        )
    })?;

    if let Some(parent_id) = changes.parent_id {
        let parent = fetch_category(&mut *tx, parent_id).await?.ok_or_else(|| {
            LibError::not_found(
                "Parent category not found",
                anyhow!("parent category {} not found", parent_id),
            )
        })?;
        tree::ensure_reparent_allowed(current.level, parent.level)?;

        sqlx::query(
            r#"
            UPDATE directory.category_edges
            SET parent_id = $1
            WHERE child_id = $2
            "#,
        )
        .bind(parent_id.0)
        .bind(category_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|err| constraint_err("Failed to reparent category", err))?;
    }

    let row = match changes.name {
        Some(name) => sqlx::query_as::<_, CategoryRow>(
            r#"
            UPDATE directory.categories
            SET name = $1
            WHERE id = $2
            RETURNING id, name, level
            "#,
        )
        .bind(&name)
        .bind(category_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to update category", err))?,
        None => current,
    };

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(Category::from(row))
}

/// Deletes a category. Level-3 nodes go unconditionally; level-1/2 nodes
/// must be childless. The children check and the deletes share one
/// transaction so they see the same snapshot.
pub async fn delete_category(pool: &PgPool, category_id: CategoryId) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let current = fetch_category(&mut *tx, category_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Category not found",
            anyhow!("category {} not found", category_id),
        )
    })?;

    let children: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM directory.category_edges
        WHERE parent_id = $1
        "#,
    )
    .bind(category_id.0)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to query child categories", err))?;

    tree::ensure_deletable(current.level, children.0)?;

    sqlx::query(
        r#"
        DELETE FROM directory.category_edges
        WHERE parent_id = $1 OR child_id = $1
        "#,
    )
    .bind(category_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete category edges", err))?;

    sqlx::query(
        r#"
        DELETE FROM directory.categories
        WHERE id = $1
        "#,
    )
    .bind(category_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete category", err))?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(())
}

/// Category-tree organization lookup is only offered for level-1 seeds.
pub async fn ensure_root_category(pool: &PgPool, category_id: CategoryId) -> Result<()> {
    let category = get_category(pool, category_id).await?;
    if category.level != 1 {
        return Err(LibError::invalid(
            "Only level-1 categories can seed a tree lookup",
            anyhow!("category {} has level {}", category_id, category.level),
        ));
    }
    Ok(())
}

pub async fn find_organization(
    pool: &PgPool,
    organization_id: OrganizationId,
) -> Result<Option<Organization>> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, phones, building_id, created_at, updated_at
        FROM directory.organizations
        WHERE id = $1
        "#,
    )
    .bind(organization_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query organization", err))?;

    Ok(row.map(Organization::from))
}

pub async fn get_organization(
    pool: &PgPool,
    organization_id: OrganizationId,
) -> Result<Organization> {
    find_organization(pool, organization_id)
        .await?
        .ok_or_else(|| {
            LibError::not_found(
                "Organization not found",
                anyhow!("organization {} not found", organization_id),
            )
        })
}

pub async fn get_organization_detail(
    pool: &PgPool,
    organization_id: OrganizationId,
) -> Result<OrganizationDetail> {
    let organization = get_organization(pool, organization_id).await?;

    let building = match organization.building_id {
        Some(building_id) => Some(get_building(pool, building_id).await?),
        None => None,
    };

    let categories = sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT c.id, c.name, c.level
        FROM directory.categories c
        JOIN directory.organization_categories oc
          ON oc.category_id = c.id
        WHERE oc.organization_id = $1
        ORDER BY c.level ASC, c.id ASC
        "#,
    )
    .bind(organization_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query organization categories", err))?;

    Ok(OrganizationDetail {
        id: organization.id,
        name: organization.name,
        phones: organization.phones,
        building,
        categories: categories.into_iter().map(Category::from).collect(),
        created_at: organization.created_at,
        updated_at: organization.updated_at,
    })
}

pub async fn list_organizations(pool: &PgPool) -> Result<Vec<Organization>> {
    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, phones, building_id, created_at, updated_at
        FROM directory.organizations
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list organizations", err))?;

    Ok(rows.into_iter().map(Organization::from).collect())
}

pub async fn get_organizations_by_ids(
    pool: &PgPool,
    ids: &[OrganizationId],
) -> Result<Vec<Organization>> {
    let raw_ids: Vec<i32> = ids.iter().map(|id| id.0).collect();
    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, phones, building_id, created_at, updated_at
        FROM directory.organizations
        WHERE id = ANY($1)
        "#,
    )
    .bind(&raw_ids)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query organizations", err))?;

    Ok(rows.into_iter().map(Organization::from).collect())
}

pub async fn create_organization(
    pool: &PgPool,
    draft: OrganizationDraft,
) -> Result<Organization> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        INSERT INTO directory.organizations (name, phones, building_id)
        VALUES ($1, $2, $3)
        RETURNING id, name, phones, building_id, created_at, updated_at
        "#,
    )
    .bind(&draft.name)
    .bind(&draft.phones)
    .bind(draft.building_id.map(|id| id.0))
    .fetch_one(pool)
    .await
    .map_err(|err| constraint_err("Failed to create organization", err))?;

    Ok(Organization::from(row))
}

pub async fn update_organization(
    pool: &PgPool,
    organization_id: OrganizationId,
    changes: OrganizationChanges,
) -> Result<Organization> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        UPDATE directory.organizations
        SET name = COALESCE($1, name),
            phones = COALESCE($2, phones),
            building_id = COALESCE($3, building_id),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
        RETURNING id, name, phones, building_id, created_at, updated_at
        "#,
    )
    .bind(changes.name.as_deref())
    .bind(changes.phones.as_deref())
    .bind(changes.building_id.map(|id| id.0))
    .bind(organization_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| constraint_err("Failed to update organization", err))?;

    row.map(Organization::from).ok_or_else(|| {
        LibError::not_found(
            "Organization not found",
            anyhow!("organization {} not found", organization_id),
        )
    })
}

/// Deletes the organization; association rows cascade, category nodes stay.
pub async fn delete_organization(pool: &PgPool, organization_id: OrganizationId) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM directory.organizations
        WHERE id = $1
        "#,
    )
    .bind(organization_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to delete organization", err))?;

    if result.rows_affected() == 0 {
        return Err(LibError::not_found(
            "Organization not found",
            anyhow!("organization {} not found", organization_id),
        ));
    }

    Ok(())
}

pub async fn add_organization_category(
    pool: &PgPool,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> Result<()> {
    get_organization(pool, organization_id).await?;
    get_category(pool, category_id).await?;

    sqlx::query(
        r#"
        INSERT INTO directory.organization_categories (organization_id, category_id)
        VALUES ($1, $2)
        "#,
    )
    .bind(organization_id.0)
    .bind(category_id.0)
    .execute(pool)
    .await
    .map_err(|err| constraint_err("Failed to link category to organization", err))?;

    Ok(())
}

pub async fn remove_organization_category(
    pool: &PgPool,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM directory.organization_categories
        WHERE organization_id = $1
          AND category_id = $2
        "#,
    )
    .bind(organization_id.0)
    .bind(category_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to unlink category from organization", err))?;

    if result.rows_affected() == 0 {
        return Err(LibError::invalid(
            "Category is not linked to this organization",
            anyhow!(
                "organization {} has no link to category {}",
                organization_id,
                category_id
            ),
        ));
    }

    Ok(())
}

pub async fn organizations_by_building(
    pool: &PgPool,
    building_id: BuildingId,
) -> Result<Vec<Organization>> {
    get_building(pool, building_id).await?;

    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, phones, building_id, created_at, updated_at
        FROM directory.organizations
        WHERE building_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(building_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query organizations by building", err))?;

    Ok(rows.into_iter().map(Organization::from).collect())
}

pub async fn organizations_by_category(
    pool: &PgPool,
    category_id: CategoryId,
) -> Result<Vec<Organization>> {
    get_category(pool, category_id).await?;

    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT o.id, o.name, o.phones, o.building_id, o.created_at, o.updated_at
        FROM directory.organizations o
        JOIN directory.organization_categories oc
          ON oc.organization_id = o.id
        WHERE oc.category_id = $1
        ORDER BY o.id ASC
        "#,
    )
    .bind(category_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query organizations by category", err))?;

    Ok(rows.into_iter().map(Organization::from).collect())
}

/// Organizations linked anywhere under `category_id`: the seed plus the
/// closure of its descendants.
pub async fn organizations_by_category_tree(
    pool: &PgPool,
    category_id: CategoryId,
) -> Result<Vec<Organization>> {
    get_category(pool, category_id).await?;

    let edges = list_category_edges(pool).await?;
    let mut scope: Vec<i32> = tree::descendants_of(category_id, &edges)
        .into_iter()
        .map(|id| id.0)
        .collect();
    scope.push(category_id.0);

    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT DISTINCT o.id, o.name, o.phones, o.building_id, o.created_at, o.updated_at
        FROM directory.organizations o
        JOIN directory.organization_categories oc
          ON oc.organization_id = o.id
        WHERE oc.category_id = ANY($1)
        ORDER BY o.id ASC
        "#,
    )
    .bind(&scope)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query organizations by category tree", err))?;

    Ok(rows.into_iter().map(Organization::from).collect())
}

pub async fn create_building(pool: &PgPool, building: NewBuilding) -> Result<Building> {
    let row = sqlx::query_as::<_, BuildingRow>(
        r#"
        INSERT INTO directory.buildings (address, latitude, longitude)
        VALUES ($1, $2, $3)
        RETURNING id, address, latitude, longitude
        "#,
    )
    .bind(&building.address)
    .bind(building.latitude)
    .bind(building.longitude)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to create building", err))?;

    Ok(Building::from(row))
}

pub async fn get_building(pool: &PgPool, building_id: BuildingId) -> Result<Building> {
    let row = sqlx::query_as::<_, BuildingRow>(
        r#"
        SELECT id, address, latitude, longitude
        FROM directory.buildings
        WHERE id = $1
        "#,
    )
    .bind(building_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query building", err))?;

    row.map(Building::from).ok_or_else(|| {
        LibError::not_found(
            "Building not found",
            anyhow!("building {} not found", building_id),
        )
    })
}

pub async fn list_buildings(pool: &PgPool) -> Result<Vec<Building>> {
    let rows = sqlx::query_as::<_, BuildingRow>(
        r#"
        SELECT id, address, latitude, longitude
        FROM directory.buildings
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list buildings", err))?;

    Ok(rows.into_iter().map(Building::from).collect())
}
