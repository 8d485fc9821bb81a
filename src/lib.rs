#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod search;
pub mod sync;
pub mod tree;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{DirectoryApp, HasPool};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{
        create_category, create_directory_tables, create_organization, delete_category,
        delete_organization, get_category, get_forest, get_organization, list_organizations,
        organizations_by_category_tree, update_category, update_organization,
    };
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::models::{
        Category, CategoryEdge, CategoryId, CategoryTree, CreateCategoryPayload,
        CreateOrganizationPayload, MAX_CATEGORY_LEVEL, Organization, OrganizationDetail,
        OrganizationId, UpdateCategoryPayload, UpdateOrganizationPayload,
    };
    pub use crate::search::{ElasticIndex, SearchIndex};
    #[cfg(feature = "sqlx")]
    pub use crate::sync::PgOrganizationStore;
    pub use crate::sync::{DirectorySync, OrganizationStore};
    pub use crate::tree::{build_forest, descendants_of};
}
