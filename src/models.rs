use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};

/// Maximum depth of the category tree. Level-3 categories are leaf-only.
pub const MAX_CATEGORY_LEVEL: i32 = 3;

/// Accepted phone formats: 7 local digits, or 11 digits starting with 8.
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{7}$|^8\d{10}$").expect("phone pattern should compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct CategoryId(pub i32);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CategoryId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i32::from_str(s).map(Self)
    }
}

impl From<i32> for CategoryId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct OrganizationId(pub i32);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrganizationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i32::from_str(s).map(Self)
    }
}

impl From<i32> for OrganizationId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BuildingId(pub i32);

impl fmt::Display for BuildingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildingId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i32::from_str(s).map(Self)
    }
}

impl From<i32> for BuildingId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub level: i32,
}

/// One row of the parent-of relation. Unique per pair, and unique per child
/// (a category has at most one parent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEdge {
    pub parent_id: CategoryId,
    pub child_id: CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTree {
    pub id: CategoryId,
    pub name: String,
    pub level: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: BuildingId,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub phones: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_id: Option<BuildingId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Organization with its joined building and category associations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDetail {
    pub id: OrganizationId,
    pub name: String,
    pub phones: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<Building>,
    pub categories: Vec<Category>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryPayload {
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl CreateCategoryPayload {
    pub fn normalize(self) -> Result<NewCategory> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LibError::invalid(
                "Category name is required",
                anyhow!("empty category name"),
            ));
        }

        Ok(NewCategory {
            name,
            parent_id: self.parent_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryPayload {
    pub name: Option<String>,
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone)]
pub struct CategoryChanges {
    pub name: Option<String>,
    pub parent_id: Option<CategoryId>,
}

impl UpdateCategoryPayload {
    pub fn normalize(self) -> Result<CategoryChanges> {
        let name = match self.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(LibError::invalid(
                        "Category name cannot be blank",
                        anyhow!("empty category name"),
                    ));
                }
                Some(name)
            }
            None => None,
        };

        Ok(CategoryChanges {
            name,
            parent_id: self.parent_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationPayload {
    pub name: String,
    pub phones: Option<Vec<String>>,
    pub building_id: Option<BuildingId>,
}

#[derive(Debug, Clone)]
pub struct OrganizationDraft {
    pub name: String,
    pub phones: Vec<String>,
    pub building_id: Option<BuildingId>,
}

impl CreateOrganizationPayload {
    pub fn normalize(self) -> Result<OrganizationDraft> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LibError::invalid(
                "Organization name is required",
                anyhow!("empty organization name"),
            ));
        }

        Ok(OrganizationDraft {
            name,
            phones: normalize_phones(self.phones.unwrap_or_default())?,
            building_id: self.building_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrganizationPayload {
    pub name: Option<String>,
    pub phones: Option<Vec<String>>,
    pub building_id: Option<BuildingId>,
}

/// Partial organization update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub phones: Option<Vec<String>>,
    pub building_id: Option<BuildingId>,
}

impl UpdateOrganizationPayload {
    pub fn normalize(self) -> Result<OrganizationChanges> {
        let name = match self.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(LibError::invalid(
                        "Organization name cannot be blank",
                        anyhow!("empty organization name"),
                    ));
                }
                Some(name)
            }
            None => None,
        };

        let phones = match self.phones {
            Some(phones) => Some(normalize_phones(phones)?),
            None => None,
        };

        Ok(OrganizationChanges {
            name,
            phones,
            building_id: self.building_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuildingPayload {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct NewBuilding {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl CreateBuildingPayload {
    pub fn normalize(self) -> Result<NewBuilding> {
        let address = self.address.trim().to_string();
        if address.is_empty() {
            return Err(LibError::invalid(
                "Building address is required",
                anyhow!("empty building address"),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(LibError::invalid(
                "Latitude must be between -90 and 90",
                anyhow!("latitude {} out of range", self.latitude),
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(LibError::invalid(
                "Longitude must be between -180 and 180",
                anyhow!("longitude {} out of range", self.longitude),
            ));
        }

        Ok(NewBuilding {
            address,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub name: String,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(10).clamp(1, 100)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestQuery {
    pub max_depth: Option<u32>,
}

impl ForestQuery {
    pub fn max_depth(&self) -> u32 {
        self.max_depth
            .unwrap_or(MAX_CATEGORY_LEVEL as u32)
            .clamp(1, MAX_CATEGORY_LEVEL as u32)
    }
}

/// Deduplicates (order-preserving) and validates phone numbers.
pub fn normalize_phones(phones: Vec<String>) -> Result<Vec<String>> {
    let mut unique = Vec::with_capacity(phones.len());
    for phone in phones {
        let phone = phone.trim().to_string();
        if !PHONE_PATTERN.is_match(&phone) {
            return Err(LibError::invalid(
                "Phone numbers must be 7 digits, or 11 digits starting with 8",
                anyhow!("invalid phone number format: {}", phone),
            ));
        }
        if !unique.contains(&phone) {
            unique.push(phone);
        }
    }
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::{
        CreateCategoryPayload, CreateOrganizationPayload, SearchQuery, UpdateOrganizationPayload,
        normalize_phones,
    };

    #[test]
    fn normalize_category_trims_name() {
        let payload = CreateCategoryPayload {
            name: "  Food  ".to_string(),
            parent_id: None,
        };
        let normalized = payload.normalize().expect("payload should normalize");
        assert_eq!(normalized.name, "Food");
    }

    #[test]
    fn normalize_category_rejects_blank_name() {
        let payload = CreateCategoryPayload {
            name: "   ".to_string(),
            parent_id: None,
        };
        let err = payload.normalize().expect_err("blank name should fail");
        assert_eq!(err.public, "Category name is required");
    }

    #[test]
    fn normalize_phones_deduplicates_and_validates() {
        let phones = vec![
            "1234567".to_string(),
            "1234567".to_string(),
            "81234567890".to_string(),
        ];
        let normalized = normalize_phones(phones).expect("phones should validate");
        assert_eq!(normalized, vec!["1234567", "81234567890"]);
    }

    #[test]
    fn normalize_phones_rejects_bad_format() {
        let err = normalize_phones(vec!["12345".to_string()]).expect_err("short phone should fail");
        assert_eq!(err.code, "invalid_input");
    }

    #[test]
    fn normalize_organization_defaults_phones() {
        let payload = CreateOrganizationPayload {
            name: "Acme".to_string(),
            phones: None,
            building_id: None,
        };
        let draft = payload.normalize().expect("payload should normalize");
        assert!(draft.phones.is_empty());
    }

    #[test]
    fn normalize_update_keeps_unset_fields() {
        let payload = UpdateOrganizationPayload {
            name: None,
            phones: None,
            building_id: None,
        };
        let changes = payload.normalize().expect("empty patch should normalize");
        assert!(changes.name.is_none());
        assert!(changes.phones.is_none());
        assert!(changes.building_id.is_none());
    }

    #[test]
    fn search_query_clamps_limit() {
        let query = SearchQuery {
            name: "acme".to_string(),
            limit: Some(5000),
        };
        assert_eq!(query.limit(), 100);

        let query = SearchQuery {
            name: "acme".to_string(),
            limit: None,
        };
        assert_eq!(query.limit(), 10);
    }
}
