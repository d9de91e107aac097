//! Supported collections and their typed payloads.
//!
//! Each collection carries its own data struct. Fields are optional so one
//! struct serves both as a full insert snapshot and as a partial update.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Entity types that are tracked by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Buildings and lots under management
    Properties,
    /// Rentable units inside a property
    Units,
    /// People renting units
    Tenants,
    /// Rental agreements between a tenant and a unit
    Leases,
    /// Maintenance and admin tasks
    Tasks,
}

impl Collection {
    /// Every supported collection.
    pub const ALL: [Self; 5] = [
        Self::Properties,
        Self::Units,
        Self::Tenants,
        Self::Leases,
        Self::Tasks,
    ];

    /// Name used in storage and in remote paths.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Units => "units",
            Self::Tenants => "tenants",
            Self::Leases => "leases",
            Self::Tasks => "tasks",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SyncError::Parse(format!("Unknown collection: {s}")))
    }
}

/// Payload for the `properties` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payload for the `units` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    /// Rent in the smallest currency unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_rent_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupied: Option<bool>,
}

/// Payload for the `tenants` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

/// Payload for the `leases` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_rent_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_cents: Option<i64>,
}

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
}

/// Urgency of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Payload for the `tasks` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

/// A typed record payload, tagged by its collection.
///
/// Serializes to the bare data object, which is what is stored in the queue
/// and sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Property(PropertyData),
    Unit(UnitData),
    Tenant(TenantData),
    Lease(LeaseData),
    Task(TaskData),
}

impl Record {
    /// The collection this record belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Property(_) => Collection::Properties,
            Self::Unit(_) => Collection::Units,
            Self::Tenant(_) => Collection::Tenants,
            Self::Lease(_) => Collection::Leases,
            Self::Task(_) => Collection::Tasks,
        }
    }

    /// Decode a stored JSON payload for the given collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the collection's shape.
    pub fn from_payload(collection: Collection, payload: &str) -> Result<Self, serde_json::Error> {
        Ok(match collection {
            Collection::Properties => Self::Property(serde_json::from_str(payload)?),
            Collection::Units => Self::Unit(serde_json::from_str(payload)?),
            Collection::Tenants => Self::Tenant(serde_json::from_str(payload)?),
            Collection::Leases => Self::Lease(serde_json::from_str(payload)?),
            Collection::Tasks => Self::Task(serde_json::from_str(payload)?),
        })
    }

    /// Encode the record as the JSON stored in the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
