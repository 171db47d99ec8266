//! Document operation request and response models.
//!
//! Filters, values, documents and options travel as JSON-encoded strings; the
//! gateway never looks inside them beyond the `fields` projection list.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Target database.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatabaseRequest {
    pub database: String,
}

/// Target collection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CollectionRequest {
    pub database: String,
    pub collection: String,
}

/// Filter-only operation (count, delete, delete-one).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FilterRequest {
    pub database: String,
    pub collection: String,
    /// JSON filter; empty matches everything.
    #[serde(default)]
    pub query: String,
    /// Backend-specific JSON options.
    #[serde(default)]
    pub options: String,
}

/// Read operation with optional projection (find, find-one).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub query: String,
    /// Fields to project, in output order. Empty returns whole documents.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub options: String,
}

/// Filter plus new value (update, update-one, replace-one).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MutateRequest {
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub query: String,
    /// JSON update document or replacement.
    pub value: String,
    #[serde(default)]
    pub options: String,
}

/// Single document insert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InsertOneRequest {
    pub database: String,
    pub collection: String,
    /// JSON document.
    pub json_str: String,
    #[serde(default)]
    pub options: String,
}

/// One message of an insert-many stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InsertManyRequest {
    /// Connection id.
    pub id: String,
    pub database: String,
    pub collection: String,
    /// JSON array of documents.
    pub json_str: String,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoolResult {
    pub result: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PingResult {
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CountResult {
    pub result: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InsertOneResult {
    /// JSON-encoded backend-assigned identifier.
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InsertManyResult {
    /// JSON array of backend-assigned identifiers, in stream order.
    pub ids: String,
}

/// One message of a find stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FindBatch {
    /// JSON array of at most one batch of results.
    pub json_str: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FindOneResult {
    pub json_str: String,
}
