//! Shared data models.

pub mod connection;
pub mod document;

pub use connection::{Connection, ConnectionItem, StoreType};
pub use document::{
    BoolResult, CollectionRequest, CountResult, DatabaseRequest, FilterRequest, FindBatch,
    FindOneResult, InsertManyRequest, InsertManyResult, InsertOneRequest, InsertOneResult,
    MutateRequest, PingResult, QueryRequest,
};
