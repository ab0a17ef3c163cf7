//! Shared data model for the ReBAC check core: relationship tuples, the
//! authorization model and its rewrite language, the read-only type-system
//! view, and the check request/response types.

pub mod check;
pub mod error;
pub mod schema;
pub mod tuple;
pub mod typesystem;

pub use check::{
    ConsistencyPreference, ResolutionMetadata, ResolveCheckRequest, ResolveCheckResponse,
};
pub use error::{ModelError, Result};
pub use schema::{
    AuthorizationModel, RelationMetadata, RelationRef, RelationReference, Rewrite, TypeDefinition,
    TypeMetadata,
};
pub use tuple::{ObjectRef, StoredTuple, TupleKey, UserRef};
pub use typesystem::TypeSystem;
