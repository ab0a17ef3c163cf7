//! Read-only tuple storage facade consumed by the check core, with
//! in-memory and Postgres backends and the per-request contextual-tuple
//! overlay.

pub mod contextual;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod reader;

pub use contextual::ContextualTupleReader;
pub use error::{Result, StorageError};
pub use memory::MemoryTupleStore;
pub use postgres::PostgresTupleReader;
pub use reader::{ReadStartingWithUserFilter, ReadUsersetTuplesFilter, TupleReader, TupleStream};
