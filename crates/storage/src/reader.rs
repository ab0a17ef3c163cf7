use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use rebac_models::{ObjectRef, RelationReference, StoredTuple, TupleKey, UserRef};

/// Streamed scan results. Consumers drop the stream to abandon a scan;
/// backends must stop producing once the receiver is gone.
pub type TupleStream = BoxStream<'static, Result<StoredTuple>>;

/// Scan filter for tuples of `(object, relation)` whose user can feed
/// userset expansion: userset references, typed wildcards, and (for
/// tupleset relations) plain object references.
#[derive(Debug, Clone)]
pub struct ReadUsersetTuplesFilter {
    pub object: ObjectRef,
    pub relation: String,
    /// When non-empty, only users admissible under these references are
    /// produced.
    pub allowed_user_type_restrictions: Vec<RelationReference>,
}

impl ReadUsersetTuplesFilter {
    /// Whether a stored user belongs in this scan's results.
    pub fn admits(&self, user: &UserRef) -> bool {
        if self.allowed_user_type_restrictions.is_empty() {
            return true;
        }
        self.allowed_user_type_restrictions
            .iter()
            .any(|r| match user {
                UserRef::Object(o) => {
                    !r.is_wildcard() && r.relation.is_none() && r.type_name == o.object_type
                }
                UserRef::Userset { object, relation } => {
                    r.type_name == object.object_type
                        && r.relation.as_deref() == Some(relation.as_str())
                }
                UserRef::Wildcard { object_type } => {
                    r.is_wildcard() && r.type_name == *object_type
                }
            })
    }
}

/// Reverse scan filter: all tuples of `(object_type, relation)` whose user
/// is one of the given references.
#[derive(Debug, Clone)]
pub struct ReadStartingWithUserFilter {
    pub object_type: String,
    pub relation: String,
    pub user_refs: Vec<UserRef>,
}

impl ReadStartingWithUserFilter {
    pub fn admits(&self, user: &UserRef) -> bool {
        self.user_refs.iter().any(|u| u == user)
    }
}

/// The three tuple-read operations the check core consumes. Implementations
/// must be safe for concurrent use.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Point lookup for an exact `(object, relation, user)` triple. Only
    /// meaningful when `user` is a concrete subject; a missing tuple is
    /// `Ok(None)`.
    async fn read_user_tuple(&self, store_id: &str, key: &TupleKey)
        -> Result<Option<StoredTuple>>;

    /// Scan tuples for `(object, relation)` whose user is a userset or
    /// typed wildcard.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: ReadUsersetTuplesFilter,
    ) -> Result<TupleStream>;

    /// Reverse scan by user, shared with the ListObjects side of the
    /// system.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: ReadStartingWithUserFilter,
    ) -> Result<TupleStream>;
}
