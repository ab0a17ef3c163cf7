use crate::error::{Result, StorageError};
use crate::reader::{ReadStartingWithUserFilter, ReadUsersetTuplesFilter, TupleReader, TupleStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use rebac_models::{ObjectRef, StoredTuple, TupleKey, UserRef};
use sqlx::PgPool;

const STREAM_BUFFER: usize = 64;

/// Read-only Postgres tuple backend over the `relation_tuples` table.
///
/// Columns: `store_id`, `object_type`, `object_id`, `relation`,
/// `user_object_type`, `user_object_id` (`'*'` for the typed wildcard),
/// `user_relation` (non-null for userset users), `created_at`.
#[derive(Clone)]
pub struct PostgresTupleReader {
    pool: PgPool,
}

impl PostgresTupleReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TupleRow {
    object_type: String,
    object_id: String,
    relation: String,
    user_object_type: String,
    user_object_id: String,
    user_relation: Option<String>,
    created_at: DateTime<Utc>,
}

impl TupleRow {
    fn into_tuple(self) -> StoredTuple {
        let user = match self.user_relation {
            Some(relation) => UserRef::Userset {
                object: ObjectRef::new(&self.user_object_type, &self.user_object_id),
                relation,
            },
            None if self.user_object_id == "*" => UserRef::Wildcard {
                object_type: self.user_object_type,
            },
            None => UserRef::Object(ObjectRef::new(&self.user_object_type, &self.user_object_id)),
        };
        StoredTuple {
            key: TupleKey {
                object: ObjectRef::new(&self.object_type, &self.object_id),
                relation: self.relation,
                user,
            },
            timestamp: self.created_at,
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT object_type, object_id, relation, \
     user_object_type, user_object_id, user_relation, created_at FROM relation_tuples";

#[async_trait]
impl TupleReader for PostgresTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> Result<Option<StoredTuple>> {
        let user = match &key.user {
            UserRef::Object(user) => user,
            // Point lookups are only defined for concrete subjects.
            _ => return Ok(None),
        };

        let row = sqlx::query_as::<_, TupleRow>(&format!(
            "{} WHERE store_id = $1 AND object_type = $2 AND object_id = $3 \
             AND relation = $4 AND user_object_type = $5 AND user_object_id = $6 \
             AND user_relation IS NULL",
            SELECT_COLUMNS
        ))
        .bind(store_id)
        .bind(&key.object.object_type)
        .bind(&key.object.object_id)
        .bind(&key.relation)
        .bind(&user.object_type)
        .bind(&user.object_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TupleRow::into_tuple))
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: ReadUsersetTuplesFilter,
    ) -> Result<TupleStream> {
        let store_id = store_id.to_string();
        let pool = self.pool.clone();
        // Rows go through a bounded channel; the producer stops as soon as
        // the consumer drops the receiving half.
        let (mut tx, rx) = futures::channel::mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let sql = format!(
                "{} WHERE store_id = $1 AND object_type = $2 AND object_id = $3 \
                 AND relation = $4 ORDER BY created_at DESC",
                SELECT_COLUMNS
            );
            let mut rows = sqlx::query_as::<_, TupleRow>(&sql)
                .bind(store_id)
                .bind(filter.object.object_type.clone())
                .bind(filter.object.object_id.clone())
                .bind(filter.relation.clone())
                .fetch(&pool);

            while let Some(row) = rows.next().await {
                let item = match row {
                    Ok(row) => {
                        let tuple = row.into_tuple();
                        if !filter.admits(&tuple.key.user) {
                            continue;
                        }
                        Ok(tuple)
                    }
                    Err(err) => Err(StorageError::from(err)),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(rx))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: ReadStartingWithUserFilter,
    ) -> Result<TupleStream> {
        let store_id = store_id.to_string();
        let pool = self.pool.clone();
        let (mut tx, rx) = futures::channel::mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            // Dynamic user predicate, one disjunct per requested reference.
            let mut sql = format!(
                "{} WHERE store_id = $1 AND object_type = $2 AND relation = $3",
                SELECT_COLUMNS
            );
            if !filter.user_refs.is_empty() {
                let mut parts = Vec::new();
                let mut bind_count = 4;
                for user in &filter.user_refs {
                    match user {
                        UserRef::Object(_) | UserRef::Wildcard { .. } => {
                            parts.push(format!(
                                "(user_object_type = ${} AND user_object_id = ${} \
                                 AND user_relation IS NULL)",
                                bind_count,
                                bind_count + 1
                            ));
                            bind_count += 2;
                        }
                        UserRef::Userset { .. } => {
                            parts.push(format!(
                                "(user_object_type = ${} AND user_object_id = ${} \
                                 AND user_relation = ${})",
                                bind_count,
                                bind_count + 1,
                                bind_count + 2
                            ));
                            bind_count += 3;
                        }
                    }
                }
                sql.push_str(&format!(" AND ({})", parts.join(" OR ")));
            }
            sql.push_str(" ORDER BY created_at DESC");

            let mut query = sqlx::query_as::<_, TupleRow>(&sql)
                .bind(store_id)
                .bind(filter.object_type.clone())
                .bind(filter.relation.clone());
            for user in &filter.user_refs {
                query = match user {
                    UserRef::Object(o) => {
                        query.bind(o.object_type.clone()).bind(o.object_id.clone())
                    }
                    UserRef::Wildcard { object_type } => {
                        query.bind(object_type.clone()).bind("*".to_string())
                    }
                    UserRef::Userset { object, relation } => query
                        .bind(object.object_type.clone())
                        .bind(object.object_id.clone())
                        .bind(relation.clone()),
                };
            }

            let mut rows = query.fetch(&pool);
            while let Some(row) = rows.next().await {
                let item = row.map(TupleRow::into_tuple).map_err(StorageError::from);
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(rx))
    }
}
