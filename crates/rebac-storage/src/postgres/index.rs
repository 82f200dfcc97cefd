use std::collections::BTreeSet;

use sqlx::PgPool;

use rebac_core::index::{ActorIndexEntry, IndexKey};
use rebac_core::tuple::{ObjectRef, SubjectRef};

use crate::traits::{ActorIndexStore, Page, StorageError};

use super::queries::to_storage_error;

const KEY_CONDITION: &str = "root_type = $1 AND root_id = $2 AND relation = $3 \
                             AND object_type = $4 AND object_id = $5";

#[derive(Debug, Clone)]
pub struct PostgresIndexStore {
    pool: PgPool,
    schema: String,
}

impl PostgresIndexStore {
    pub(super) fn new(pool: PgPool, schema: String) -> Self {
        Self { pool, schema }
    }

    async fn insert_members<'e>(
        &self,
        executor: impl sqlx::PgExecutor<'e>,
        entry: &ActorIndexEntry,
    ) -> Result<(), StorageError> {
        let schema = &self.schema;
        let query = format!(
            r#"
            INSERT INTO {schema}.actor_index
                (root_type, root_id, relation, object_type, object_id, member_type, member_id)
            SELECT $1, $2, $3, $4, $5, m.member_type, m.member_id
            FROM unnest($6::text[], $7::text[]) AS m(member_type, member_id)
            ON CONFLICT DO NOTHING
            "#
        );
        let (types, ids): (Vec<String>, Vec<String>) = entry
            .members
            .iter()
            .map(|m| (m.subject_type.clone(), m.subject_id.clone()))
            .unzip();
        let key = &entry.key;

        sqlx::query(&query)
            .bind(&key.root.subject_type)
            .bind(&key.root.subject_id)
            .bind(&key.relation)
            .bind(&key.object.object_type)
            .bind(&key.object.object_id)
            .bind(types)
            .bind(ids)
            .execute(executor)
            .await
            .map_err(to_storage_error)?;
        Ok(())
    }

    async fn delete_entry<'e>(
        &self,
        executor: impl sqlx::PgExecutor<'e>,
        key: &IndexKey,
    ) -> Result<(), StorageError> {
        let schema = &self.schema;
        let query = format!("DELETE FROM {schema}.actor_index WHERE {KEY_CONDITION}");
        sqlx::query(&query)
            .bind(&key.root.subject_type)
            .bind(&key.root.subject_id)
            .bind(&key.relation)
            .bind(&key.object.object_type)
            .bind(&key.object.object_id)
            .execute(executor)
            .await
            .map_err(to_storage_error)?;
        Ok(())
    }
}

impl ActorIndexStore for PostgresIndexStore {
    async fn upsert_union(&self, entry: &ActorIndexEntry) -> Result<(), StorageError> {
        self.insert_members(&self.pool, entry).await
    }

    async fn replace(&self, entry: &ActorIndexEntry) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;
        self.delete_entry(&mut *tx, &entry.key).await?;
        self.insert_members(&mut *tx, entry).await?;
        tx.commit().await.map_err(to_storage_error)
    }

    async fn remove(&self, key: &IndexKey) -> Result<(), StorageError> {
        self.delete_entry(&self.pool, key).await
    }

    async fn get(&self, key: &IndexKey) -> Result<Option<ActorIndexEntry>, StorageError> {
        let schema = &self.schema;
        let query = format!(
            "SELECT member_type, member_id FROM {schema}.actor_index WHERE {KEY_CONDITION}"
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .bind(&key.root.subject_type)
            .bind(&key.root.subject_id)
            .bind(&key.relation)
            .bind(&key.object.object_type)
            .bind(&key.object.object_id)
            .fetch_all(&self.pool)
            .await
            .map_err(to_storage_error)?;

        if rows.is_empty() {
            return Ok(None);
        }
        let members: BTreeSet<SubjectRef> = rows
            .into_iter()
            .map(|(t, id)| SubjectRef::new(t, id))
            .collect();
        Ok(Some(ActorIndexEntry {
            key: key.clone(),
            members,
        }))
    }

    async fn contains(
        &self,
        relation: &str,
        object: &ObjectRef,
        subject: &SubjectRef,
    ) -> Result<bool, StorageError> {
        let schema = &self.schema;
        let query = format!(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM {schema}.actor_index
                WHERE relation = $1 AND object_type = $2 AND object_id = $3
                  AND member_type = $4 AND member_id = $5
            )
            "#
        );
        let row: (bool,) = sqlx::query_as(&query)
            .bind(relation)
            .bind(&object.object_type)
            .bind(&object.object_id)
            .bind(&subject.subject_type)
            .bind(&subject.subject_id)
            .fetch_one(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(row.0)
    }

    async fn objects_for_member(
        &self,
        subject: &SubjectRef,
        relation: &str,
    ) -> Result<Vec<ObjectRef>, StorageError> {
        let schema = &self.schema;
        let query = format!(
            r#"
            SELECT DISTINCT object_type, object_id FROM {schema}.actor_index
            WHERE member_type = $1 AND member_id = $2 AND relation = $3
            ORDER BY object_type, object_id
            "#
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .bind(&subject.subject_type)
            .bind(&subject.subject_id)
            .bind(relation)
            .fetch_all(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(rows
            .into_iter()
            .map(|(t, id)| ObjectRef::new(t, id))
            .collect())
    }

    async fn list_keys(&self, page: Page) -> Result<Vec<IndexKey>, StorageError> {
        let schema = &self.schema;
        let limit_clause = match page.limit {
            Some(n) => format!(" LIMIT {n}"),
            None => String::new(),
        };
        let query = format!(
            r#"
            SELECT DISTINCT root_type, root_id, relation, object_type, object_id
            FROM {schema}.actor_index
            ORDER BY root_type, root_id, relation, object_type, object_id
            OFFSET {}{limit_clause}
            "#,
            page.skip
        );
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(rows
            .into_iter()
            .map(|(rt, rid, relation, ot, oid)| {
                IndexKey::new(SubjectRef::new(rt, rid), relation, ObjectRef::new(ot, oid))
            })
            .collect())
    }
}
