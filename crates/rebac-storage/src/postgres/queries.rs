use rebac_core::tuple::{ObjectRef, RelationTuple, SubjectRef, TupleFilter};

use crate::traits::{LegacyRow, Page, StorageError};

type TupleRow = (String, String, String, String, String);

pub(super) fn to_storage_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(e.to_string())
        }
        other => StorageError::Internal(other.to_string()),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn row_to_tuple(
    (subject_type, subject_id, relation, object_type, object_id): TupleRow,
) -> RelationTuple {
    RelationTuple::new(
        SubjectRef::new(subject_type, subject_id),
        relation,
        ObjectRef::new(object_type, object_id),
    )
}

/// Builds the `WHERE` conditions for `filter`, numbering binds from
/// `first_bind`. Only structured rows ever match.
fn filter_conditions(filter: &TupleFilter, first_bind: usize) -> (String, Vec<&str>) {
    let mut conditions = vec!["subject_type IS NOT NULL".to_string()];
    let mut binds = Vec::new();
    let mut bind_idx = first_bind;

    let columns = [
        ("subject_type", &filter.subject_type),
        ("subject_id", &filter.subject_id),
        ("relation", &filter.relation),
        ("object_type", &filter.object_type),
        ("object_id", &filter.object_id),
    ];
    for (column, value) in columns {
        if let Some(v) = value {
            conditions.push(format!("{column} = ${bind_idx}"));
            binds.push(v.as_str());
            bind_idx += 1;
        }
    }

    (conditions.join(" AND "), binds)
}

pub async fn insert_tuple<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    tuple: &RelationTuple,
) -> Result<(), StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.relation_tuples
            (subject_type, subject_id, relation, object_type, object_id)
        VALUES ($1, $2, $3, $4, $5)
        "#
    );
    sqlx::query(&query)
        .bind(&tuple.subject.subject_type)
        .bind(&tuple.subject.subject_id)
        .bind(&tuple.relation)
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::DuplicateTuple;
            }
            to_storage_error(e)
        })?;
    Ok(())
}

pub async fn read_tuples<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    filter: &TupleFilter,
    page: Page,
) -> Result<Vec<RelationTuple>, StorageError> {
    let (where_clause, binds) = filter_conditions(filter, 1);
    let limit_clause = match page.limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    };
    let query = format!(
        r#"SELECT subject_type, subject_id, relation, object_type, object_id
           FROM {schema}.relation_tuples
           WHERE {where_clause}
           ORDER BY id OFFSET {}{limit_clause}"#,
        page.skip
    );

    let mut q = sqlx::query_as::<_, TupleRow>(&query);
    for bind in binds {
        q = q.bind(bind);
    }
    let rows = q.fetch_all(executor).await.map_err(to_storage_error)?;

    Ok(rows.into_iter().map(row_to_tuple).collect())
}

pub async fn tuple_exists<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    tuple: &RelationTuple,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM {schema}.relation_tuples
            WHERE subject_type = $1 AND subject_id = $2 AND relation = $3
              AND object_type = $4 AND object_id = $5
        )
        "#
    );
    let row: (bool,) = sqlx::query_as(&query)
        .bind(&tuple.subject.subject_type)
        .bind(&tuple.subject.subject_id)
        .bind(&tuple.relation)
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .fetch_one(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.0)
}

pub async fn delete_tuple<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    tuple: &RelationTuple,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        DELETE FROM {schema}.relation_tuples
        WHERE subject_type = $1 AND subject_id = $2 AND relation = $3
          AND object_type = $4 AND object_id = $5
        "#
    );
    let result = sqlx::query(&query)
        .bind(&tuple.subject.subject_type)
        .bind(&tuple.subject.subject_id)
        .bind(&tuple.relation)
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_legacy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    subject: &str,
    object: &str,
) -> Result<i64, StorageError> {
    let query = format!(
        r#"
        INSERT INTO {schema}.relation_tuples (legacy_subject, legacy_object)
        VALUES ($1, $2)
        RETURNING id
        "#
    );
    let row: (i64,) = sqlx::query_as(&query)
        .bind(subject)
        .bind(object)
        .fetch_one(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.0)
}

pub async fn find_legacy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    limit: usize,
) -> Result<Vec<LegacyRow>, StorageError> {
    let query = format!(
        r#"
        SELECT id, COALESCE(legacy_subject, ''), COALESCE(legacy_object, '')
        FROM {schema}.relation_tuples
        WHERE subject_type IS NULL AND legacy_error IS NULL
        ORDER BY id
        LIMIT {limit}
        "#
    );
    let rows: Vec<(i64, String, String)> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(id, subject, object)| LegacyRow {
            id,
            subject,
            object,
        })
        .collect())
}

pub async fn set_structured_fields<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    id: i64,
    tuple: &RelationTuple,
) -> Result<bool, StorageError> {
    let query = format!(
        r#"
        UPDATE {schema}.relation_tuples
        SET subject_type = $2, subject_id = $3, relation = $4, object_type = $5, object_id = $6
        WHERE id = $1
        "#
    );
    let result = sqlx::query(&query)
        .bind(id)
        .bind(&tuple.subject.subject_type)
        .bind(&tuple.subject.subject_id)
        .bind(&tuple.relation)
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::DuplicateTuple;
            }
            to_storage_error(e)
        })?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_row<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    id: i64,
) -> Result<bool, StorageError> {
    let query = format!("DELETE FROM {schema}.relation_tuples WHERE id = $1");
    let result = sqlx::query(&query)
        .bind(id)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}

pub async fn quarantine_row<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    schema: &str,
    id: i64,
    reason: &str,
) -> Result<bool, StorageError> {
    let query = format!("UPDATE {schema}.relation_tuples SET legacy_error = $2 WHERE id = $1");
    let result = sqlx::query(&query)
        .bind(id)
        .bind(reason)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(result.rows_affected() > 0)
}
