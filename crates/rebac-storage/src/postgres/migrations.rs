use sqlx::PgPool;

use crate::traits::StorageError;

use super::queries::to_storage_error;

/// Schema names are interpolated into SQL, so only plain lowercase
/// identifiers are accepted.
pub fn validate_schema_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let is_valid = valid_start
        && name.len() <= 63
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !is_valid {
        return Err(StorageError::Internal(format!(
            "invalid schema name: {name}"
        )));
    }
    Ok(())
}

pub async fn run_migrations(pool: &PgPool, schema_name: &str) -> Result<(), StorageError> {
    validate_schema_name(schema_name)?;

    let statements = [
        format!("CREATE SCHEMA IF NOT EXISTS {schema_name}"),
        // Structured columns stay NULL until a legacy row is normalized.
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema_name}.relation_tuples (
                id              BIGSERIAL PRIMARY KEY,
                subject_type    TEXT,
                subject_id      TEXT,
                relation        TEXT,
                object_type     TEXT,
                object_id       TEXT,
                legacy_subject  TEXT,
                legacy_object   TEXT,
                legacy_error    TEXT,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ),
        format!(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tuples_unique
            ON {schema_name}.relation_tuples
                (subject_type, subject_id, relation, object_type, object_id)
            WHERE subject_type IS NOT NULL
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tuples_lookup
            ON {schema_name}.relation_tuples (object_type, object_id, relation)
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tuples_reverse
            ON {schema_name}.relation_tuples (subject_type, subject_id, relation)
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tuples_legacy
            ON {schema_name}.relation_tuples (id)
            WHERE subject_type IS NULL AND legacy_error IS NULL
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema_name}.actor_index (
                root_type       TEXT NOT NULL,
                root_id         TEXT NOT NULL,
                relation        TEXT NOT NULL,
                object_type     TEXT NOT NULL,
                object_id       TEXT NOT NULL,
                member_type     TEXT NOT NULL,
                member_id       TEXT NOT NULL,
                PRIMARY KEY (root_type, root_id, relation, object_type, object_id,
                             member_type, member_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_actor_index_membership
            ON {schema_name}.actor_index (relation, object_type, object_id, member_type, member_id)
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_actor_index_member
            ON {schema_name}.actor_index (member_type, member_id, relation)
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema_name}.index_jobs (
                id              BIGSERIAL PRIMARY KEY,
                payload         JSONB NOT NULL,
                attempts        INTEGER NOT NULL DEFAULT 0,
                available_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
                locked_until    TIMESTAMPTZ,
                dead            BOOLEAN NOT NULL DEFAULT false,
                last_error      TEXT,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ),
        format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_index_jobs_ready
            ON {schema_name}.index_jobs (available_at, id)
            WHERE NOT dead
            "#
        ),
    ];

    for statement in &statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(to_storage_error)?;
    }

    tracing::debug!(schema = schema_name, "schema migrations applied");
    Ok(())
}
