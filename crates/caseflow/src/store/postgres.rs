//! PostgreSQL store implementation.

use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{InstanceFilter, InstanceStore, Page, TemplateStore, Versioned};
use crate::error::{Error, Result};
use crate::instance::{InstanceId, WorkflowInstance};
use crate::template::{EntityType, TemplateId, WorkflowTemplate};

/// Name of the partial unique index enforcing one live instance per entity.
const LIVE_ENTITY_IDX: &str = "instances_live_entity_idx";

/// PostgreSQL-backed store for production use.
///
/// Records are stored as `jsonb` bodies with a `revision` column plus a few
/// denormalized columns for filtering. Compare-and-swap is a conditional
/// `UPDATE ... WHERE revision = $n`: a zero-row update against an existing
/// record means another writer got there first. The one-live-instance-per-
/// entity rule is a partial unique index, so it holds under concurrent
/// inserts without any locking in this code.
///
/// # Database Schema
///
/// Requires tables in the `caseflow` schema (see `migrations/0001_init.sql`):
///
/// | Table       | Purpose                                  |
/// |-------------|------------------------------------------|
/// | `templates` | One row per template version             |
/// | `instances` | One row per workflow instance            |
///
/// # Example
///
/// ```ignore
/// use caseflow::{AuditEmitter, PgStore, WorkflowEngine};
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let store = PgStore::new(pool);
/// let engine = WorkflowEngine::new(store.clone(), store, AuditEmitter::tracing());
/// ```
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(body)?)
}

fn is_live_entity_conflict(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|constraint| constraint == LIVE_ENTITY_IDX)
}

async fn template_exists(tx: &mut Transaction<'_, Postgres>, id: TemplateId) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM caseflow.templates WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

impl TemplateStore for PgStore {
    async fn insert(&self, template: WorkflowTemplate) -> Result<()> {
        let body = serde_json::to_value(&template)?;
        sqlx::query(
            r#"
            INSERT INTO caseflow.templates
                (id, name, version, entity_type, is_active, is_default, body, revision, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8)
            "#,
        )
        .bind(template.id.as_uuid())
        .bind(&template.name)
        .bind(template.version as i32)
        .bind(template.entity_type.to_string())
        .bind(template.is_active)
        .bind(template.is_default)
        .bind(body)
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TemplateId) -> Result<Versioned<WorkflowTemplate>> {
        let row = sqlx::query("SELECT revision, body FROM caseflow.templates WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::template_not_found(id))?;
        Ok(Versioned {
            revision: row.get::<i64, _>("revision") as u64,
            record: decode(row.get("body"))?,
        })
    }

    async fn update(
        &self,
        expected_revision: u64,
        template: WorkflowTemplate,
    ) -> Result<Versioned<WorkflowTemplate>> {
        let body = serde_json::to_value(&template)?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE caseflow.templates
            SET name = $1, version = $2, is_active = $3, is_default = $4,
                body = $5, revision = revision + 1
            WHERE id = $6 AND revision = $7
            RETURNING revision
            "#,
        )
        .bind(&template.name)
        .bind(template.version as i32)
        .bind(template.is_active)
        .bind(template.is_default)
        .bind(body)
        .bind(template.id.as_uuid())
        .bind(expected_revision as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Zero rows: the record is gone, or another writer bumped the
            // revision between our read and this commit.
            return if template_exists(&mut tx, template.id).await? {
                Err(Error::ConcurrentModification {
                    id: template.id.to_string(),
                })
            } else {
                Err(Error::template_not_found(template.id))
            };
        };
        tx.commit().await?;
        Ok(Versioned {
            revision: row.get::<i64, _>("revision") as u64,
            record: template,
        })
    }

    async fn versions(&self, name: &str) -> Result<Vec<WorkflowTemplate>> {
        let rows = sqlx::query(
            "SELECT body FROM caseflow.templates WHERE name = $1 ORDER BY version DESC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|row| decode(row.get("body"))).collect()
    }

    async fn resolve_default(&self, entity_type: EntityType) -> Result<WorkflowTemplate> {
        let row = sqlx::query(
            r#"
            SELECT body FROM caseflow.templates
            WHERE entity_type = $1 AND is_default
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(entity_type.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound {
            kind: "template",
            id: format!("default for {entity_type}"),
        })?;
        decode(row.get("body"))
    }

    async fn set_default(&self, id: TemplateId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT entity_type FROM caseflow.templates WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::template_not_found(id))?;
        let entity_type: String = row.get("entity_type");

        sqlx::query(
            r#"
            UPDATE caseflow.templates
            SET is_default = false,
                body = jsonb_set(body, '{is_default}', 'false'),
                revision = revision + 1
            WHERE entity_type = $1 AND is_default AND id <> $2
            "#,
        )
        .bind(&entity_type)
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE caseflow.templates
            SET is_default = true,
                body = jsonb_set(body, '{is_default}', 'true'),
                revision = revision + 1
            WHERE id = $1 AND NOT is_default
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list(
        &self,
        entity_type: Option<EntityType>,
        is_active: Option<bool>,
    ) -> Result<Vec<WorkflowTemplate>> {
        let mut builder =
            sqlx::QueryBuilder::new("SELECT body FROM caseflow.templates WHERE true");
        if let Some(entity_type) = entity_type {
            builder.push(" AND entity_type = ");
            builder.push_bind(entity_type.to_string());
        }
        if let Some(is_active) = is_active {
            builder.push(" AND is_active = ");
            builder.push_bind(is_active);
        }
        builder.push(" ORDER BY name ASC, version DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| decode(row.get("body"))).collect()
    }
}

impl InstanceStore for PgStore {
    async fn insert(&self, instance: WorkflowInstance) -> Result<Versioned<WorkflowInstance>> {
        let body = serde_json::to_value(&instance)?;
        let result = sqlx::query(
            r#"
            INSERT INTO caseflow.instances
                (id, entity_type, entity_id, template_id, status, started_at, body, revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
            "#,
        )
        .bind(instance.id.as_uuid())
        .bind(instance.entity_type.to_string())
        .bind(&instance.entity_id)
        .bind(instance.template_id.as_uuid())
        .bind(instance.status.to_string())
        .bind(instance.started_at)
        .bind(body)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Versioned {
                revision: 1,
                record: instance,
            }),
            Err(e) if is_live_entity_conflict(&e) => Err(Error::DuplicateActiveInstance {
                entity_type: instance.entity_type,
                entity_id: instance.entity_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: InstanceId) -> Result<Versioned<WorkflowInstance>> {
        let row = sqlx::query("SELECT revision, body FROM caseflow.instances WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::instance_not_found(id))?;
        Ok(Versioned {
            revision: row.get::<i64, _>("revision") as u64,
            record: decode(row.get("body"))?,
        })
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Versioned<WorkflowInstance>>> {
        let row = sqlx::query(
            r#"
            SELECT revision, body FROM caseflow.instances
            WHERE entity_type = $1 AND entity_id = $2
              AND status NOT IN ('CANCELLED', 'COMPLETED')
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Versioned {
                revision: row.get::<i64, _>("revision") as u64,
                record: decode(row.get("body"))?,
            })
        })
        .transpose()
    }

    async fn update(
        &self,
        expected_revision: u64,
        instance: WorkflowInstance,
    ) -> Result<Versioned<WorkflowInstance>> {
        let body = serde_json::to_value(&instance)?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE caseflow.instances
            SET status = $1, body = $2, revision = revision + 1
            WHERE id = $3 AND revision = $4
            RETURNING revision
            "#,
        )
        .bind(instance.status.to_string())
        .bind(body)
        .bind(instance.id.as_uuid())
        .bind(expected_revision as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists = sqlx::query("SELECT 1 FROM caseflow.instances WHERE id = $1")
                .bind(instance.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return if exists {
                Err(Error::ConcurrentModification {
                    id: instance.id.to_string(),
                })
            } else {
                Err(Error::instance_not_found(instance.id))
            };
        };
        tx.commit().await?;
        Ok(Versioned {
            revision: row.get::<i64, _>("revision") as u64,
            record: instance,
        })
    }

    async fn list(&self, filter: &InstanceFilter, page: Page) -> Result<Vec<WorkflowInstance>> {
        let mut builder =
            sqlx::QueryBuilder::new("SELECT body FROM caseflow.instances WHERE true");
        if let Some(entity_type) = filter.entity_type {
            builder.push(" AND entity_type = ");
            builder.push_bind(entity_type.to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.to_string());
        }
        if let Some(template_id) = filter.template_id {
            builder.push(" AND template_id = ");
            builder.push_bind(*template_id.as_uuid());
        }
        builder.push(" ORDER BY started_at DESC");
        builder.push(" LIMIT ");
        builder.push_bind(page.limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(page.offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| decode(row.get("body"))).collect()
    }

    async fn count_by_template(&self, template_id: TemplateId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM caseflow.instances WHERE template_id = $1")
            .bind(template_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}
