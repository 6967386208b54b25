use crate::errors::{AppError, ResultExt};
use crate::models::{Lead, User, UserRole};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// Database storage service for Lead and User aggregates.
///
/// Aggregates live in JSONB columns and are read/written whole: one write
/// per operation is the atomicity unit the workflow coordinator relies on.
/// Coordinated writes go through [`LeadStorage::save_lead`], which performs
/// an optimistic version check; [`LeadStorage::save_leads`] keeps the plain
/// upsert-by-id (last write wins) contract for seeding and imports.
pub struct LeadStorage {
    pool: PgPool,
}

impl LeadStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a single lead aggregate by id.
    pub async fn get_lead(&self, id: &str) -> Result<Lead, AppError> {
        let row = sqlx::query("SELECT data, version FROM crm.leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        let Json(mut lead): Json<Lead> = row.try_get("data")?;
        lead.version = row.try_get("version")?;
        Ok(lead)
    }

    /// List the leads visible to `user`.
    ///
    /// Sales users see their own assignments, back-office users see leads
    /// matching their service-type filter (or everything when unset),
    /// admins see everything.
    pub async fn list_for_user(&self, user: &User) -> Result<Vec<Lead>, AppError> {
        let rows = match user.role {
            UserRole::Sales => {
                sqlx::query(
                    "SELECT data, version FROM crm.leads \
                     WHERE data->>'assignedTo' = $1 ORDER BY created_at DESC",
                )
                .bind(&user.id)
                .fetch_all(&self.pool)
                .await
            }
            UserRole::BackOffice | UserRole::Admin => {
                sqlx::query("SELECT data, version FROM crm.leads ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("failed to list leads")?;

        let mut leads = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(mut lead): Json<Lead> = row.try_get("data")?;
            lead.version = row.try_get("version")?;
            leads.push(lead);
        }

        if user.role == UserRole::BackOffice {
            if let Some(filter) = &user.service_types {
                leads.retain(|lead| filter.contains(&lead.service_type));
            }
        }

        Ok(leads)
    }

    /// Insert a freshly created lead. Fails if the id already exists.
    pub async fn insert_lead(&self, lead: &mut Lead) -> Result<(), AppError> {
        sqlx::query("INSERT INTO crm.leads (id, data, version) VALUES ($1, $2, 1)")
            .bind(&lead.id)
            .bind(Json(&*lead))
            .execute(&self.pool)
            .await
            .context("failed to insert lead")?;
        lead.version = 1;
        Ok(())
    }

    /// Persist a modified lead aggregate with an optimistic version check.
    ///
    /// The aggregate is written in a single UPDATE; a version mismatch means
    /// another writer got there first and surfaces as `Conflict` so the
    /// caller can reload and retry. On success `lead.version` is advanced to
    /// the stored value.
    pub async fn save_lead(&self, lead: &mut Lead) -> Result<(), AppError> {
        let row = sqlx::query(
            "UPDATE crm.leads SET data = $2, version = version + 1, updated_at = now() \
             WHERE id = $1 AND version = $3 RETURNING version",
        )
        .bind(&lead.id)
        .bind(Json(&*lead))
        .bind(lead.version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                lead.version = row.try_get("version")?;
                Ok(())
            }
            None => {
                let exists = sqlx::query("SELECT 1 FROM crm.leads WHERE id = $1")
                    .bind(&lead.id)
                    .fetch_optional(&self.pool)
                    .await?;
                if exists.is_some() {
                    Err(AppError::Conflict(format!(
                        "Lead {} was modified concurrently; reload and retry",
                        lead.id
                    )))
                } else {
                    Err(AppError::NotFound(format!("Lead {} not found", lead.id)))
                }
            }
        }
    }

    /// Upsert leads by id, last write wins. No version check.
    pub async fn save_leads(&self, leads: &[Lead]) -> Result<(), AppError> {
        for lead in leads {
            sqlx::query(
                "INSERT INTO crm.leads (id, data, version) VALUES ($1, $2, 1) \
                 ON CONFLICT (id) DO UPDATE \
                 SET data = EXCLUDED.data, version = crm.leads.version + 1, updated_at = now()",
            )
            .bind(&lead.id)
            .bind(Json(lead))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to upsert lead {}", lead.id))?;
        }
        Ok(())
    }

    /// Fetch a user by id.
    pub async fn get_user(&self, id: &str) -> Result<User, AppError> {
        let row = sqlx::query("SELECT data FROM crm.users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        let Json(user): Json<User> = row.try_get("data")?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query("SELECT data FROM crm.users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .context("failed to list users")?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(user): Json<User> = row.try_get("data")?;
            users.push(user);
        }
        Ok(users)
    }

    /// Upsert a user by id.
    pub async fn save_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO crm.users (id, data) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(&user.id)
        .bind(Json(user))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user {}", user.id))?;
        Ok(())
    }
}
