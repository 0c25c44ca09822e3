// Counter Store - cached engagement aggregates with atomic, clamped delta application
// Counters only ever move inside the same transaction that writes the detail row they summarize

use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

use crate::core::{current_time_millis, CounterDrift, CounterField, Counters, EntityId, TenantId, UserId};
use crate::error::AppResult;
use crate::infrastructure::database::{SqliteDatabase, StoreTransaction};

#[derive(Debug, Clone)]
pub struct CounterStore {
    db: SqliteDatabase,
}

impl CounterStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    /// Apply `delta` to one counter inside `tx` and return the new value.
    ///
    /// The read-modify-write is a single upsert statement, so concurrent callers on the same
    /// `(entity, field)` never lose an update. Results are clamped at zero.
    pub async fn apply_delta(
        &self,
        tx: &mut StoreTransaction,
        tenant_id: TenantId,
        entity_id: EntityId,
        field: CounterField,
        delta: i64,
    ) -> AppResult<i64> {
        apply_raw(tx.conn(), tenant_id, entity_id.value(), field, delta).await
    }

    /// Unread-notification counter of a recipient
    pub async fn apply_unread_delta(
        &self,
        tx: &mut StoreTransaction,
        tenant_id: TenantId,
        user_id: UserId,
        delta: i64,
    ) -> AppResult<i64> {
        apply_raw(
            tx.conn(),
            tenant_id,
            user_id.value(),
            CounterField::UnreadNotifications,
            delta,
        )
        .await
    }

    /// Create zeroed likes/shares/comments rows for a freshly registered entity
    pub async fn initialize_entity(
        &self,
        tx: &mut StoreTransaction,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> AppResult<()> {
        let now = current_time_millis();
        for field in [CounterField::Likes, CounterField::Shares, CounterField::Comments] {
            sqlx::query(
                "INSERT OR IGNORE INTO engagement_counters (tenant_id, entity_id, field, count, updated_time) VALUES (?, ?, ?, 0, ?)",
            )
            .bind(tenant_id.value())
            .bind(entity_id.value())
            .bind(field.as_str())
            .bind(now)
            .execute(tx.conn())
            .await?;
        }
        Ok(())
    }

    /// Latest committed counters of an entity
    pub async fn read(&self, tenant_id: TenantId, entity_id: EntityId) -> AppResult<Counters> {
        let mut conn = self.db.pool().acquire().await?;
        read_counters(&mut conn, tenant_id, entity_id).await
    }

    /// Counters as seen from inside an open transaction (read-your-writes)
    pub async fn read_in(
        &self,
        tx: &mut StoreTransaction,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> AppResult<Counters> {
        read_counters(tx.conn(), tenant_id, entity_id).await
    }

    pub async fn read_field(
        &self,
        tenant_id: TenantId,
        id: i64,
        field: CounterField,
    ) -> AppResult<i64> {
        let row = sqlx::query(
            "SELECT count FROM engagement_counters WHERE tenant_id = ? AND entity_id = ? AND field = ?",
        )
        .bind(tenant_id.value())
        .bind(id)
        .bind(field.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("count")))
    }

    pub async fn unread_count(&self, tenant_id: TenantId, user_id: UserId) -> AppResult<i64> {
        self.read_field(tenant_id, user_id.value(), CounterField::UnreadNotifications)
            .await
    }

    /// Recount likes, shares and active comments from detail rows and overwrite the cache.
    ///
    /// Returns `cached - live` per field as it was before the repair.
    pub async fn reconcile(&self, tenant_id: TenantId, entity_id: EntityId) -> AppResult<CounterDrift> {
        let mut tx = self.db.begin().await?;
        let cached = read_counters(tx.conn(), tenant_id, entity_id).await?;

        let live = {
            let conn = tx.conn();
            let likes: i64 = sqlx::query("SELECT COUNT(*) AS n FROM likes WHERE tenant_id = ? AND entity_id = ?")
                .bind(tenant_id.value())
                .bind(entity_id.value())
                .fetch_one(&mut *conn)
                .await?
                .get("n");
            let shares: i64 = sqlx::query("SELECT COUNT(*) AS n FROM shares WHERE tenant_id = ? AND entity_id = ?")
                .bind(tenant_id.value())
                .bind(entity_id.value())
                .fetch_one(&mut *conn)
                .await?
                .get("n");
            let comments: i64 = sqlx::query(
                "SELECT COUNT(*) AS n FROM comments WHERE tenant_id = ? AND post_id = ? AND status = 'active'",
            )
            .bind(tenant_id.value())
            .bind(entity_id.value())
            .fetch_one(&mut *conn)
            .await?
            .get("n");
            Counters { likes, shares, comments }
        };

        let drift = CounterDrift {
            likes: cached.likes - live.likes,
            shares: cached.shares - live.shares,
            comments: cached.comments - live.comments,
        };

        if !drift.is_zero() {
            warn!(%tenant_id, %entity_id, ?drift, "Counter drift detected, repairing");
            let now = current_time_millis();
            for (field, value) in [
                (CounterField::Likes, live.likes),
                (CounterField::Shares, live.shares),
                (CounterField::Comments, live.comments),
            ] {
                sqlx::query(
                    "INSERT INTO engagement_counters (tenant_id, entity_id, field, count, updated_time) VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (tenant_id, entity_id, field) DO UPDATE SET count = excluded.count, updated_time = excluded.updated_time",
                )
                .bind(tenant_id.value())
                .bind(entity_id.value())
                .bind(field.as_str())
                .bind(value)
                .bind(now)
                .execute(tx.conn())
                .await?;
            }
        }

        tx.commit().await?;
        Ok(drift)
    }
}

async fn apply_raw(
    conn: &mut SqliteConnection,
    tenant_id: TenantId,
    id: i64,
    field: CounterField,
    delta: i64,
) -> AppResult<i64> {
    let now = current_time_millis();
    let row = sqlx::query(
        "INSERT INTO engagement_counters (tenant_id, entity_id, field, count, updated_time) VALUES (?, ?, ?, MAX(?, 0), ?)
         ON CONFLICT (tenant_id, entity_id, field)
         DO UPDATE SET count = MAX(engagement_counters.count + ?, 0), updated_time = ?
         RETURNING count",
    )
    .bind(tenant_id.value())
    .bind(id)
    .bind(field.as_str())
    .bind(delta)
    .bind(now)
    .bind(delta)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let count: i64 = row.get("count");
    debug!(%tenant_id, id, field = field.as_str(), delta, count, "Counter delta applied");
    Ok(count)
}

async fn read_counters(
    conn: &mut SqliteConnection,
    tenant_id: TenantId,
    entity_id: EntityId,
) -> AppResult<Counters> {
    let rows = sqlx::query(
        "SELECT field, count FROM engagement_counters WHERE tenant_id = ? AND entity_id = ? AND field IN ('likes', 'shares', 'comments')",
    )
    .bind(tenant_id.value())
    .bind(entity_id.value())
    .fetch_all(&mut *conn)
    .await?;

    let mut counters = Counters::default();
    for row in rows {
        let count: i64 = row.get("count");
        match row.get::<String, _>("field").as_str() {
            "likes" => counters.likes = count,
            "shares" => counters.shares = count,
            "comments" => counters.comments = count,
            _ => {}
        }
    }
    Ok(counters)
}
