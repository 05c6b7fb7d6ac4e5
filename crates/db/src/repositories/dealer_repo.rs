//! Repository for the `dealers` registry and the
//! `evento_carga_snapshot_dealers` dispatch targets.

use dealersync_core::types::DbId;
use sqlx::PgPool;

use crate::models::dealer::{CreateDealer, Dealer, SnapshotDealer, WebhookAttemptResult};
use crate::models::status::WebhookStatus;

const DEALER_COLUMNS: &str = "\
    id, dealer_bac, nombre_dealer, url_webhook, secret_key, is_active, \
    created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "\
    id, evento_carga_proceso_id, dealer_bac, nombre_dealer, url_webhook, \
    secret_key, estado_webhook_id, intentos_webhook, ultimo_intento_webhook, \
    ultimo_error_webhook, created_at, updated_at";

/// Provides registry upserts and snapshot delivery-state updates.
pub struct DealerRepo;

impl DealerRepo {
    /// Insert a dealer or update the existing row with the same BAC code.
    pub async fn upsert(pool: &PgPool, input: &CreateDealer) -> Result<Dealer, sqlx::Error> {
        let query = format!(
            "INSERT INTO dealers (dealer_bac, nombre_dealer, url_webhook, secret_key, is_active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (dealer_bac) DO UPDATE SET \
                 nombre_dealer = EXCLUDED.nombre_dealer, \
                 url_webhook = EXCLUDED.url_webhook, \
                 secret_key = EXCLUDED.secret_key, \
                 is_active = EXCLUDED.is_active, \
                 updated_at = NOW() \
             RETURNING {DEALER_COLUMNS}"
        );
        sqlx::query_as::<_, Dealer>(&query)
            .bind(&input.dealer_bac)
            .bind(&input.nombre_dealer)
            .bind(&input.url_webhook)
            .bind(&input.secret_key)
            .bind(input.is_active)
            .fetch_one(pool)
            .await
    }

    /// Copy every active registry dealer into the snapshot of a load event.
    ///
    /// Dealers already present in the snapshot are left untouched, so calling
    /// this twice never resets a delivery state. Returns the number of rows
    /// inserted.
    pub async fn snapshot_active(pool: &PgPool, evento_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO evento_carga_snapshot_dealers \
                 (evento_carga_proceso_id, dealer_bac, nombre_dealer, url_webhook, \
                  secret_key, estado_webhook_id) \
             SELECT $1, dealer_bac, nombre_dealer, url_webhook, secret_key, $2 \
             FROM dealers WHERE is_active \
             ON CONFLICT (evento_carga_proceso_id, dealer_bac) DO NOTHING",
        )
        .bind(evento_id)
        .bind(WebhookStatus::Pending.id())
        .execute(pool)
        .await?;
        tracing::debug!(
            evento_id,
            inserted = result.rows_affected(),
            "Dealer snapshot written"
        );
        Ok(result.rows_affected())
    }

    /// List the snapshot dealers of a load event ordered by BAC code.
    pub async fn list_snapshot(
        pool: &PgPool,
        evento_id: DbId,
    ) -> Result<Vec<SnapshotDealer>, sqlx::Error> {
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM evento_carga_snapshot_dealers \
             WHERE evento_carga_proceso_id = $1 ORDER BY dealer_bac ASC"
        );
        sqlx::query_as::<_, SnapshotDealer>(&query)
            .bind(evento_id)
            .fetch_all(pool)
            .await
    }

    /// Record a dispatch outcome on a snapshot dealer.
    ///
    /// `intentos_webhook` grows by the number of HTTP attempts made. The
    /// error column is cleared on success. A dealer already EXITOSO is never
    /// downgraded: a non-success result leaves the row untouched and the call
    /// returns `false`.
    pub async fn record_webhook_result(
        pool: &PgPool,
        evento_id: DbId,
        dealer_bac: &str,
        result: &WebhookAttemptResult,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE evento_carga_snapshot_dealers SET \
                 estado_webhook_id = $3, \
                 intentos_webhook = intentos_webhook + $4, \
                 ultimo_intento_webhook = $5, \
                 ultimo_error_webhook = $6, \
                 updated_at = NOW() \
             WHERE evento_carga_proceso_id = $1 AND dealer_bac = $2 \
               AND ($3 = $7 OR estado_webhook_id <> $7)",
        )
        .bind(evento_id)
        .bind(dealer_bac)
        .bind(result.estado.id())
        .bind(result.attempts)
        .bind(result.attempted_at)
        .bind(result.error.as_deref())
        .bind(WebhookStatus::Exitoso.id())
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }
}
