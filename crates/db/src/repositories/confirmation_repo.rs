//! Repository for `sinc_carga_proceso_dealers`.
//!
//! The table carries `uq_sinc_carga_proceso_dealer` on
//! `(evento_carga_proceso_id, dealer_bac)`; a second insert for the same pair
//! fails with SQLSTATE 23505 and never overwrites the first row.

use dealersync_core::types::DbId;
use sqlx::PgPool;

use crate::models::confirmation::{CreateConfirmation, SincCargaProcesoDealer};

const COLUMNS: &str = "\
    id, evento_carga_proceso_id, dealer_bac, fecha_sincronizacion, \
    registros_sincronizados, token_confirmacion, created_at";

/// Provides insert and lookup for dealer confirmations.
pub struct ConfirmationRepo;

impl ConfirmationRepo {
    /// Insert a confirmation record.
    pub async fn create(
        pool: &PgPool,
        input: &CreateConfirmation,
    ) -> Result<SincCargaProcesoDealer, sqlx::Error> {
        let query = format!(
            "INSERT INTO sinc_carga_proceso_dealers \
                 (evento_carga_proceso_id, dealer_bac, fecha_sincronizacion, \
                  registros_sincronizados, token_confirmacion) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SincCargaProcesoDealer>(&query)
            .bind(input.evento_carga_proceso_id)
            .bind(&input.dealer_bac)
            .bind(input.fecha_sincronizacion)
            .bind(input.registros_sincronizados)
            .bind(&input.token_confirmacion)
            .fetch_one(pool)
            .await
    }

    /// List the confirmations of a load event ordered by BAC code.
    pub async fn list_for_evento(
        pool: &PgPool,
        evento_id: DbId,
    ) -> Result<Vec<SincCargaProcesoDealer>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sinc_carga_proceso_dealers \
             WHERE evento_carga_proceso_id = $1 ORDER BY dealer_bac ASC"
        );
        sqlx::query_as::<_, SincCargaProcesoDealer>(&query)
            .bind(evento_id)
            .fetch_all(pool)
            .await
    }
}
