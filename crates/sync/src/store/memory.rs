//! In-process implementation of every store port.
//!
//! Used by single-node deployments without a database and by tests. All
//! state sits behind one mutex, so each method is atomic with respect to
//! the others.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dealersync_core::error::SyncError;
use dealersync_core::sync::DispatchTally;
use dealersync_core::types::{DbId, Timestamp};
use dealersync_db::models::confirmation::{CreateConfirmation, SincCargaProcesoDealer};
use dealersync_db::models::dealer::{CreateDealer, Dealer, SnapshotDealer, WebhookAttemptResult};
use dealersync_db::models::status::{SyncStatus, WebhookStatus};
use dealersync_db::models::sync_control::{CreateSyncControl, SyncControl};
use tokio::sync::Mutex;

use super::{ConfirmationStore, DealerStore, SyncControlStore};

#[derive(Default)]
struct MemoryState {
    last_control_id: DbId,
    last_evento_id: DbId,
    last_dealer_id: DbId,
    last_snapshot_id: DbId,
    last_confirmation_id: DbId,
    controls: BTreeMap<DbId, SyncControl>,
    dealers: BTreeMap<String, Dealer>,
    snapshots: BTreeMap<(DbId, String), SnapshotDealer>,
    confirmations: BTreeMap<(DbId, String), SincCargaProcesoDealer>,
}

impl MemoryState {
    /// Move a control row from `from` to `to`, applying `change` on the way.
    /// Illegal lifecycle steps and rows not in `from` are left untouched.
    fn transition(
        &mut self,
        id: DbId,
        from: SyncStatus,
        to: SyncStatus,
        change: impl FnOnce(&mut SyncControl),
    ) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.update_if(id, from, |c| {
            c.status_id = to.id();
            change(c);
        })
    }

    /// Apply `change` to a control row if it is in `expected` status.
    fn update_if(
        &mut self,
        id: DbId,
        expected: SyncStatus,
        change: impl FnOnce(&mut SyncControl),
    ) -> bool {
        match self.controls.get_mut(&id) {
            Some(control) if control.status_id == expected.id() => {
                change(control);
                control.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// Mutex-guarded maps standing in for the Postgres tables.
#[derive(Default)]
pub struct InMemorySyncStore {
    state: Mutex<MemoryState>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_tally(control: &mut SyncControl, tally: &DispatchTally) {
    control.webhooks_totales = tally.totales;
    control.webhooks_procesados = tally.procesados;
    control.webhooks_fallidos = tally.fallidos;
    control.webhooks_omitidos = tally.omitidos;
}

#[async_trait]
impl SyncControlStore for InMemorySyncStore {
    async fn create_pending(&self, input: &CreateSyncControl) -> Result<SyncControl, SyncError> {
        let mut state = self.state.lock().await;

        let open_attempt_exists = state.controls.values().any(|c| {
            c.process_type == input.process_type
                && c.id_carga == input.id_carga
                && matches!(c.status(), Some(SyncStatus::Pending | SyncStatus::Running))
        });
        if open_attempt_exists {
            return Err(SyncError::Duplicate(
                "Duplicate value violates unique constraint: uq_sync_controls_open_attempt"
                    .to_string(),
            ));
        }

        let evento_id = match input.evento_carga_proceso_id {
            Some(id) => id,
            None => {
                state.last_evento_id += 1;
                state.last_evento_id
            }
        };
        state.last_control_id += 1;
        let now = Utc::now();
        let control = SyncControl {
            id: state.last_control_id,
            process_type: input.process_type.clone(),
            id_carga: input.id_carga.clone(),
            fecha_carga: input.fecha_carga,
            evento_carga_proceso_id: evento_id,
            registros_carga: input.registros_carga,
            status_id: SyncStatus::Pending.id(),
            job_id: None,
            webhooks_totales: 0,
            webhooks_procesados: 0,
            webhooks_fallidos: 0,
            webhooks_omitidos: 0,
            error_message: None,
            error_details: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.controls.insert(control.id, control.clone());
        Ok(control)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<SyncControl>, SyncError> {
        Ok(self.state.lock().await.controls.get(&id).cloned())
    }

    async fn find_latest_for_carga(
        &self,
        process_type: &str,
        id_carga: &str,
    ) -> Result<Option<SyncControl>, SyncError> {
        let state = self.state.lock().await;
        Ok(state
            .controls
            .values()
            .rev()
            .find(|c| c.process_type == process_type && c.id_carga == id_carga)
            .cloned())
    }

    async fn list(
        &self,
        status: Option<SyncStatus>,
        limit: i64,
    ) -> Result<Vec<SyncControl>, SyncError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let matches = |c: &&SyncControl| status.map_or(true, |s| c.status_id == s.id());
        let rows = match status {
            Some(SyncStatus::Pending | SyncStatus::Running) => state
                .controls
                .values()
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
            _ => state
                .controls
                .values()
                .rev()
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(rows)
    }

    async fn list_stale_running(&self, cutoff: Timestamp) -> Result<Vec<SyncControl>, SyncError> {
        let state = self.state.lock().await;
        Ok(state
            .controls
            .values()
            .filter(|c| c.status_id == SyncStatus::Running.id() && c.updated_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn mark_running(&self, id: DbId, job_id: &str) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        Ok(state.transition(id, SyncStatus::Pending, SyncStatus::Running, |c| {
            c.job_id = Some(job_id.to_string());
            c.started_at = Some(Utc::now());
        }))
    }

    async fn update_progress(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError> {
        if tally.accounted() > tally.totales {
            return Err(SyncError::DataAccess(
                "Check constraint ck_sync_controls_counters violated".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        Ok(state.update_if(id, SyncStatus::Running, |c| apply_tally(c, tally)))
    }

    async fn mark_completed(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError> {
        if tally.accounted() > tally.totales {
            return Err(SyncError::DataAccess(
                "Check constraint ck_sync_controls_counters violated".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        Ok(state.transition(id, SyncStatus::Running, SyncStatus::Completed, |c| {
            apply_tally(c, tally);
            c.completed_at = Some(Utc::now());
        }))
    }

    async fn mark_failed(
        &self,
        id: DbId,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        Ok(state.transition(id, SyncStatus::Running, SyncStatus::Failed, |c| {
            c.error_message = Some(message.to_string());
            c.error_details = details.cloned();
            c.completed_at = Some(Utc::now());
        }))
    }

    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[async_trait]
impl DealerStore for InMemorySyncStore {
    async fn register_dealer(&self, input: &CreateDealer) -> Result<Dealer, SyncError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = match state.dealers.get(&input.dealer_bac) {
            Some(existing) => existing.id,
            None => {
                state.last_dealer_id += 1;
                state.last_dealer_id
            }
        };
        let created_at = state
            .dealers
            .get(&input.dealer_bac)
            .map_or(now, |existing| existing.created_at);
        let dealer = Dealer {
            id,
            dealer_bac: input.dealer_bac.clone(),
            nombre_dealer: input.nombre_dealer.clone(),
            url_webhook: input.url_webhook.clone(),
            secret_key: input.secret_key.clone(),
            is_active: input.is_active,
            created_at,
            updated_at: now,
        };
        state.dealers.insert(dealer.dealer_bac.clone(), dealer.clone());
        Ok(dealer)
    }

    async fn snapshot_active(&self, evento_id: DbId) -> Result<u64, SyncError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let active: Vec<Dealer> = state
            .dealers
            .values()
            .filter(|d| d.is_active)
            .cloned()
            .collect();

        let mut inserted = 0;
        for dealer in active {
            let key = (evento_id, dealer.dealer_bac.clone());
            if state.snapshots.contains_key(&key) {
                continue;
            }
            state.last_snapshot_id += 1;
            let row = SnapshotDealer {
                id: state.last_snapshot_id,
                evento_carga_proceso_id: evento_id,
                dealer_bac: dealer.dealer_bac,
                nombre_dealer: dealer.nombre_dealer,
                url_webhook: dealer.url_webhook,
                secret_key: dealer.secret_key,
                estado_webhook_id: WebhookStatus::Pending.id(),
                intentos_webhook: 0,
                ultimo_intento_webhook: None,
                ultimo_error_webhook: None,
                created_at: now,
                updated_at: now,
            };
            state.snapshots.insert(key, row);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_snapshot(&self, evento_id: DbId) -> Result<Vec<SnapshotDealer>, SyncError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .values()
            .filter(|s| s.evento_carga_proceso_id == evento_id)
            .cloned()
            .collect())
    }

    async fn record_webhook_result(
        &self,
        evento_id: DbId,
        dealer_bac: &str,
        result: &WebhookAttemptResult,
    ) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        let Some(row) = state
            .snapshots
            .get_mut(&(evento_id, dealer_bac.to_string()))
        else {
            return Ok(false);
        };
        let downgrade =
            row.estado() == Some(WebhookStatus::Exitoso) && result.estado != WebhookStatus::Exitoso;
        if downgrade {
            return Ok(false);
        }
        row.estado_webhook_id = result.estado.id();
        row.intentos_webhook += result.attempts;
        row.ultimo_intento_webhook = Some(result.attempted_at);
        row.ultimo_error_webhook = result.error.clone();
        row.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl ConfirmationStore for InMemorySyncStore {
    async fn insert_confirmation(
        &self,
        input: &CreateConfirmation,
    ) -> Result<SincCargaProcesoDealer, SyncError> {
        let mut state = self.state.lock().await;
        let key = (input.evento_carga_proceso_id, input.dealer_bac.clone());
        if state.confirmations.contains_key(&key) {
            return Err(SyncError::Duplicate(
                "Duplicate value violates unique constraint: uq_sinc_carga_proceso_dealer"
                    .to_string(),
            ));
        }
        state.last_confirmation_id += 1;
        let row = SincCargaProcesoDealer {
            id: state.last_confirmation_id,
            evento_carga_proceso_id: input.evento_carga_proceso_id,
            dealer_bac: input.dealer_bac.clone(),
            fecha_sincronizacion: input.fecha_sincronizacion,
            registros_sincronizados: input.registros_sincronizados,
            token_confirmacion: input.token_confirmacion.clone(),
            created_at: Utc::now(),
        };
        state.confirmations.insert(key, row.clone());
        Ok(row)
    }

    async fn list_confirmations(
        &self,
        evento_id: DbId,
    ) -> Result<Vec<SincCargaProcesoDealer>, SyncError> {
        let state = self.state.lock().await;
        Ok(state
            .confirmations
            .values()
            .filter(|c| c.evento_carga_proceso_id == evento_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn pending_input(id_carga: &str, evento: Option<DbId>) -> CreateSyncControl {
        CreateSyncControl {
            process_type: "ProductList".to_string(),
            id_carga: id_carga.to_string(),
            fecha_carga: Utc::now(),
            registros_carga: 10,
            evento_carga_proceso_id: evento,
        }
    }

    fn confirmation(dealer_bac: &str) -> CreateConfirmation {
        CreateConfirmation {
            evento_carga_proceso_id: 1,
            dealer_bac: dealer_bac.to_string(),
            fecha_sincronizacion: Utc::now(),
            registros_sincronizados: 10,
            token_confirmacion: "a".repeat(64),
        }
    }

    #[tokio::test]
    async fn second_open_attempt_is_duplicate() {
        let store = InMemorySyncStore::new();
        store.create_pending(&pending_input("CARGA1", None)).await.unwrap();
        assert_matches!(
            store.create_pending(&pending_input("CARGA1", None)).await,
            Err(SyncError::Duplicate(_))
        );
        assert!(store.create_pending(&pending_input("CARGA2", None)).await.is_ok());
    }

    #[tokio::test]
    async fn new_events_get_fresh_ids_and_retries_reuse_them() {
        let store = InMemorySyncStore::new();
        let first = store.create_pending(&pending_input("CARGA1", None)).await.unwrap();
        let second = store.create_pending(&pending_input("CARGA2", None)).await.unwrap();
        assert_ne!(first.evento_carga_proceso_id, second.evento_carga_proceso_id);

        store.mark_running(first.id, "job").await.unwrap();
        store.mark_failed(first.id, "boom", None).await.unwrap();
        let retry = store
            .create_pending(&pending_input("CARGA1", Some(first.evento_carga_proceso_id)))
            .await
            .unwrap();
        assert_eq!(retry.evento_carga_proceso_id, first.evento_carga_proceso_id);
    }

    #[tokio::test]
    async fn transitions_are_guarded_by_source_status() {
        let store = InMemorySyncStore::new();
        let control = store.create_pending(&pending_input("CARGA1", None)).await.unwrap();
        let tally = DispatchTally::new(0);

        assert!(!store.mark_completed(control.id, &tally).await.unwrap());
        assert!(store.mark_running(control.id, "job-1").await.unwrap());
        assert!(!store.mark_running(control.id, "job-2").await.unwrap());
        assert!(store.mark_completed(control.id, &tally).await.unwrap());
        assert!(!store.mark_failed(control.id, "late", None).await.unwrap());

        let stored = store.find_by_id(control.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(SyncStatus::Completed));
        assert_eq!(stored.job_id.as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn illegal_lifecycle_step_is_refused() {
        let store = InMemorySyncStore::new();
        let control = store.create_pending(&pending_input("CARGA1", None)).await.unwrap();

        let mut state = store.state.lock().await;
        assert!(!state.transition(
            control.id,
            SyncStatus::Pending,
            SyncStatus::Completed,
            |_| {}
        ));
        assert!(!state.transition(control.id, SyncStatus::Pending, SyncStatus::Pending, |_| {}));
        assert_eq!(state.controls[&control.id].status(), Some(SyncStatus::Pending));
    }

    #[tokio::test]
    async fn counters_cannot_exceed_total() {
        let store = InMemorySyncStore::new();
        let control = store.create_pending(&pending_input("CARGA1", None)).await.unwrap();
        store.mark_running(control.id, "job").await.unwrap();
        let bad = DispatchTally {
            totales: 1,
            procesados: 1,
            fallidos: 1,
            omitidos: 0,
        };
        assert_matches!(
            store.update_progress(control.id, &bad).await,
            Err(SyncError::DataAccess(_))
        );
    }

    #[tokio::test]
    async fn duplicate_confirmation_keeps_first_row() {
        let store = InMemorySyncStore::new();
        let first = store.insert_confirmation(&confirmation("BAC001")).await.unwrap();

        let mut second = confirmation("BAC001");
        second.token_confirmacion = "b".repeat(64);
        assert_matches!(
            store.insert_confirmation(&second).await,
            Err(SyncError::Duplicate(_))
        );

        let rows = store.list_confirmations(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token_confirmacion, first.token_confirmacion);
    }

    #[tokio::test]
    async fn snapshot_copies_only_active_dealers_once() {
        let store = InMemorySyncStore::new();
        for (bac, active) in [("BAC001", true), ("BAC002", false), ("BAC003", true)] {
            store
                .register_dealer(&CreateDealer {
                    dealer_bac: bac.to_string(),
                    nombre_dealer: format!("Dealer {bac}"),
                    url_webhook: "http://localhost/webhook".to_string(),
                    secret_key: "secret".to_string(),
                    is_active: active,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.snapshot_active(7).await.unwrap(), 2);
        store
            .record_webhook_result(
                7,
                "BAC001",
                &WebhookAttemptResult {
                    estado: WebhookStatus::Exitoso,
                    attempts: 1,
                    error: None,
                    attempted_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.snapshot_active(7).await.unwrap(), 0);

        let snapshot = store.list_snapshot(7).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot[0].is_eligible());
        assert!(snapshot[1].is_eligible());
    }

    #[tokio::test]
    async fn failure_never_downgrades_a_confirmed_dealer() {
        let store = InMemorySyncStore::new();
        store
            .register_dealer(&CreateDealer {
                dealer_bac: "BAC001".to_string(),
                nombre_dealer: "Dealer BAC001".to_string(),
                url_webhook: "http://localhost/webhook".to_string(),
                secret_key: "secret".to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        store.snapshot_active(7).await.unwrap();

        let result = |estado, error: Option<&str>| WebhookAttemptResult {
            estado,
            attempts: 1,
            error: error.map(str::to_string),
            attempted_at: Utc::now(),
        };
        assert!(store
            .record_webhook_result(7, "BAC001", &result(WebhookStatus::Exitoso, None))
            .await
            .unwrap());
        assert!(!store
            .record_webhook_result(7, "BAC001", &result(WebhookStatus::Fallido, Some("HTTP 500")))
            .await
            .unwrap());

        let row = &store.list_snapshot(7).await.unwrap()[0];
        assert_eq!(row.estado(), Some(WebhookStatus::Exitoso));
        assert_eq!(row.intentos_webhook, 1);
        assert!(row.ultimo_error_webhook.is_none());
    }
}
