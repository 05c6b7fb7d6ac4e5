//! Fan-out of one sync run to its dealer snapshot.
//!
//! Each eligible dealer gets its own delivery future; at most
//! `max_concurrent_dispatches` run at once. Outcomes are folded into the
//! run's [`DispatchTally`] by the single task draining the stream, which
//! persists the counters after every outcome.

use chrono::{SubsecRound, Utc};
use dealersync_core::error::SyncError;
use dealersync_core::hashing::{format_token_timestamp, generate_token_confirmacion};
use dealersync_core::sync::{truncate_error, DispatchTally};
use dealersync_db::models::confirmation::CreateConfirmation;
use dealersync_db::models::dealer::{SnapshotDealer, WebhookAttemptResult};
use dealersync_db::models::status::WebhookStatus;
use dealersync_db::models::sync_control::SyncControl;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::delivery::{WebhookClient, WebhookError, WebhookPayload};
use crate::store::SyncStores;

/// What happened to one dealer during a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DealerOutcome {
    Processed,
    Failed,
    /// Cancellation arrived before the dealer was contacted.
    NotStarted,
    /// Cancellation stopped a delivery between retries. The dealer has no
    /// outcome for this run and stays eligible.
    Interrupted,
}

/// Delivers a run's webhooks and maintains its counters.
pub struct WebhookDispatcher {
    stores: SyncStores,
    client: WebhookClient,
    max_concurrent: usize,
}

impl WebhookDispatcher {
    pub fn new(stores: SyncStores, config: &SyncConfig) -> Result<Self, WebhookError> {
        let client = WebhookClient::new(
            config.webhook_timeout,
            config.retry_delays.clone(),
            config.verify_ack_token,
        )?;
        Ok(Self {
            stores,
            client,
            max_concurrent: config.max_concurrent_dispatches.max(1),
        })
    }

    /// Deliver the run's webhooks to every eligible dealer of its event.
    ///
    /// Dealers already EXITOSO are counted as omitted without any request.
    /// Per-dealer delivery failures are recorded and never returned; only
    /// store failures abort the dispatch. After cancellation no new dealer is
    /// contacted and deliveries waiting to retry stop without an outcome, so
    /// the returned tally is incomplete whenever cancellation cut work short.
    pub async fn dispatch(
        &self,
        control: &SyncControl,
        cancel: &CancellationToken,
    ) -> Result<DispatchTally, SyncError> {
        let dealers = self
            .stores
            .dealers
            .list_snapshot(control.evento_carga_proceso_id)
            .await?;
        let total = i32::try_from(dealers.len())
            .map_err(|_| SyncError::Unexpected("Too many dealers in snapshot".to_string()))?;
        let mut tally = DispatchTally::new(total);

        let mut eligible = Vec::with_capacity(dealers.len());
        for dealer in dealers {
            if dealer.is_eligible() {
                eligible.push(dealer);
            } else {
                tracing::debug!(
                    process_id = control.id,
                    dealer_bac = %dealer.dealer_bac,
                    "Dealer already confirmed, omitting"
                );
                tally.record_omitted()?;
            }
        }
        self.persist_progress(control, &tally).await?;

        tracing::info!(
            process_id = control.id,
            evento_carga_proceso_id = control.evento_carga_proceso_id,
            totales = tally.totales,
            omitidos = tally.omitidos,
            eligible = eligible.len(),
            "Dispatching webhooks"
        );

        let mut outcomes = stream::iter(eligible)
            .map(|dealer| self.deliver_one(control, dealer, cancel))
            .buffer_unordered(self.max_concurrent);

        while let Some(outcome) = outcomes.next().await {
            match outcome? {
                DealerOutcome::Processed => tally.record_processed()?,
                DealerOutcome::Failed => tally.record_failed()?,
                DealerOutcome::NotStarted | DealerOutcome::Interrupted => continue,
            }
            self.persist_progress(control, &tally).await?;
        }

        Ok(tally)
    }

    async fn persist_progress(
        &self,
        control: &SyncControl,
        tally: &DispatchTally,
    ) -> Result<(), SyncError> {
        if !self.stores.controls.update_progress(control.id, tally).await? {
            return Err(SyncError::Unexpected(format!(
                "Sync control {} is no longer RUNNING",
                control.id
            )));
        }
        Ok(())
    }

    /// Deliver to one dealer and record the outcome on its snapshot row.
    async fn deliver_one(
        &self,
        control: &SyncControl,
        dealer: SnapshotDealer,
        cancel: &CancellationToken,
    ) -> Result<DealerOutcome, SyncError> {
        if cancel.is_cancelled() {
            return Ok(DealerOutcome::NotStarted);
        }

        // Fixed for every retry of this delivery so the token stays stable.
        let fecha_sincronizacion = Utc::now().trunc_subsecs(0);
        let token = generate_token_confirmacion(
            &control.id_carga,
            &dealer.dealer_bac,
            &control.process_type,
            &fecha_sincronizacion,
            control.registros_carga,
        );
        let payload = WebhookPayload {
            proceso: control.process_type.clone(),
            id_carga: control.id_carga.clone(),
            evento_carga_proceso_id: control.evento_carga_proceso_id,
            dealer_bac: dealer.dealer_bac.clone(),
            fecha_sincronizacion: format_token_timestamp(&fecha_sincronizacion),
            registros_sincronizados: control.registros_carga,
            token_confirmacion: token.clone(),
        };

        let report = self
            .client
            .deliver(&dealer.url_webhook, &dealer.secret_key, &payload, cancel)
            .await;

        match report.outcome {
            Err(WebhookError::Cancelled) => {
                tracing::warn!(
                    process_id = control.id,
                    dealer_bac = %dealer.dealer_bac,
                    attempts = report.attempts,
                    "Delivery interrupted by cancellation, dealer left without outcome"
                );
                Ok(DealerOutcome::Interrupted)
            }
            Ok(_) => {
                let confirmation = CreateConfirmation {
                    evento_carga_proceso_id: control.evento_carga_proceso_id,
                    dealer_bac: dealer.dealer_bac.clone(),
                    fecha_sincronizacion,
                    registros_sincronizados: control.registros_carga,
                    token_confirmacion: token,
                };
                match self.stores.confirmations.insert_confirmation(&confirmation).await {
                    Ok(_) => {}
                    Err(SyncError::Duplicate(_)) => {
                        tracing::info!(
                            process_id = control.id,
                            dealer_bac = %dealer.dealer_bac,
                            "Confirmation already recorded by an earlier attempt"
                        );
                    }
                    Err(e) => return Err(e),
                }

                self.stores
                    .dealers
                    .record_webhook_result(
                        control.evento_carga_proceso_id,
                        &dealer.dealer_bac,
                        &WebhookAttemptResult {
                            estado: WebhookStatus::Exitoso,
                            attempts: report.attempts,
                            error: None,
                            attempted_at: Utc::now(),
                        },
                    )
                    .await?;

                tracing::info!(
                    process_id = control.id,
                    dealer_bac = %dealer.dealer_bac,
                    attempts = report.attempts,
                    "Dealer acknowledged webhook"
                );
                Ok(DealerOutcome::Processed)
            }
            Err(e) => {
                let recorded = self
                    .stores
                    .dealers
                    .record_webhook_result(
                        control.evento_carga_proceso_id,
                        &dealer.dealer_bac,
                        &WebhookAttemptResult {
                            estado: WebhookStatus::Fallido,
                            attempts: report.attempts,
                            error: Some(truncate_error(&e.to_string())),
                            attempted_at: Utc::now(),
                        },
                    )
                    .await?;
                if !recorded {
                    tracing::info!(
                        process_id = control.id,
                        dealer_bac = %dealer.dealer_bac,
                        error = %e,
                        "Dealer confirmed out of band during delivery, keeping EXITOSO"
                    );
                    return Ok(DealerOutcome::Processed);
                }

                tracing::warn!(
                    process_id = control.id,
                    dealer_bac = %dealer.dealer_bac,
                    attempts = report.attempts,
                    error = %e,
                    "Dealer webhook failed"
                );
                Ok(DealerOutcome::Failed)
            }
        }
    }
}
