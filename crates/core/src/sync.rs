//! Batch sync validation rules and run-level counters.
//!
//! Pure functions and types used by the orchestrator, the dispatcher and
//! the HTTP handlers.

use serde::Serialize;

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a process type name (e.g. `ProductList`).
pub const MAX_PROCESS_TYPE_LEN: usize = 100;

/// Maximum length of a load identifier (`idCarga`).
pub const MAX_ID_CARGA_LEN: usize = 100;

/// Maximum length of a dealer BAC code.
pub const MAX_DEALER_BAC_LEN: usize = 50;

/// Maximum length of a stored delivery error message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a process type name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_PROCESS_TYPE_LEN` characters.
/// - Must contain only ASCII alphanumeric, hyphen, or underscore characters,
///   so it can be embedded in a lock key unchanged.
pub fn validate_process_type(process_type: &str) -> Result<(), SyncError> {
    if process_type.is_empty() {
        return Err(SyncError::Validation(
            "Process type must not be empty".to_string(),
        ));
    }
    if process_type.len() > MAX_PROCESS_TYPE_LEN {
        return Err(SyncError::Validation(format!(
            "Process type must not exceed {MAX_PROCESS_TYPE_LEN} characters"
        )));
    }
    if !process_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SyncError::Validation(
            "Process type may only contain alphanumeric, hyphen, or underscore characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate a load identifier. Must be non-blank and at most
/// `MAX_ID_CARGA_LEN` characters.
pub fn validate_id_carga(id_carga: &str) -> Result<(), SyncError> {
    if id_carga.trim().is_empty() {
        return Err(SyncError::Validation("idCarga must not be empty".to_string()));
    }
    if id_carga.len() > MAX_ID_CARGA_LEN {
        return Err(SyncError::Validation(format!(
            "idCarga must not exceed {MAX_ID_CARGA_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a dealer BAC code. Must be non-blank and at most
/// `MAX_DEALER_BAC_LEN` characters.
pub fn validate_dealer_bac(dealer_bac: &str) -> Result<(), SyncError> {
    if dealer_bac.trim().is_empty() {
        return Err(SyncError::Validation(
            "dealerBac must not be empty".to_string(),
        ));
    }
    if dealer_bac.len() > MAX_DEALER_BAC_LEN {
        return Err(SyncError::Validation(format!(
            "dealerBac must not exceed {MAX_DEALER_BAC_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a synchronized record count.
pub fn validate_registros(registros: i32) -> Result<(), SyncError> {
    if registros < 0 {
        return Err(SyncError::Validation(
            "Record count must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Truncate an error message to `MAX_ERROR_MESSAGE_LEN` characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Run-level webhook counters for one sync attempt.
///
/// `procesados + fallidos + omitidos` never exceeds `totales`; every
/// recording method refuses to cross that bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTally {
    pub totales: i32,
    pub procesados: i32,
    pub fallidos: i32,
    pub omitidos: i32,
}

impl DispatchTally {
    /// Start a tally for `totales` dealers.
    pub fn new(totales: i32) -> Self {
        Self {
            totales,
            ..Self::default()
        }
    }

    /// Number of dealers with a recorded outcome.
    pub fn accounted(&self) -> i32 {
        self.procesados + self.fallidos + self.omitidos
    }

    /// Number of dealers still without an outcome.
    pub fn remaining(&self) -> i32 {
        self.totales - self.accounted()
    }

    /// Whether every dealer has an outcome.
    pub fn is_complete(&self) -> bool {
        self.accounted() == self.totales
    }

    /// Record a delivered and acknowledged webhook.
    pub fn record_processed(&mut self) -> Result<(), SyncError> {
        self.ensure_room()?;
        self.procesados += 1;
        Ok(())
    }

    /// Record a failed webhook.
    pub fn record_failed(&mut self) -> Result<(), SyncError> {
        self.ensure_room()?;
        self.fallidos += 1;
        Ok(())
    }

    /// Record a dealer skipped because it already succeeded.
    pub fn record_omitted(&mut self) -> Result<(), SyncError> {
        self.ensure_room()?;
        self.omitidos += 1;
        Ok(())
    }

    fn ensure_room(&self) -> Result<(), SyncError> {
        if self.remaining() <= 0 {
            return Err(SyncError::Unexpected(format!(
                "Webhook counters exceed total of {}",
                self.totales
            )));
        }
        Ok(())
    }
}
