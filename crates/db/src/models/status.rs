//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table. The name is the value
//! exposed in API responses.

use serde::{Serialize, Serializer};

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Upper-case name used in API payloads.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }

            /// Parse a name case-insensitively.
            pub fn from_name(name: &str) -> Option<Self> {
                $(
                    if name.eq_ignore_ascii_case($label) {
                        return Some(Self::$variant);
                    }
                )+
                None
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Batch sync attempt lifecycle status.
    SyncStatus {
        Pending = 1 => "PENDING",
        Running = 2 => "RUNNING",
        Completed = 3 => "COMPLETED",
        Failed = 4 => "FAILED",
    }
}

define_status_enum! {
    /// Per-dealer webhook delivery status.
    WebhookStatus {
        Pending = 1 => "PENDING",
        Exitoso = 2 => "EXITOSO",
        Fallido = 3 => "FALLIDO",
    }
}

impl SyncStatus {
    /// COMPLETED and FAILED accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Running)
                | (SyncStatus::Running, SyncStatus::Completed)
                | (SyncStatus::Running, SyncStatus::Failed)
        )
    }
}
