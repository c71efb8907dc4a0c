//! adminsync core types
//!
//! Pure data: the admin API wire types, the error taxonomy shared by every
//! read and write, composite cache keys, the invalidation rule table and the
//! realtime frame format. No I/O lives here.

pub mod error;
pub mod events;
pub mod invalidation;
pub mod key;
pub mod resources;
pub mod types;

use chrono::{DateTime, Utc};

pub use error::{SyncError, SyncResult, ValidationError};
pub use events::{change_for, Alert, AlertSeverity, AlertStatus, AlertType, DomainEvent, Frame};
pub use invalidation::{rule, Change, ChangeKind, KeyTarget};
pub use key::QueryKey;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
