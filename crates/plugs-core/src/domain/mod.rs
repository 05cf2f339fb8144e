//! Domain model (IDs, plug records, audit entries, errors).

pub mod errors;
pub mod ids;
pub mod plug;

pub use self::errors::{Backend, BackendError, ErrorKind, PlugError, Result};
pub use self::ids::{ASSET_REF_MAX_LEN, AssetRef, OWNER_MAX_LEN, PlugId, UserId};
pub use self::plug::{AuditEntry, NewPlug, Plug, PlugKind, Severity, UNLIMITED_VIEWS};
