//! Wire protocol modules.
//!
//! - `envelope`: the closed, tagged JSON message set exchanged on a channel.
//! - `ids`: identity newtypes that accept both JSON numbers and strings.
//! - `close`: close-code policy shared by the gateway and reconnecting clients.
//!
//! Decoding never panics: malformed input is a `SigncastError::BadRequest`,
//! and an unrecognized `type` decodes to `Envelope::Unknown`.

pub mod close;
pub mod envelope;
pub mod ids;

pub use close::{is_clean_close, CloseReason};
pub use envelope::{decode, timestamp, ConnectionInfo, Envelope, Role};
pub use ids::{ClientId, ContentId, HeadquartersId};
