//! Shared registries mutated by concurrent handlers.
//!
//! Both stores guard their maps with one process-wide lock each; message
//! volumes are modest enough that per-topic locking buys nothing. Neither
//! lock is ever held across an await point or while the authenticator's
//! trust store is locked.

mod group;
mod subs;

pub use group::GroupStore;
pub use subs::SubStore;
