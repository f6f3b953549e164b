// shared-types-rs/src/lib.rs
// Entities, template types and the persistence contract shared by the
// prompt loop (evaluate / patch / ingest) and the self-healing loop
// (recovery / drift / incidents).

pub mod audit_log;
pub mod deadline;
pub mod hashing;
pub mod memory;
pub mod model;
pub mod repository;
pub mod template;


pub use audit_log::FileAuditLog;
pub use deadline::with_deadline;
pub use hashing::prompt_hash;
pub use memory::{InMemoryStore, SeedData};
pub use model::*;
pub use repository::*;
pub use template::{field_label, KbStub, NicheOverlay, PatchDescriptor, StandardKit};
