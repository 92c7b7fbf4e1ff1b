//! knob-storage: OpenDAL storage for sealed files
//!
//! Object layout under the operator root:
//!   <name>.knob         ciphertext container
//!   <name>.bundle.json  metadata bundle

pub mod operator;
pub mod store;

pub use operator::{build_operator, memory_operator};
pub use store::{Replacement, SealedStore, StoredFile};
