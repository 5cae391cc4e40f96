//! Token, user and authorization-code persistence.
//!
//! `PgStore` is the production backend and the only one that may be shared
//! by several server instances. `MemoryStore` keeps everything in process.

pub mod bin;
pub mod db;
pub mod memory;

pub use bin::{AuthorizationCodeBin, TokenBin, UserBin};
pub use db::PgStore;
pub use memory::MemoryStore;
