//! HTTP handlers, one submodule per API area.

pub mod account;
pub mod admin;
pub mod funding;
pub mod fx;
pub mod health;
pub mod swap;
pub mod transfer;
pub mod webhook;

// Glob re-exports carry the `__path_*` items utoipa generates next to each handler
pub use account::*;
pub use admin::*;
pub use funding::*;
pub use fx::*;
pub use health::*;
pub use swap::*;
pub use transfer::*;
pub use webhook::*;
