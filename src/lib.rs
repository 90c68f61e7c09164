pub mod compactor;
pub mod config;
pub mod engine;
pub mod model;
pub mod observability;
pub mod wal;
pub mod wire;
