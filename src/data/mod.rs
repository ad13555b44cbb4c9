//! Raw data access: tables and per-source loading

pub mod loader;
pub mod table;

pub use loader::{EventStreams, RecordLoader, SourceFrame};
pub use table::{Column, Table};
