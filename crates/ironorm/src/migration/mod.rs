//! Schema migrations (components H and I): a log-table repository plus a
//! migrator that runs a sorted registry of migrations against it.

pub mod migrator;
pub mod repository;

pub use migrator::{Migration, MigrationReport, Migrator, RollbackOptions, RunOptions};
pub use repository::{MigrationRecord, MigrationRepository, SortOrder};
