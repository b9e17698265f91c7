//! Database module: view models and SQL repositories.
//!
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into domain entities.
//!
//! The repository API is re-exported at `leadgen::db::*`.

pub mod model;
pub mod repo;

pub use model::{ConversionStats, InsertOutcome, LeadOverview, OutreachScores, PendingSend};
pub use repo::*;
