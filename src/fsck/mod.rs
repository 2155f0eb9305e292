//! Mount-time volume verification.

pub mod fsck;
pub mod fsck_backend;
pub mod fsck_types;

pub use fsck::{run_fsck, verify, ValidatedVolume};
pub use fsck_backend::FsckBackend;
pub use fsck_types::{Finding, FsckReport, Inconsistency};
