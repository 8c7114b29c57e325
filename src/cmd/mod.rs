//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                        |
//! |-----------------|---------------------------------------------------------|
//! | `snapshot`      | `RollbackPoints`, `Rollback`, `ClearSnapshots`          |
//! | `undo`          | `Undo`, `UndoHistory`                                   |
//! | `config`        | `Config`                                                |

pub mod config;
pub mod snapshot;
pub mod undo;

pub use config::cmd_config;
pub use snapshot::{cmd_clear_snapshots, cmd_rollback, cmd_rollback_points};
pub use undo::{cmd_undo, cmd_undo_history};
