pub mod compaction;
pub mod config;
pub mod content;
pub mod conversation;
pub mod errors;
pub mod ferry_config;
pub mod logging;
pub mod message;
pub mod retry;
pub mod snapshot;
pub mod storage;
pub mod stream;
pub mod tokens;
pub mod undo;
