//! 重试：最近命令的记录、持久化与重放

pub mod command;
pub mod ledger;
pub mod store;

pub use command::LastCommand;
pub use ledger::{Replay, ReplayRequest, RetryLedger};
pub use store::{CommandStore, InMemoryCommandStore, SqliteCommandStore};
