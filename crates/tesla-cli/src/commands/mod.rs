//! Command implementations for tesla-cli

pub mod command;
pub mod get;
pub mod stream;

pub use command::command;
pub use get::get;
pub use stream::stream;
