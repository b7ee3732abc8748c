pub mod commands;

pub use commands::Cli;
pub use commands::Command;
pub use commands::run_command;
