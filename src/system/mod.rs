//! Gateway to the host: filesystem operations, external commands, and the
//! dry-run decorator that sits in front of both.

pub mod command;
pub mod dry_run;
pub mod filesystem;

pub use command::{CommandExecutor, CommandOutput, Invocation, SystemCommandExecutor};
pub use dry_run::DryRun;
pub use filesystem::{DiskUsage, FileSystem, LocalFileSystem, Owner};
