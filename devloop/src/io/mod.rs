//! Side-effecting collaborators: filesystem, git, subprocesses, HTTP.

pub mod config;
pub mod delivery;
pub mod git;
pub mod init;
pub mod installer;
pub mod model;
pub mod process;
pub mod prompt;
pub mod ticket;
pub mod verify;
pub mod workspace;
