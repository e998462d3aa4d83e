//! Control plane for an LLM coding agent.
//!
//! A model reply is decoded into at most one action per turn, the action is
//! dispatched to a registered tool, and the tool's result is fed back as the
//! next observation until the model reports completion, a tool reports a
//! fatal failure, or the step budget runs out.
//!
//! - **[`core`]**: Pure logic (action decoding, outcome types, budgets,
//!   failure classification, path containment). No I/O.
//! - **[`io`]**: Side-effecting collaborators (workspace, git, test runner,
//!   change-request host, ticket tracker, model server).
//! - **[`tools`]**: The registry and the tool adapters over `io`.
//!
//! [`step`] runs one turn; [`looping`] drives a whole task.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
