//! Local runner for the execution engine.
//!
//! [`NodeSandbox`] runs programs as child processes in a work directory;
//! [`Renderer`] prints the coordinator's event stream to a terminal.

pub mod node_sandbox;
pub mod render;

pub use node_sandbox::NodeSandbox;
pub use render::{format_report, RenderMode, Renderer};
