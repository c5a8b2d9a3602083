//! Adapters for everything outside the process: files, git, the PR host,
//! the generation backend and the build tool.

pub mod build;
pub mod config;
pub mod generator;
pub mod git;
pub mod hosting;
pub mod materialize;
pub mod process;
pub mod scaffold;
pub mod state;
