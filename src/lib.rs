// src/lib.rs — Library root for draftloom

pub mod cli;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod integrator;
pub mod prompts;
pub mod provider;
pub mod util;
