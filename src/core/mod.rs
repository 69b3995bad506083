// src/core/mod.rs — Feedback loop engine

pub mod feedback_loop;
pub mod history;
pub mod orchestrator;
pub mod policy;
pub mod types;
