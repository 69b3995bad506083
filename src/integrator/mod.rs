// src/integrator/mod.rs — Textual merge of a round's drafts

use serde::{Deserialize, Serialize};

use crate::infra::errors::{DraftloomError, Result};

/// Separator placed between drafts in a multi-draft merge.
pub const DRAFT_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegratorInput {
    /// Drafts in round-collection order.
    pub drafts: Vec<String>,
    /// Compressed history of earlier rounds. Carried for provider-backed
    /// integration; the textual merge does not read it.
    pub history: Option<String>,
}

impl IntegratorInput {
    pub fn new<I, S>(drafts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            drafts: drafts.into_iter().map(Into::into).collect(),
            history: None,
        }
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = Some(history.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub index: usize,
    pub length: usize,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedOutput {
    pub unified: String,
    pub change_log: Vec<ChangeLogEntry>,
}

impl IntegratedOutput {
    pub fn draft_count(&self) -> usize {
        self.change_log.len()
    }
}

/// Stateless merge step. Deterministic for a given input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DraftIntegrator;

impl DraftIntegrator {
    pub fn new() -> Self {
        Self
    }

    pub fn integrate(&self, input: &IntegratorInput) -> Result<IntegratedOutput> {
        match input.drafts.as_slice() {
            [] => Err(DraftloomError::NoDraftsProvided),
            [only] => Ok(IntegratedOutput {
                unified: only.clone(),
                change_log: vec![ChangeLogEntry {
                    index: 0,
                    length: only.len(),
                    note: "single draft used, no integration needed".into(),
                }],
            }),
            drafts => {
                let change_log = drafts
                    .iter()
                    .enumerate()
                    .map(|(index, draft)| ChangeLogEntry {
                        index,
                        length: draft.len(),
                        note: format!("draft {} of {} merged", index + 1, drafts.len()),
                    })
                    .collect();
                Ok(IntegratedOutput {
                    unified: drafts.join(DRAFT_DELIMITER),
                    change_log,
                })
            }
        }
    }
}
