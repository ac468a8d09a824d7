//! Durable step execution.
//!
//! A workflow is a fixed sequence of named steps. Each completed step's output
//! is recorded in the [`StepJournal`] under `(workflow_id, step_index)` together
//! with a SHA-256 of its input. When a crashed or retried workflow runs again
//! under the same id, completed steps are replayed from the journal instead of
//! executed, so side effects such as LLM calls and writes happen once.
//!
//! Failed steps are never recorded; a retry executes them again.

use notesim_proto::{Error, Result, StepJournal, StepRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub struct WorkflowRunner {
    workflow_id: String,
    journal: Arc<dyn StepJournal>,
    next_index: u32,
    replayed: u32,
}

impl WorkflowRunner {
    pub fn new(workflow_id: impl Into<String>, journal: Arc<dyn StepJournal>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            journal,
            next_index: 0,
            replayed: 0,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Number of steps served from the journal so far.
    pub fn replayed_steps(&self) -> u32 {
        self.replayed
    }

    /// Runs `run` as the next step, or replays its journaled output.
    ///
    /// Replaying a step whose name or input differs from the journaled record
    /// fails with [`Error::NonDeterministicReplay`].
    pub async fn step<I, O, F, Fut>(&mut self, name: &str, input: &I, run: F) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let step_index = self.next_index;
        self.next_index += 1;
        let input_hash = hash_input(input)?;

        if let Some(record) = self.journal.load_step(&self.workflow_id, step_index).await? {
            if record.step_name != name || record.input_hash != input_hash {
                return Err(Error::NonDeterministicReplay {
                    workflow_id: self.workflow_id.clone(),
                    step: name.to_string(),
                });
            }
            debug!(
                workflow_id = %self.workflow_id,
                step = name,
                step_index,
                "Replaying journaled step"
            );
            self.replayed += 1;
            return Ok(serde_json::from_str(&record.output)?);
        }

        let output = run().await?;
        self.journal
            .record_step(StepRecord {
                workflow_id: self.workflow_id.clone(),
                step_index,
                step_name: name.to_string(),
                input_hash,
                output: serde_json::to_string(&output)?,
            })
            .await?;
        debug!(
            workflow_id = %self.workflow_id,
            step = name,
            step_index,
            "Step completed"
        );
        Ok(output)
    }
}

fn hash_input<I: Serialize + ?Sized>(input: &I) -> Result<String> {
    let bytes = serde_json::to_vec(input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
