use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::{
    Result, ShareLock, StepflowError,
    store::{NodeRunOutcome, NodeRunRecorder, RecordId, data::NodeRun},
    utils,
};

type RunKey = (String, String, u32);

#[derive(Debug, Default)]
struct Records {
    /// records in begin order
    rows: Vec<NodeRun>,
    by_id: HashMap<RecordId, usize>,
    by_key: HashMap<RunKey, RecordId>,
}

/// In-memory [`NodeRunRecorder`].
#[derive(Debug, Clone, Default)]
pub struct MemRecorder {
    records: ShareLock<Records>,
}

impl MemRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Records::default())),
        }
    }

    /// Records of `run_id` in the order they were begun.
    pub fn records(
        &self,
        run_id: &str,
    ) -> Vec<NodeRun> {
        let records = self.records.read().unwrap();
        records.rows.iter().filter(|r| r.run_id == run_id).cloned().collect()
    }

    pub fn find(
        &self,
        run_id: &str,
        node_id: &str,
        iteration: u32,
    ) -> Option<NodeRun> {
        let records = self.records.read().unwrap();
        let id = records.by_key.get(&(run_id.to_string(), node_id.to_string(), iteration))?;
        records.by_id.get(id).map(|idx| records.rows[*idx].clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NodeRunRecorder for MemRecorder {
    async fn begin(
        &self,
        run_id: &str,
        node_id: &str,
        iteration: u32,
        input: &Value,
    ) -> Result<RecordId> {
        let mut records = self.records.write().unwrap();
        let key = (run_id.to_string(), node_id.to_string(), iteration);
        if records.by_key.contains_key(&key) {
            return Err(StepflowError::Recorder(format!("node run ({}, {}, {}) already exists", run_id, node_id, iteration)));
        }

        let id = utils::record_id();
        trace!("recorder::begin({}, {}, {}) -> {}", run_id, node_id, iteration, id);
        let idx = records.rows.len();
        records.rows.push(NodeRun {
            id: id.clone(),
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            iteration,
            input: input.clone(),
            status: Default::default(),
            output_text: None,
            output_json: None,
            primary_artifact_id: None,
            err: None,
            start_time: utils::time_millis(),
            end_time: 0,
        });
        records.by_id.insert(id.clone(), idx);
        records.by_key.insert(key, id.clone());
        Ok(id)
    }

    async fn finish(
        &self,
        record_id: &str,
        outcome: NodeRunOutcome,
    ) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let idx = *records.by_id.get(record_id).ok_or_else(|| StepflowError::Recorder(format!("node run {} not found", record_id)))?;
        let row = &mut records.rows[idx];
        if row.status.is_terminal() {
            return Err(StepflowError::Recorder(format!("node run {} is already {}", record_id, row.status)));
        }

        trace!("recorder::finish({}, {})", record_id, outcome.status);
        row.status = outcome.status;
        row.output_text = outcome.output_text;
        row.output_json = outcome.output_json;
        row.primary_artifact_id = outcome.primary_artifact_id;
        row.err = outcome.error;
        row.end_time = utils::time_millis();
        Ok(())
    }
}
