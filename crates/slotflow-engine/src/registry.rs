//! Explicit domain registry: domain identifier to subgraph.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use slotflow_core::config::SlotflowConfig;
use slotflow_core::types::DomainId;

use crate::domains::{MeasurementDomain, WorkoutDomain};
use crate::flow::{DomainFlow, FlowStage};
use crate::reply::is_switch_request;
use crate::schema::{RecordSchema, SlotValue};
use crate::slots::FinishedRecord;

/// One tracked domain. The flow mechanics are shared; a subgraph supplies
/// its schema, how it is recognised, and how its records read back.
pub trait DomainSubgraph: Send + Sync {
    fn schema(&self) -> &RecordSchema;

    fn id(&self) -> &DomainId {
        &self.schema().domain
    }

    /// Phrases that indicate an utterance is about this domain.
    fn keywords(&self) -> Vec<String>;

    /// Continuation check for a flow this subgraph owns.
    ///
    /// A flow waiting on a yes/no answer or a commit always keeps the turn.
    /// A collecting flow keeps it unless the user explicitly asks to log
    /// something else.
    fn accepts(&self, flow: &DomainFlow, utterance: &str) -> bool {
        match flow.stage {
            FlowStage::Collecting => !is_switch_request(utterance),
            FlowStage::Confirming | FlowStage::Committing => true,
            FlowStage::Aborted => false,
        }
    }

    /// One-line description of the values, used in confirmation prompts.
    fn summarize(&self, values: &BTreeMap<String, SlotValue>) -> String;

    /// Text echoed back once the record is saved.
    fn describe_saved(&self, record: &FinishedRecord) -> String;
}

/// Registered domains in registration order.
#[derive(Default, Clone)]
pub struct DomainRegistry {
    domains: Vec<Arc<dyn DomainSubgraph>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The workout and measurement domains.
    pub fn with_defaults(config: &SlotflowConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WorkoutDomain::new(
            &config.workout.default_weight_unit,
        )));
        registry.register(Arc::new(MeasurementDomain::new()));
        registry
    }

    /// Add a subgraph, replacing any already registered under the same id.
    pub fn register(&mut self, subgraph: Arc<dyn DomainSubgraph>) {
        debug!(domain = %subgraph.id(), "Registering domain");
        match self.domains.iter().position(|d| d.id() == subgraph.id()) {
            Some(index) => self.domains[index] = subgraph,
            None => self.domains.push(subgraph),
        }
    }

    pub fn get(&self, id: &DomainId) -> Option<Arc<dyn DomainSubgraph>> {
        self.domains.iter().find(|d| d.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<DomainId> {
        self.domains.iter().map(|d| d.id().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DomainSubgraph>> {
        self.domains.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.ids())
            .finish()
    }
}
