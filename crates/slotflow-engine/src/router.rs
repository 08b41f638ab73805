//! Entry node of every turn: decides which domain owns the utterance.

use std::sync::Arc;

use tracing::{debug, warn};

use slotflow_core::config::RouterConfig;
use slotflow_core::types::DomainId;

use crate::error::{EngineError, ExtractionError};
use crate::extract::{ExtractionRequest, SlotExtractor};
use crate::registry::DomainRegistry;
use crate::schema::{ChoiceOption, RecordSchema, SlotKind, SlotSpec, SlotValue};
use crate::session::Session;

const INTENT_SLOT: &str = "domain";

/// Where a turn goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Stay with the session's active flow.
    Continue(DomainId),
    /// Start a fresh flow for this domain.
    Start(DomainId),
    /// No domain matched confidently.
    Unmatched,
}

/// The router's per-turn decision. Not kept beyond the turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub reason: String,
}

impl RoutingDecision {
    fn new(target: RouteTarget, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// Routes turns using the subgraphs' continuation checks first and intent
/// classification second.
pub struct Router {
    registry: Arc<DomainRegistry>,
    extractor: Arc<dyn SlotExtractor>,
    intent_schema: RecordSchema,
    min_confidence: f32,
}

impl Router {
    pub fn new(
        registry: Arc<DomainRegistry>,
        extractor: Arc<dyn SlotExtractor>,
        config: &RouterConfig,
    ) -> Self {
        let intent_schema = intent_schema(&registry);
        Self {
            registry,
            extractor,
            intent_schema,
            min_confidence: config.min_confidence,
        }
    }

    pub async fn route(
        &self,
        session: &Session,
        utterance: &str,
    ) -> Result<RoutingDecision, EngineError> {
        let active = session.flow.as_ref().and_then(|flow| {
            self.registry
                .get(&flow.domain)
                .map(|subgraph| (flow, subgraph))
        });

        if let Some((flow, subgraph)) = &active {
            if subgraph.accepts(flow, utterance) {
                return Ok(RoutingDecision::new(
                    RouteTarget::Continue(flow.domain.clone()),
                    format!("{} flow is {}", flow.domain, flow.stage),
                ));
            }
        }

        let Some((domain, confidence)) = self.classify(utterance).await? else {
            return Ok(RoutingDecision::new(
                RouteTarget::Unmatched,
                "no domain recognised",
            ));
        };

        if session.active_domain() == Some(&domain) {
            return Ok(RoutingDecision::new(
                RouteTarget::Continue(domain),
                "already the active domain",
            ));
        }
        if confidence < self.min_confidence {
            debug!(domain = %domain, confidence, "Intent below routing threshold");
            return Ok(RoutingDecision::new(
                RouteTarget::Unmatched,
                format!("{} matched with low confidence {:.2}", domain, confidence),
            ));
        }
        Ok(RoutingDecision::new(
            RouteTarget::Start(domain),
            format!("intent matched with confidence {:.2}", confidence),
        ))
    }

    async fn classify(&self, utterance: &str) -> Result<Option<(DomainId, f32)>, EngineError> {
        let request = ExtractionRequest::new(utterance, &self.intent_schema);
        let extraction = match self.extractor.extract(&request).await {
            Ok(extraction) => extraction,
            Err(ExtractionError::Malformed(reason)) => {
                warn!(%reason, "Intent classification unreadable");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(match extraction.get(INTENT_SLOT) {
            Some(found) => match &found.value {
                SlotValue::Choice(id) => Some((DomainId::from(id.as_str()), found.confidence)),
                _ => None,
            },
            None => None,
        })
    }
}

/// A one-slot schema whose options are the registered domains.
fn intent_schema(registry: &DomainRegistry) -> RecordSchema {
    let options = registry
        .iter()
        .map(|subgraph| {
            let keywords = subgraph.keywords();
            ChoiceOption {
                id: subgraph.id().to_string(),
                synonyms: keywords,
            }
        })
        .collect();

    RecordSchema::new(
        "intent",
        vec![SlotSpec::new(INTENT_SLOT, SlotKind::Choice { options }).required()],
    )
}
