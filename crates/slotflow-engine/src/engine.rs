//! The turn handler: the engine's only entry point for utterances.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use slotflow_core::config::SlotflowConfig;
use slotflow_core::types::{SessionId, UserId};

use crate::error::EngineError;
use crate::extract::SlotExtractor;
use crate::flow::{DomainFlow, FlowDriver, FlowStage};
use crate::gateway::PersistenceGateway;
use crate::outcome::TurnOutcome;
use crate::registry::DomainRegistry;
use crate::reply::is_cancel;
use crate::router::{RouteTarget, Router};
use crate::session::{Session, SessionSnapshot, SessionStore};

/// One inbound turn from the transport layer.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub utterance: String,
}

impl TurnInput {
    pub fn new(
        session_id: impl Into<SessionId>,
        user_id: impl Into<UserId>,
        utterance: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            utterance: utterance.into(),
        }
    }
}

/// Routes turns to domain flows and keeps per-session state.
///
/// A turn works on a copy of its session and writes it back only when the
/// turn succeeds, so an error leaves the session exactly as it was.
pub struct ConversationEngine {
    sessions: SessionStore,
    registry: Arc<DomainRegistry>,
    router: Router,
    driver: FlowDriver,
    max_utterance_chars: usize,
    history_turns: usize,
}

impl ConversationEngine {
    pub fn new(
        config: &SlotflowConfig,
        registry: DomainRegistry,
        extractor: Arc<dyn SlotExtractor>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let registry = Arc::new(registry);
        let idle_timeout_secs = i64::from(config.session.idle_timeout_minutes) * 60;
        Self {
            sessions: SessionStore::new(idle_timeout_secs),
            router: Router::new(Arc::clone(&registry), Arc::clone(&extractor), &config.router),
            driver: FlowDriver::new(config, extractor, gateway),
            registry,
            max_utterance_chars: config.session.max_utterance_chars,
            history_turns: config.session.history_turns,
        }
    }

    /// Handle one utterance.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub async fn handle_turn(&self, input: TurnInput) -> Result<TurnOutcome, EngineError> {
        let utterance = input.utterance.trim();
        if utterance.is_empty() {
            return Err(EngineError::EmptyUtterance);
        }
        if utterance.chars().count() > self.max_utterance_chars {
            return Err(EngineError::UtteranceTooLong(self.max_utterance_chars));
        }

        let handle = self.sessions.open(&input.session_id, &input.user_id)?;
        let mut guard = handle.lock().await;
        let mut session = guard.clone();

        let outcome = self.run_turn(&mut session, utterance).await?;
        if matches!(outcome, TurnOutcome::Unrouted { .. }) {
            debug!("No domain matched; session untouched");
            return Ok(outcome);
        }

        session.record_turn(utterance, outcome.text(), self.history_turns);
        *guard = session;
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        utterance: &str,
    ) -> Result<TurnOutcome, EngineError> {
        if session.flow.is_none() && is_cancel(utterance) {
            return Ok(TurnOutcome::Aborted {
                domain: None,
                text: "There's nothing to cancel.".to_string(),
            });
        }

        let decision = self.router.route(session, utterance).await?;
        debug!(route = ?decision.target, reason = %decision.reason, "Routed turn");

        let domain = match decision.target {
            RouteTarget::Unmatched => {
                let known: Vec<String> = self.registry.ids().iter().map(|d| d.to_string()).collect();
                return Ok(TurnOutcome::Unrouted {
                    text: format!(
                        "Sorry, I'm not sure what to log. I can record a {}.",
                        known.join(" or a ")
                    ),
                });
            }
            RouteTarget::Continue(domain) => domain,
            RouteTarget::Start(domain) => {
                let subgraph = self
                    .registry
                    .get(&domain)
                    .ok_or_else(|| EngineError::UnknownDomain(domain.clone()))?;
                if let Some(previous) = session.flow.take() {
                    info!(from = %previous.domain, to = %domain, "Abandoning flow for new domain");
                }
                info!(domain = %domain, "Flow started");
                session.flow = Some(DomainFlow::new(subgraph.schema()));
                domain
            }
        };

        let subgraph = self
            .registry
            .get(&domain)
            .ok_or_else(|| EngineError::UnknownDomain(domain.clone()))?;
        let flow = session
            .flow
            .as_mut()
            .ok_or_else(|| EngineError::UnknownDomain(domain.clone()))?;

        let step = self
            .driver
            .step(subgraph.as_ref(), flow, &session.user_id, utterance)
            .await?;
        if step.finished {
            session.flow = None;
        }
        Ok(step.outcome)
    }

    /// Retry the outstanding save of a session without a new utterance.
    pub async fn retry_commit(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<TurnOutcome, EngineError> {
        let handle = self.sessions.get(session_id, user_id)?;
        let mut guard = handle.lock().await;
        let mut session = guard.clone();

        let flow = session
            .flow
            .as_mut()
            .filter(|f| f.stage == FlowStage::Committing)
            .ok_or(EngineError::NothingToCommit)?;
        let subgraph = self
            .registry
            .get(&flow.domain)
            .ok_or_else(|| EngineError::UnknownDomain(flow.domain.clone()))?;

        let step = self
            .driver
            .commit(subgraph.as_ref(), flow, &session.user_id)
            .await?;
        if step.finished {
            session.flow = None;
        }
        *guard = session;
        Ok(step.outcome)
    }

    /// Current state of a session.
    pub async fn snapshot(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<SessionSnapshot, EngineError> {
        let handle = self.sessions.get(session_id, user_id)?;
        let session = handle.lock().await;
        let subgraph = session
            .active_domain()
            .and_then(|domain| self.registry.get(domain));
        Ok(session.snapshot(subgraph.as_ref().map(|s| s.schema())))
    }

    pub fn close_session(&self, session_id: &SessionId) -> bool {
        self.sessions.close(session_id)
    }

    pub fn purge_idle(&self) -> usize {
        self.sessions.purge_idle()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }
}
