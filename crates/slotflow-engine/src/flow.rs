//! The per-domain flow: collecting, confirming and committing one record.
//!
//! [`DomainFlow`] is the state a session holds for its active domain;
//! [`FlowDriver`] advances it by one utterance. The driver mutates the flow
//! it is given, so callers hand it a working copy and keep the copy only
//! when the step succeeds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use slotflow_core::config::{ConfirmationMode, SlotflowConfig};
use slotflow_core::types::{DomainId, Timestamp, UserId};

use crate::error::{EngineError, ExtractionError, FlowError, GatewayError};
use crate::extract::{Extraction, ExtractionRequest, SlotExtractor};
use crate::gateway::PersistenceGateway;
use crate::outcome::TurnOutcome;
use crate::registry::DomainSubgraph;
use crate::reply::{classify_reply, has_correction_cue, implicated_slots, is_cancel, ReplyKind};
use crate::schema::{RecordSchema, SlotSpec};
use crate::slots::{FinishedRecord, SlotSet, SlotUpdate};

/// Stage of a domain flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Collecting,
    Confirming,
    Committing,
    Aborted,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStage::Collecting => "collecting",
            FlowStage::Confirming => "confirming",
            FlowStage::Committing => "committing",
            FlowStage::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Validate that a flow stage transition is allowed.
///
/// Valid transitions:
/// - Collecting -> Confirming (all required slots filled)
/// - Collecting -> Committing (confirmation skipped for confident values)
/// - Confirming -> Collecting (user denied)
/// - Confirming -> Committing (user affirmed)
/// - Committing -> Collecting (saved, or rejected by the gateway)
/// - any live stage -> Aborted (user cancelled)
pub fn validate_stage_transition(from: FlowStage, to: FlowStage) -> Result<(), FlowError> {
    let valid = matches!(
        (from, to),
        (FlowStage::Collecting, FlowStage::Confirming)
            | (FlowStage::Collecting, FlowStage::Committing)
            | (FlowStage::Confirming, FlowStage::Collecting)
            | (FlowStage::Confirming, FlowStage::Committing)
            | (FlowStage::Committing, FlowStage::Collecting)
            | (FlowStage::Collecting, FlowStage::Aborted)
            | (FlowStage::Confirming, FlowStage::Aborted)
            | (FlowStage::Committing, FlowStage::Aborted)
    );

    if valid {
        Ok(())
    } else {
        Err(FlowError::InvalidTransition(from, to))
    }
}

/// One in-progress record for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainFlow {
    pub domain: DomainId,
    pub stage: FlowStage,
    pub slots: SlotSet,
    /// Slot the user was last asked for.
    pub awaiting: Option<String>,
    /// Finished record waiting for the gateway. Set only while committing.
    pub pending: Option<FinishedRecord>,
    /// The user rejected the summary without naming what was wrong.
    pub revising: bool,
    pub started_at: Timestamp,
}

impl DomainFlow {
    pub fn new(schema: &RecordSchema) -> Self {
        Self {
            domain: schema.domain.clone(),
            stage: FlowStage::Collecting,
            slots: SlotSet::new(schema),
            awaiting: None,
            pending: None,
            revising: false,
            started_at: Timestamp::now(),
        }
    }

    pub fn transition(&mut self, to: FlowStage) -> Result<(), FlowError> {
        validate_stage_transition(self.stage, to)?;
        debug!(domain = %self.domain, from = %self.stage, to = %to, "Flow stage change");
        self.stage = to;
        Ok(())
    }
}

/// Outcome of advancing a flow by one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub outcome: TurnOutcome,
    /// The flow is over (saved or aborted) and should be released.
    pub finished: bool,
}

impl StepResult {
    fn open(outcome: TurnOutcome) -> Self {
        Self {
            outcome,
            finished: false,
        }
    }

    fn done(outcome: TurnOutcome) -> Self {
        Self {
            outcome,
            finished: true,
        }
    }
}

/// Values from one extraction applied to a slot set.
#[derive(Debug, Default)]
struct Applied {
    changed: bool,
    /// At least one value passed validation, changed or not.
    resolved: bool,
    /// Rejected values in schema order: the slot and the reason.
    rejected: Vec<(String, String)>,
}

/// Advances domain flows. Shared by every session; holds no per-session state.
pub struct FlowDriver {
    extractor: Arc<dyn SlotExtractor>,
    gateway: Arc<dyn PersistenceGateway>,
    confirmation_mode: ConfirmationMode,
    confirmation_threshold: f32,
    persist_timeout: Duration,
}

impl FlowDriver {
    pub fn new(
        config: &SlotflowConfig,
        extractor: Arc<dyn SlotExtractor>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            extractor,
            gateway,
            confirmation_mode: config.confirmation.mode,
            confirmation_threshold: config.confirmation.min_confidence,
            persist_timeout: Duration::from_millis(config.persistence.timeout_ms),
        }
    }

    /// Advance `flow` with one utterance.
    pub async fn step(
        &self,
        subgraph: &dyn DomainSubgraph,
        flow: &mut DomainFlow,
        user_id: &UserId,
        utterance: &str,
    ) -> Result<StepResult, EngineError> {
        if is_cancel(utterance) {
            return self.abort(flow);
        }

        match flow.stage {
            FlowStage::Collecting => self.collect(subgraph, flow, user_id, utterance).await,
            FlowStage::Confirming => self.confirm(subgraph, flow, user_id, utterance).await,
            // Any utterance while a save is outstanding retries that save.
            FlowStage::Committing => self.commit(subgraph, flow, user_id).await,
            FlowStage::Aborted => Err(FlowError::InvalidTransition(
                FlowStage::Aborted,
                FlowStage::Collecting,
            )
            .into()),
        }
    }

    /// Discard the record in progress.
    ///
    /// A save that already reached the gateway may have landed even though
    /// it timed out, so the reply does not claim the record is gone.
    pub fn abort(&self, flow: &mut DomainFlow) -> Result<StepResult, EngineError> {
        let in_flight = flow.stage == FlowStage::Committing && flow.pending.is_some();
        flow.transition(FlowStage::Aborted)?;
        flow.pending = None;

        let text = if in_flight {
            warn!(domain = %flow.domain, "Flow aborted with a save outstanding");
            format!(
                "Okay, I've stopped trying to save that {}. An earlier attempt may already have gone through; check your history.",
                flow.domain
            )
        } else {
            info!(domain = %flow.domain, "Flow aborted");
            format!("Okay, I've discarded that {}.", flow.domain)
        };
        Ok(StepResult::done(TurnOutcome::Aborted {
            domain: Some(flow.domain.clone()),
            text,
        }))
    }

    async fn collect(
        &self,
        subgraph: &dyn DomainSubgraph,
        flow: &mut DomainFlow,
        user_id: &UserId,
        utterance: &str,
    ) -> Result<StepResult, EngineError> {
        let schema = subgraph.schema();
        let targets = flow.slots.extraction_targets(schema);
        let extraction = self
            .extract(schema, &flow.slots, targets, flow.awaiting.clone(), utterance)
            .await?;
        let filled_before = flow.slots.known_values();
        let applied = apply_values(schema, &mut flow.slots, &extraction, utterance)?;

        // A rejected candidate for a slot that already holds a value only
        // matters when the user was asked for that slot or is restating it.
        let correcting = has_correction_cue(utterance) || flow.revising;
        let rejected = applied.rejected.into_iter().find(|(slot, _)| {
            correcting
                || flow.awaiting.as_deref() == Some(slot.as_str())
                || !filled_before.contains_key(slot)
        });

        if let Some((slot, reason)) = rejected {
            let prompt = schema.slot(&slot).map(|s| s.prompt.as_str()).unwrap_or_default();
            let text = format!("That doesn't look right: {}. {}", reason, prompt);
            flow.awaiting = Some(slot.clone());
            return Ok(StepResult::open(TurnOutcome::Prompt {
                domain: flow.domain.clone(),
                slot: Some(slot),
                text: text.trim_end().to_string(),
            }));
        }

        if let Some(spec) = flow.slots.first_unfilled_required(schema) {
            return Ok(StepResult::open(ask_for(flow, spec, applied.changed)));
        }

        // A bare "yes" while revising means the summary stands.
        if flow.revising && !applied.resolved && classify_reply(utterance) != ReplyKind::Affirm {
            return Ok(StepResult::open(TurnOutcome::Prompt {
                domain: flow.domain.clone(),
                slot: None,
                text: "What should I change?".to_string(),
            }));
        }

        flow.revising = false;
        flow.awaiting = None;

        if self.skips_confirmation(&flow.slots) {
            debug!(domain = %flow.domain, "Values confident enough to save without confirming");
            flow.slots.confirm_tentative();
            return self.finish_and_commit(subgraph, flow, user_id).await;
        }

        flow.transition(FlowStage::Confirming)?;
        Ok(StepResult::open(confirmation(subgraph, flow)))
    }

    async fn confirm(
        &self,
        subgraph: &dyn DomainSubgraph,
        flow: &mut DomainFlow,
        user_id: &UserId,
        utterance: &str,
    ) -> Result<StepResult, EngineError> {
        let schema = subgraph.schema();

        match classify_reply(utterance) {
            ReplyKind::Affirm => {
                let confirmed = flow.slots.confirm_tentative();
                debug!(domain = %flow.domain, confirmed, "Summary affirmed");
                self.finish_and_commit(subgraph, flow, user_id).await
            }
            ReplyKind::Deny => {
                let implicated = implicated_slots(utterance, schema, &flow.slots);
                flow.transition(FlowStage::Collecting)?;

                let Some(first) = implicated.first().and_then(|name| schema.slot(name)) else {
                    flow.slots.reset_all_to_tentative();
                    flow.revising = true;
                    flow.awaiting = None;
                    return Ok(StepResult::open(TurnOutcome::Prompt {
                        domain: flow.domain.clone(),
                        slot: None,
                        text: "No problem. What should I change?".to_string(),
                    }));
                };

                for name in &implicated {
                    flow.slots.reset(name)?;
                }
                info!(domain = %flow.domain, slots = ?implicated, "Slots reset after denial");
                flow.awaiting = Some(first.name.clone());
                Ok(StepResult::open(TurnOutcome::Prompt {
                    domain: flow.domain.clone(),
                    slot: Some(first.name.clone()),
                    text: first.prompt.clone(),
                }))
            }
            ReplyKind::Cancel => self.abort(flow),
            ReplyKind::Unclear => {
                // Neither yes nor no: treat it as a direct edit of the summary.
                let extraction = self
                    .extract(schema, &flow.slots, schema.slot_names(), None, utterance)
                    .await?;
                let applied = apply_values(schema, &mut flow.slots, &extraction, utterance)?;
                let confirm = confirmation(subgraph, flow);

                let lead = match (applied.rejected.first(), applied.changed) {
                    (Some((_, reason)), _) => format!("That doesn't look right: {}. ", reason),
                    (None, true) => return Ok(StepResult::open(confirm)),
                    (None, false) => "Please answer yes or no. ".to_string(),
                };
                Ok(StepResult::open(match confirm {
                    TurnOutcome::Confirm {
                        domain,
                        summary,
                        text,
                    } => TurnOutcome::Confirm {
                        domain,
                        summary,
                        text: format!("{}{}", lead, text),
                    },
                    other => other,
                }))
            }
        }
    }

    async fn finish_and_commit(
        &self,
        subgraph: &dyn DomainSubgraph,
        flow: &mut DomainFlow,
        user_id: &UserId,
    ) -> Result<StepResult, EngineError> {
        let mut record = flow.slots.finish(subgraph.schema())?;
        record.summary = subgraph.summarize(&record.values());
        flow.transition(FlowStage::Committing)?;
        flow.pending = Some(record);
        self.commit(subgraph, flow, user_id).await
    }

    /// Hand the pending record to the gateway.
    ///
    /// A transient failure or timeout keeps the flow committing with the
    /// same record, so the retry reuses its commit key.
    pub async fn commit(
        &self,
        subgraph: &dyn DomainSubgraph,
        flow: &mut DomainFlow,
        user_id: &UserId,
    ) -> Result<StepResult, EngineError> {
        let record = flow.pending.clone().ok_or(EngineError::NothingToCommit)?;
        let domain = flow.domain.clone();

        let result = match tokio::time::timeout(
            self.persist_timeout,
            self.gateway.save(user_id, &record),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transient(format!(
                "timed out after {} ms",
                self.persist_timeout.as_millis()
            ))),
        };

        match result {
            Ok(saved) => {
                info!(
                    domain = %domain,
                    record_id = %saved.id,
                    duplicate = saved.duplicate,
                    "Record committed"
                );
                flow.pending = None;
                flow.transition(FlowStage::Collecting)?;
                Ok(StepResult::done(TurnOutcome::Committed {
                    domain,
                    text: subgraph.describe_saved(&record),
                    record,
                    record_id: saved.id,
                }))
            }
            Err(GatewayError::Transient(reason)) => {
                warn!(domain = %domain, commit_key = %record.commit_key, %reason, "Commit failed, will retry");
                Ok(StepResult::open(TurnOutcome::CommitFailed {
                    domain,
                    retryable: true,
                    record,
                    text: "I couldn't save that just now. I'll try saving again; say anything to retry."
                        .to_string(),
                }))
            }
            Err(GatewayError::Validation { slot, reason }) => {
                warn!(domain = %domain, ?slot, %reason, "Record rejected by gateway");
                flow.pending = None;
                flow.transition(FlowStage::Collecting)?;

                let schema = subgraph.schema();
                let text = match slot.as_deref().and_then(|name| schema.slot(name)) {
                    Some(spec) => {
                        flow.slots.reset(&spec.name)?;
                        flow.awaiting = Some(spec.name.clone());
                        format!("I couldn't save that: {}. {}", reason, spec.prompt)
                    }
                    None => {
                        flow.slots.reset_all_to_tentative();
                        flow.revising = true;
                        flow.awaiting = None;
                        format!("I couldn't save that: {}. What should I change?", reason)
                    }
                };
                Ok(StepResult::open(TurnOutcome::CommitFailed {
                    domain,
                    retryable: false,
                    record,
                    text,
                }))
            }
        }
    }

    async fn extract(
        &self,
        schema: &RecordSchema,
        slots: &SlotSet,
        targets: Vec<String>,
        focus: Option<String>,
        utterance: &str,
    ) -> Result<Extraction, EngineError> {
        let mut request = ExtractionRequest::new(utterance, schema);
        request.targets = targets;
        request.known = slots.known_values();
        request.focus = focus;

        match self.extractor.extract(&request).await {
            Ok(extraction) => Ok(extraction),
            Err(ExtractionError::Malformed(reason)) => {
                warn!(%reason, "Treating malformed extraction as unresolved");
                Ok(Extraction::Unresolved)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn skips_confirmation(&self, slots: &SlotSet) -> bool {
        self.confirmation_mode == ConfirmationMode::LowConfidence
            && slots
                .min_confidence()
                .is_some_and(|c| c >= self.confirmation_threshold)
    }
}

/// Validate and apply extracted values. Values for slots that were not
/// extraction targets are only taken when the user signals a correction.
fn apply_values(
    schema: &RecordSchema,
    slots: &mut SlotSet,
    extraction: &Extraction,
    utterance: &str,
) -> Result<Applied, EngineError> {
    let targets = slots.extraction_targets(schema);
    let correcting = has_correction_cue(utterance);
    let mut applied = Applied::default();

    for extracted in extraction.values() {
        let Some(spec) = schema.slot(&extracted.slot) else {
            debug!(slot = %extracted.slot, "Ignoring value for unknown slot");
            continue;
        };
        if !(correcting || targets.contains(&spec.name)) {
            continue;
        }
        if let Err(reason) = spec.validate(&extracted.value) {
            debug!(slot = %spec.name, %reason, "Rejected extracted value");
            applied.rejected.push((spec.name.clone(), reason));
            continue;
        }
        applied.resolved = true;
        match slots.apply(&spec.name, extracted.value.clone(), extracted.confidence)? {
            SlotUpdate::Filled => applied.changed = true,
            SlotUpdate::Corrected { previous } => {
                info!(slot = %spec.name, previous = %previous, value = %extracted.value, "Slot corrected");
                applied.changed = true;
            }
            SlotUpdate::Unchanged => {}
        }
    }
    Ok(applied)
}

fn ask_for(flow: &mut DomainFlow, spec: &SlotSpec, progressed: bool) -> TurnOutcome {
    flow.awaiting = Some(spec.name.clone());
    let text = if progressed {
        spec.prompt.clone()
    } else {
        format!("Sorry, I didn't catch that. {}", spec.prompt)
    };
    TurnOutcome::Prompt {
        domain: flow.domain.clone(),
        slot: Some(spec.name.clone()),
        text,
    }
}

fn confirmation(subgraph: &dyn DomainSubgraph, flow: &DomainFlow) -> TurnOutcome {
    let summary = subgraph.summarize(&flow.slots.known_values());
    TurnOutcome::Confirm {
        domain: flow.domain.clone(),
        text: format!("Let me confirm: {}. Is that right?", summary),
        summary,
    }
}
