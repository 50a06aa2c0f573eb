//! Session state: identity, running totals and the processing flag.

use crate::cost::{estimate_cost, Money};
use crate::model::Pricing;
use crate::usage::{TokenCount, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier the CLI assigns to a conversation.
///
/// Arrives in the `system/init` record of the first turn and is passed
/// back with `--resume` on every later turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    ///
    /// Note: This does not validate the format. The CLI provides the id,
    /// so we trust it.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Turn Accounting
// ============================================================================

/// Figures accumulated locally while a turn is running.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TurnAccumulator {
    usage: TokenUsage,
    cost: Money,
}

/// Per-turn figures reported when the terminal record arrives.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnSummary {
    /// Cost of the turn (authoritative when the CLI supplied one)
    pub cost: Money,
    /// Wall-clock duration reported by the CLI
    pub duration_ms: u64,
    /// Number of agent turns the CLI took
    pub num_turns: u32,
}

/// Authoritative figures carried by a terminal `result` record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FinalFigures {
    pub usage: Option<TokenUsage>,
    pub cost: Option<Money>,
    pub duration_ms: u64,
    pub num_turns: u32,
}

// ============================================================================
// Session State
// ============================================================================

/// State of one continuable conversation.
///
/// Owned exclusively by the session controller. Counters only move through
/// the methods below so the reconciliation rules live in one place.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    id: Option<SessionId>,
    total_input: TokenCount,
    total_output: TokenCount,
    total_cost: Money,
    request_count: u64,
    is_processing: bool,
    draft: Option<String>,
    turn: TurnAccumulator,
}

impl SessionState {
    /// Creates an empty session with no id yet.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn total_input(&self) -> TokenCount {
        self.total_input
    }

    pub fn total_output(&self) -> TokenCount {
        self.total_output
    }

    pub fn total_cost(&self) -> Money {
        self.total_cost
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    /// Locally estimated cost of the running turn.
    pub fn turn_cost(&self) -> Money {
        self.turn.cost
    }

    /// Captures or refreshes the session id. Empty ids are ignored.
    pub fn set_id(&mut self, id: SessionId) {
        if id.as_str().is_empty() {
            return;
        }
        if self.id.as_ref() != Some(&id) {
            debug!(session_id = %id, "Session id captured");
        }
        self.id = Some(id);
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.is_processing = processing;
    }

    pub fn save_draft(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.draft = if text.is_empty() { None } else { Some(text) };
    }

    /// Marks a turn as dispatched: processing on, draft cleared, turn
    /// accumulators zeroed.
    pub fn begin_turn(&mut self) {
        self.is_processing = true;
        self.draft = None;
        self.turn = TurnAccumulator::default();
    }

    /// Adds one assistant message's usage to the running totals.
    ///
    /// Returns the estimated cost of this message.
    pub fn record_usage(&mut self, usage: &TokenUsage, pricing: &Pricing) -> Money {
        let cost = estimate_cost(usage, pricing);

        self.total_input += usage.input;
        self.total_output += usage.output;
        self.total_cost += cost;
        self.turn.usage += *usage;
        self.turn.cost += cost;

        cost
    }

    /// Closes the running turn against the terminal record's figures.
    ///
    /// The record's usage and cost are authoritative: when they disagree
    /// with what was accumulated locally the local contribution of this
    /// turn is swapped out for the record's. A cost only counts when it is
    /// strictly positive.
    pub fn finish_turn(&mut self, figures: &FinalFigures) -> TurnSummary {
        if let Some(authoritative) = figures.usage {
            let local = self.turn.usage;
            if authoritative.input != local.input || authoritative.output != local.output {
                debug!(
                    local_input = local.input.as_u64(),
                    local_output = local.output.as_u64(),
                    final_input = authoritative.input.as_u64(),
                    final_output = authoritative.output.as_u64(),
                    "Reconciling turn usage with final record"
                );
                self.total_input = self
                    .total_input
                    .saturating_sub(local.input)
                    .saturating_add(authoritative.input);
                self.total_output = self
                    .total_output
                    .saturating_sub(local.output)
                    .saturating_add(authoritative.output);
                self.turn.usage = authoritative;
            }
        }

        let turn_cost = match figures.cost {
            Some(cost) if cost.is_positive() => {
                self.total_cost = self.total_cost.saturating_sub(self.turn.cost) + cost;
                self.turn.cost = cost;
                cost
            }
            _ => self.turn.cost,
        };

        self.request_count += 1;
        self.is_processing = false;

        TurnSummary {
            cost: turn_cost,
            duration_ms: figures.duration_ms,
            num_turns: figures.num_turns,
        }
    }

    /// Forgets the conversation: id, counters, draft and turn state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Application Layer DTO
// ============================================================================

/// Read-only snapshot of a session for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Option<SessionId>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: Money,
    pub cost_display: String,
    pub request_count: u64,
    pub is_processing: bool,
    pub draft: Option<String>,
}

impl SessionView {
    /// Creates a SessionView from session state.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            session_id: state.id.clone(),
            total_input_tokens: state.total_input.as_u64(),
            total_output_tokens: state.total_output.as_u64(),
            total_cost: state.total_cost,
            cost_display: state.total_cost.format(),
            request_count: state.request_count,
            is_processing: state.is_processing,
            draft: state.draft.clone(),
        }
    }
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self::from_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figures(usage: Option<TokenUsage>, cost: Option<f64>) -> FinalFigures {
        FinalFigures {
            usage,
            cost: cost.map(Money::from_usd),
            duration_ms: 1_200,
            num_turns: 2,
        }
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(id.short(), "8e11bfb5");
        assert_eq!(SessionId::new("abc").short(), "abc");
    }

    #[test]
    fn test_begin_turn_clears_draft() {
        let mut state = SessionState::new();
        state.save_draft("half a thought");
        state.begin_turn();

        assert!(state.is_processing());
        assert_eq!(state.draft(), None);
    }

    #[test]
    fn test_record_usage_accumulates() {
        let mut state = SessionState::new();
        state.begin_turn();
        state.record_usage(&TokenUsage::new(60, 20, 0, 0), &Pricing::SONNET);
        state.record_usage(&TokenUsage::new(40, 30, 0, 0), &Pricing::SONNET);

        assert_eq!(state.total_input().as_u64(), 100);
        assert_eq!(state.total_output().as_u64(), 50);
        assert!(state.total_cost().is_positive());
    }

    #[test]
    fn test_final_usage_overrides_local_totals() {
        let mut state = SessionState::new();
        state.begin_turn();
        state.record_usage(&TokenUsage::new(100, 50, 0, 0), &Pricing::SONNET);

        state.finish_turn(&figures(Some(TokenUsage::new(120, 50, 0, 0)), None));

        assert_eq!(state.total_input().as_u64(), 120);
        assert_eq!(state.total_output().as_u64(), 50);
        assert!(!state.is_processing());
        assert_eq!(state.request_count(), 1);
    }

    #[test]
    fn test_final_usage_override_keeps_earlier_turns() {
        let mut state = SessionState::new();
        state.begin_turn();
        state.record_usage(&TokenUsage::new(10, 5, 0, 0), &Pricing::SONNET);
        state.finish_turn(&figures(None, None));

        state.begin_turn();
        state.record_usage(&TokenUsage::new(100, 50, 0, 0), &Pricing::SONNET);
        state.finish_turn(&figures(Some(TokenUsage::new(120, 40, 0, 0)), None));

        assert_eq!(state.total_input().as_u64(), 130);
        assert_eq!(state.total_output().as_u64(), 45);
        assert_eq!(state.request_count(), 2);
    }

    #[test]
    fn test_final_cost_overrides_local_estimate() {
        let mut state = SessionState::new();
        state.begin_turn();
        state.record_usage(&TokenUsage::new(100, 50, 0, 0), &Pricing::SONNET);
        assert_ne!(state.turn_cost(), Money::from_usd(0.0042));

        let summary = state.finish_turn(&figures(None, Some(0.0042)));

        assert_eq!(summary.cost, Money::from_usd(0.0042));
        assert_eq!(state.total_cost(), Money::from_usd(0.0042));
    }

    #[test]
    fn test_zero_final_cost_keeps_local_estimate() {
        let mut state = SessionState::new();
        state.begin_turn();
        let local = state.record_usage(&TokenUsage::new(1_000, 1_000, 0, 0), &Pricing::SONNET);

        let summary = state.finish_turn(&figures(None, Some(0.0)));

        assert_eq!(summary.cost, local);
        assert_eq!(state.total_cost(), local);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut state = SessionState::new();
        state.set_id(SessionId::new("abc"));
        state.begin_turn();
        state.record_usage(&TokenUsage::new(1, 1, 0, 0), &Pricing::SONNET);
        state.reset();

        assert!(state.id().is_none());
        assert_eq!(state.total_input().as_u64(), 0);
        assert!(!state.is_processing());
    }

    #[test]
    fn test_empty_session_id_ignored() {
        let mut state = SessionState::new();
        state.set_id(SessionId::new(""));
        assert!(state.id().is_none());
    }

    #[test]
    fn test_session_view_from_state() {
        let mut state = SessionState::new();
        state.set_id(SessionId::new("sess-1"));
        state.save_draft("draft");
        let view = SessionView::from_state(&state);

        assert_eq!(view.session_id, Some(SessionId::new("sess-1")));
        assert_eq!(view.draft.as_deref(), Some("draft"));
        assert_eq!(view.cost_display, "$0.00");
    }
}
