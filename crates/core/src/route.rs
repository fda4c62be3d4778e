//! Route decision types
//!
//! The tripartite router produces one `RouteDecision` per finalized
//! utterance; the orchestrator consumes it. Decisions are immutable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size/latency class of a generation backend
///
/// Ordering matters for the fallback chain: a substitute must never rank
/// above the primary (`Deep > Balanced > Fast`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Balanced,
    Deep,
}

impl ModelTier {
    /// Logical model name this tier resolves to in the pool
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelTier::Fast => "tier-fast",
            ModelTier::Balanced => "tier-balanced",
            ModelTier::Deep => "tier-deep",
        }
    }

    /// Generation deadline for this tier
    pub fn generation_timeout(&self) -> std::time::Duration {
        match self {
            ModelTier::Fast => std::time::Duration::from_secs(3),
            ModelTier::Balanced => std::time::Duration::from_secs(8),
            ModelTier::Deep => std::time::Duration::from_secs(30),
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Fast => f.write_str("fast"),
            ModelTier::Balanced => f.write_str("balanced"),
            ModelTier::Deep => f.write_str("deep"),
        }
    }
}

/// Whether step-by-step reasoning is requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    #[default]
    Off,
    On,
}

/// Closed set of refusal reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Asks about events that have not happened yet
    FutureEvent,
    /// Asks for passwords, keys, or other private data
    PrivateInfo,
    /// Claims about a conversational memory the system does not keep
    HallucinationRisk,
    /// Forbidden or harmful action
    Unsafe,
    /// Unintelligible input
    Nonsense,
}

/// External collaborators a route may delegate to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKind {
    WebSearch,
    ToolCall,
}

/// Outcome of the tripartite router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteDecision {
    /// Canned reply from the template engine
    Template {
        category: String,
        reply: String,
    },
    /// Dispatch to a generation backend of the given tier
    Model {
        tier: ModelTier,
        reasoning: ReasoningMode,
        /// Set when the soft-skill score dominates (warmer phrasing)
        empathic: bool,
    },
    /// Closed-set decline that bypasses generation
    Refuse(RefusalReason),
    /// Delegate to an external collaborator
    External(ExternalKind),
}

impl RouteDecision {
    pub fn model(tier: ModelTier, reasoning: ReasoningMode) -> Self {
        RouteDecision::Model {
            tier,
            reasoning,
            empathic: false,
        }
    }

    /// Short label for logs and latency breakdowns
    pub fn label(&self) -> &'static str {
        match self {
            RouteDecision::Template { .. } => "template",
            RouteDecision::Model { .. } => "model",
            RouteDecision::Refuse(_) => "refuse",
            RouteDecision::External(_) => "external",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_for_fallback() {
        assert!(ModelTier::Deep > ModelTier::Balanced);
        assert!(ModelTier::Balanced > ModelTier::Fast);
    }

    #[test]
    fn test_tier_timeouts() {
        assert_eq!(ModelTier::Fast.generation_timeout().as_secs(), 3);
        assert_eq!(ModelTier::Deep.generation_timeout().as_secs(), 30);
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(
            RouteDecision::Refuse(RefusalReason::FutureEvent).label(),
            "refuse"
        );
        assert_eq!(
            RouteDecision::model(ModelTier::Fast, ReasoningMode::Off).label(),
            "model"
        );
    }
}
