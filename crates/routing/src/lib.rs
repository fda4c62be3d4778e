//! Tripartite routing for the voice pipeline
//!
//! Features:
//! - Template engine: constant-time canned replies for a closed catalogue
//! - Unknown/refusal classifier: short-circuit cascade over a closed reason set
//! - Complexity scorer + confidence-to-tier decision table
//! - Reasoning-mode classifier
//! - Eager input processor working on partial transcripts

pub mod complexity;
pub mod eager;
pub mod normalize;
pub mod reasoning;
pub mod refusal;
pub mod router;
pub mod template;

pub use complexity::{ComplexityScorer, ComplexityScores};
pub use eager::{EagerContext, EagerInputProcessor, EagerStage, EagerState, EagerStats, IntentPrediction};
pub use normalize::normalize;
pub use reasoning::ReasoningClassifier;
pub use refusal::RefusalClassifier;
pub use router::{RouteFeedback, RoutePreview, RouterStats, TripartiteRouter};
pub use template::{TemplateEngine, TemplateMatch};

use thiserror::Error;

/// Routing errors
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Invalid pattern: {0}")]
    Pattern(String),
}

impl From<regex::Error> for RoutingError {
    fn from(err: regex::Error) -> Self {
        RoutingError::Pattern(err.to_string())
    }
}

impl From<RoutingError> for voice_router_core::Error {
    fn from(err: RoutingError) -> Self {
        voice_router_core::Error::Classifier(err.to_string())
    }
}
