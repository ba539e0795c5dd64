//! The conversational pipeline for canon.
//!
//! Wires conversation resolution, follow-up query rewriting, passage
//! retrieval, prompt assembly, and the streaming orchestrator that turns the
//! upstream token stream into outbound chat events with durable persistence
//! of the exchange.

pub mod context;
pub mod orchestrator;
pub mod rewrite;

pub use orchestrator::{ChatEvent, ChatPipeline, TurnRequest};
pub use rewrite::{CueDetector, FollowUpPredicate, QueryRewriter};
