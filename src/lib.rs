//! Docfuse - hybrid retrieval and rank fusion for document question answering
//!
//! Takes a query plus an organization/dataset scope, runs semantic and keyword
//! retrieval side by side, merges the rankings with weighted Reciprocal Rank
//! Fusion, re-ranks by intent and conversation hints, and classifies the
//! evidence as confident, partial or out of scope for answer generation.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod query;
pub mod retrieval;
pub mod retriever;
pub mod telemetry;
pub mod types;

pub use error::{DocfuseError, Result};
pub use retrieval::RetrievalEngine;
pub use types::{RetrievalRequest, RetrievalResult};
