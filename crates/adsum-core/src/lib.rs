//! Adsum verification decision engine.
//!
//! Fuses an identity claim (QR), a face-embedding match and a liveness
//! signal into one auditable attendance decision. This crate holds the data
//! contract shared with the evaluation engine, the cosine matcher, and the
//! per-attempt session state machine; all camera and inference I/O stays
//! behind the traits in [`extract`].

pub mod config;
pub mod extract;
pub mod matcher;
pub mod session;
pub mod types;

pub use config::VerifyConfig;
pub use matcher::{CosineMatcher, Matcher};
pub use session::{SessionEvent, SessionPhase, VerificationSession};
pub use types::{
    Decision, DecisionRecord, Embedding, EnrolledIdentity, MatchResult, EMBEDDING_DIM,
};
