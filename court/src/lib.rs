//! Court: a bounded, round-based trial engine.
//!
//! Two biased research providers gather evidence about a topic from opposing
//! sides; an arbiter either accepts with a verdict or asks for another round
//! with targeted follow-up queries. The engine guarantees sequencing,
//! termination, deduplication and state integrity around whatever those
//! collaborators return.
//!
//! # Components
//!
//! - [`evidence`]: deduplicating evidence store (content hash + source identity)
//! - [`round`]: one research round, concurrent or sequential dispatch
//! - [`arbitration`]: arbiter call, protocol checks and the round-ceiling override
//! - [`state`]: trial status machine and the canonical [`TrialState`]
//! - [`trial`]: the driver loop producing a [`TrialResult`]
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use court::{TrialConfig, TrialRunner};
//! use court::mock::{ScriptedArbiter, ScriptedResearcher};
//!
//! # async fn demo() -> Result<(), court::TrialError> {
//! let runner = TrialRunner::new(
//!     TrialConfig::default(),
//!     Arc::new(ScriptedResearcher::synthetic()),
//!     Arc::new(ScriptedResearcher::synthetic()),
//!     Arc::new(ScriptedArbiter::accept_on_round(2)),
//! )?;
//! let result = runner.run("Napoleon Bonaparte").await?;
//! println!("{}", result.summary_line());
//! # Ok(())
//! # }
//! ```

pub mod arbitration;
pub mod budget;
pub mod collaborator;
pub mod config;
pub mod decision;
pub mod error;
pub mod evidence;
pub mod mock;
pub mod round;
pub mod state;
pub mod trial;

pub use arbitration::{Arbitration, Arbitrator, Ruling};
pub use budget::{BoundedEvidence, BoundedItem, EvidenceBudget};
pub use collaborator::{
    ArbitrationRequest, Arbiter, ContentLookup, Finding, ResearchProvider, ResearchReport,
    ResearchRequest,
};
pub use config::{DispatchMode, TrialConfig};
pub use decision::{Confidence, Decision, Feedback, VerdictPayload};
pub use error::{CollaboratorError, ConfigError, ProtocolViolation, TransitionError, TrialError};
pub use evidence::{AdmitResult, EvidenceItem, EvidenceStore, RejectReason, Side, SourceDedupPolicy, SourceId};
pub use round::{RoundController, RoundOutcome, SideError};
pub use state::{Incident, RoundRecord, TransitionRecord, TrialState, TrialStatus};
pub use trial::{TrialResult, TrialRunner};
