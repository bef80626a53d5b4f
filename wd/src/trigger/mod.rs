//! Trigger loop - the cheap, high-frequency probe tier
//!
//! Fuses journal pattern matching, metric thresholding, service-state
//! sampling, and optional classifier inference into a stream of typed,
//! debounced events feeding the context window and the issue tracker.

mod classifier;
mod debounce;
mod engine;
mod event;
mod journal;
mod probe;
mod rules;

pub use classifier::{LineClassifier, LineVerdict};
pub use debounce::Debouncer;
pub use engine::{TickReport, TriggerLoop};
pub use event::{TriggerEvent, TriggerKind, fingerprint};
pub use journal::JournalReader;
pub use probe::{ProbeSample, ServiceState, SystemProbe, probe_service};
pub use rules::{LogRule, MatchedLine, RuleSet};
