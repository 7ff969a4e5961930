//! Detection Result Routing
//!
//! Parses inbound inference messages, validates them into
//! [`DetectionResult`]s and routes them: accidents towards alerting, every
//! result towards passive observers, control frames nowhere.

mod detection;
mod error;
mod message;
mod router;
mod tally;

pub use detection::DetectionResult;
pub use error::{ObserverError, RouterError, ValidationError};
pub use message::{parse_detection_value, parse_message, ControlKind, Inbound};
pub use router::{FrameLedger, ResultObserver, ResultRouter, Routed, RouterStats};
pub use tally::{ResultTally, SharedTally, TallySnapshot};
