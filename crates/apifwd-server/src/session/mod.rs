//! Session management: pairing, session lifecycle and routing.

pub mod registry;

pub use registry::{AuthOutcome, RouteOutcome, SessionRegistry};
