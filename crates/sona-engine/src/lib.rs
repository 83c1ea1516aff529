//! Audio/session orchestration engine
//!
//! A cooperating set of state machines, bounded queues and scheduling
//! policies: the session loop serializes every state transition, the inbound
//! pipeline decodes under backpressure, the outbound pipeline encodes capture
//! frames, and a bounded worker pool executes the codec jobs. Collaborators
//! (audio hardware, transport, wake word, frontend, notifier, actuators, OTA)
//! are injected by contract from `sona-core`.

pub mod control;
pub mod events;
pub mod inbound;
pub mod outbound;
pub mod playback;
pub mod session;
pub mod version;
pub mod worker;

pub use control::{ControlMessage, RemoteCommand};
pub use session::{Collaborators, Session, SessionConfig};
pub use worker::{WorkerPool, MAX_ACTIVE_JOBS};
