//! Client side of the streaming recorder: capture-device abstraction, the
//! per-recording state machine, the form-scoped panel that enforces the
//! single-active-recorder rule, and the TCP stream link.

pub mod device;
pub mod link;
pub mod panel;
pub mod recorder;
