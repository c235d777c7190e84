//! # Minstrel Common Library (minstrel-common)
//!
//! Shared event types and the EventBus used across Minstrel modules.
//!
//! **Purpose:** Keep the event vocabulary (session phases, track lifecycle,
//! queue changes) in one crate so the voice player and any future front-end
//! modules agree on wire types.

pub mod events;

pub use events::{EventBus, MinstrelEvent, QueueChangeTrigger, SessionEndReason, SessionPhase};
