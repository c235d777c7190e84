//! Playback engine modules
//!
//! One `PlaybackSession` actor per guild ties the queue, the transcoding
//! pipeline and the frame sink together; the `SessionRegistry` owns the
//! guild → session map.

pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;
pub mod types;
pub mod volume;

pub use pipeline::{TrackOpener, TrackStream, TranscodingPipeline};
pub use queue::TrackQueue;
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionStatus};
pub use sink::{FrameSink, SinkFactory, SinkSignal};
pub use types::{GuildId, TrackRequest, TrackSource};
