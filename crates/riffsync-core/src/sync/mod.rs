//! Synchronization bus: fans playback state out to widgets
//!
//! Widgets only ever hold a `SyncBus` clone and their `SubscriptionHandle`s;
//! they never see the engine, the resource manager or each other.
//!
//! ```ignore
//! let handle = bus.subscribe_with(
//!     EventType::TimelineUpdate,
//!     Arc::new(|event: &SyncEvent| redraw_playhead(event)),
//!     SubscribeOptions::throttled(),
//! );
//! ```

mod bus;
mod event;
mod metrics;
mod throttle;

pub use bus::{BusConfig, Handler, SubscribeOptions, SubscriptionHandle, SyncBus};
pub use event::{
    EventPayload, EventPriority, EventType, ExerciseInfo, SourceChangeKind, SyncEvent,
};
pub use metrics::PerformanceSample;
