//! # Visitrack Core Library
//!
//! Background location tracking for field workers who visit clients: it
//! samples the device position, keeps a periodic location log, notices when
//! the worker arrives at a known client and drives the meeting that follows.
//!
//! The engine talks to the outside world only through small traits, so the
//! same code runs against the SQLite [`Database`], the in-memory
//! collaborators in [`memory`], or a remote backend.
//!
//! ## Architecture
//!
//! - **Location**: [`LocationSampler`] turns a [`LocationProvider`] into a
//!   keep-newest fix stream
//! - **Tracking**: [`TrackingSupervisor`] runs sampling, periodic persistence
//!   and proximity evaluation as one task tree
//! - **Proximity**: [`ProximityEngine`] debounces client arrivals with a
//!   per-client cooldown
//! - **Meetings**: [`MeetingLifecycle`] enforces one active meeting per client
//! - **Storage**: SQLite location log, client registry and meetings, plus
//!   TOML configuration
//!
//! ## Key Components
//!
//! - [`TrackingSupervisor`]: start/stop/verify background tracking
//! - [`MeetingLifecycle`]: start and end client meetings
//! - [`Database`]: persistence for every collaborator trait
//! - [`Config`]: application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod meeting;
pub mod memory;
pub mod proximity;
pub mod registry;
pub mod storage;
pub mod tracking;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, DatabaseError, MeetingError, PersistError, SamplerError};
pub use events::{Event, EventBus};
pub use geo::{distance_meters, format_distance, Coordinate};
pub use location::{
    FixStream, LocationFix, LocationProvider, LocationRequest, LocationSampler, Priority,
    ReplayEnd, ReplayPoint, ReplayProvider,
};
pub use meeting::{AttachmentRef, EndMeeting, Meeting, MeetingLifecycle, MeetingStatus, MeetingStore};
pub use proximity::{ProximityEngine, ProximityEntry, ProximitySettings, TrackableEntity};
pub use registry::{Client, ClientRegistry};
pub use storage::{Config, Database};
pub use tracking::{
    FixRecord, FixSink, NullStatusSink, PeriodicPersister, PersistSchedule, StatusSink,
    TrackingOptions, TrackingStatus, TrackingSupervisor,
};
