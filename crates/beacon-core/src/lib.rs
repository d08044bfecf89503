//! # beacon-core
//!
//! Identity assignment, rooms and message routing for the Beacon
//! signaling relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Identity** - Deterministic numeric identities derived from a seed
//! - **Rooms** - Concurrent room membership with per-room fan-out
//! - **Router** - Dispatch of `init`, `join`, `global`, `room` and `private`
//! - **Lifecycle** - Per-connection read, write and keepalive tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Lifecycle  │────▶│   Router    │────▶│ RoomManager │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Writer    │◀────│   Handle    │◀────│ Broadcaster │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod broadcaster;
pub mod handle;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod room;
pub mod rooms;
pub mod router;

pub use broadcaster::{fan_out, FanOut};
pub use handle::{ConnectionHandle, DeliveryError, Outbound};
pub use identity::{Identity, IdentityError, IdentityGenerator};
pub use lifecycle::{
    CloseReason, ConnectionLifecycle, ConnectionState, LifecycleConfig, SessionSummary,
};
pub use room::{Member, RoomId};
pub use rooms::{Joined, RoomConfig, RoomError, RoomInfo, RoomManager, RoomStats};
pub use router::{MessageRouter, RouteError, Routed, RouterConfig, Session, DEFAULT_ROOM};
