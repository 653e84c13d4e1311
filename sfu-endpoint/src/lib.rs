//! SFU client endpoint
//!
//! Client side of an SFU (Selective Forwarding Unit) room. The endpoint
//! negotiates a single peer connection with the server and serializes every
//! change to the tracks it publishes against the offer/answer protocol, while
//! following the tracks other participants publish.
//!
//! ## Architecture
//!
//! - **`WebRTCEndpoint`**: Dispatches server media events and drives offer/answer
//! - **`CommandsQueue`**: Runs track mutations one at a time, gated on negotiation
//! - **`LocalTrackManager`**: Validates and executes add/remove/replace
//! - **`LocalTrackStore`** / **`RemoteTrackStore`**: Local and remote track state
//! - **`ConnectionAdapter`**: Narrow wrapper over the host's native peer connection
//! - **`MediaEventCodec`**: Pluggable wire encoding, JSON by default
//!
//! ## Features
//!
//! - One renegotiation round per coalesced batch of changes
//! - Mute/unmute by sender track replacement, without renegotiation
//! - Simulcast publishing with per-variant bandwidth and variant control
//! - Deferred metadata updates while an offer is in flight
//! - Reliable and lossy data channels
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_endpoint::{EndpointConfig, JsonCodec, WebRTCEndpoint};
//!
//! let (mut endpoint, mut pc_events) =
//!     WebRTCEndpoint::new(EndpointConfig::default(), factory, Arc::new(JsonCodec));
//! let mut events = endpoint.subscribe();
//!
//! endpoint.connect(json!({"displayName": "alice"}));
//! // ...after `connected`:
//! let (track_id, added) = endpoint
//!     .add_track(camera, json!({"source": "camera"}), None, TrackBandwidthLimit::default())
//!     .await?;
//! ```

pub mod codec;
pub mod config;
mod connection;
mod data_channel;
mod endpoint;
mod error;
mod events;
mod local;
pub mod logging;
mod manager;
mod queue;
mod remote;
mod simulcast;
pub mod transport;
mod types;

pub use codec::{ClientIntent, CodecError, JsonCodec, MediaEventCodec, ServerEvent};
pub use config::EndpointConfig;
pub use connection::{ice_servers, ConnectionAdapter};
pub use data_channel::{DataCallback, DataChannelStatus, DataChannelType};
pub use endpoint::WebRTCEndpoint;
pub use error::{Error, Result};
pub use events::{EndpointEvent, EndpointEvents};
pub use local::{LocalEndpoint, LocalTrack};
pub use manager::NegotiationState;
pub use queue::{Completion, ResolvePolicy};
pub use remote::{identity_parser, MetadataParser, RemoteEndpoint, RemoteTrack};
pub use simulcast::split_bandwidth;
pub use types::{
    EncodingReason, EndpointId, NegotiationStatus, SimulcastConfig, TrackBandwidthLimit,
    TrackBitrates, TrackId, TrackKind, TrackVariant, VadStatus,
};
