//! Media event codec
//!
//! Stateless mapping between wire messages and the semantic intents/events the
//! rest of the crate works with. The endpoint only ever sees [`ClientIntent`]
//! and [`ServerEvent`]; the encoding itself is pluggable through
//! [`MediaEventCodec`]. [`JsonCodec`] is the default.

mod json;

pub use json::JsonCodec;

use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::transport::{IceCandidate, SessionDescription};
use crate::types::{
    EncodingReason, EndpointId, SimulcastConfig, TrackBitrates, TrackId, TrackVariant, VadStatus,
};

/// DecodeError/EncodeError of a single media event. Fatal for that event
/// only, never for the session.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed media event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported media event: {0}")]
    Unsupported(String),
}

/// Intent sent from this client to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientIntent {
    Connect {
        metadata: Value,
    },
    Disconnect,
    UpdateEndpointMetadata {
        metadata: Value,
    },
    UpdateTrackMetadata {
        track_id: TrackId,
        metadata: Value,
    },
    RenegotiateTracks,
    SdpOffer {
        offer: SessionDescription,
        track_id_to_metadata: BTreeMap<TrackId, Value>,
        track_id_to_bitrates: BTreeMap<TrackId, TrackBitrates>,
        mid_to_track_id: BTreeMap<String, TrackId>,
    },
    Candidate(IceCandidate),
    EnableTrackVariant {
        track_id: TrackId,
        variant: TrackVariant,
    },
    DisableTrackVariant {
        track_id: TrackId,
        variant: TrackVariant,
    },
    TrackBitrates {
        track_id: TrackId,
        bitrates: TrackBitrates,
    },
    SetTargetTrackVariant {
        track_id: TrackId,
        variant: TrackVariant,
    },
}

impl ClientIntent {
    /// Short name for logging
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::UpdateEndpointMetadata { .. } => "updateEndpointMetadata",
            Self::UpdateTrackMetadata { .. } => "updateTrackMetadata",
            Self::RenegotiateTracks => "renegotiateTracks",
            Self::SdpOffer { .. } => "sdpOffer",
            Self::Candidate(_) => "candidate",
            Self::EnableTrackVariant { .. } => "enableTrackVariant",
            Self::DisableTrackVariant { .. } => "disableTrackVariant",
            Self::TrackBitrates { .. } => "trackBitrates",
            Self::SetTargetTrackVariant { .. } => "setTargetTrackVariant",
        }
    }
}

/// A track as announced by the server
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnnouncement {
    pub metadata: Value,
    pub simulcast_config: Option<SimulcastConfig>,
}

/// An endpoint as announced by the server
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointAnnouncement {
    pub id: EndpointId,
    pub endpoint_type: String,
    pub metadata: Value,
    pub tracks: HashMap<TrackId, TrackAnnouncement>,
}

/// Number of remote tracks of each kind the server is about to send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackTypeCounts {
    pub audio: usize,
    pub video: usize,
}

/// TURN server integrated into the SFU, proposed in `offerData`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnServer {
    pub server_addr: String,
    pub server_port: u16,
    pub transport: String,
    pub username: String,
    pub password: String,
}

impl TurnServer {
    /// ICE URL of this server, e.g. `turns:turn.example.com:5349?transport=tcp`
    #[must_use]
    pub fn url(&self) -> String {
        let transport = self.transport.to_lowercase();
        if transport == "tls" {
            format!("turns:{}:{}?transport=tcp", self.server_addr, self.server_port)
        } else {
            format!(
                "turn:{}:{}?transport={}",
                self.server_addr, self.server_port, transport
            )
        }
    }
}

/// Event received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected {
        endpoint_id: EndpointId,
        other_endpoints: Vec<EndpointAnnouncement>,
    },
    OfferData {
        tracks_types: TrackTypeCounts,
        turn_servers: Vec<TurnServer>,
    },
    TracksAdded {
        endpoint_id: EndpointId,
        tracks: HashMap<TrackId, TrackAnnouncement>,
    },
    TracksRemoved {
        endpoint_id: EndpointId,
        track_ids: Vec<TrackId>,
    },
    SdpAnswer {
        answer: SessionDescription,
        mid_to_track_id: HashMap<String, TrackId>,
    },
    Candidate(IceCandidate),
    EndpointAdded(EndpointAnnouncement),
    EndpointRemoved {
        endpoint_id: EndpointId,
    },
    EndpointUpdated {
        endpoint_id: EndpointId,
        metadata: Value,
    },
    TrackUpdated {
        endpoint_id: EndpointId,
        track_id: TrackId,
        metadata: Value,
    },
    TrackVariantSwitched {
        endpoint_id: EndpointId,
        track_id: TrackId,
        variant: TrackVariant,
        reason: EncodingReason,
    },
    TrackVariantEnabled {
        endpoint_id: EndpointId,
        track_id: TrackId,
        variant: TrackVariant,
    },
    TrackVariantDisabled {
        endpoint_id: EndpointId,
        track_id: TrackId,
        variant: TrackVariant,
    },
    VadNotification {
        track_id: TrackId,
        status: VadStatus,
    },
    BandwidthEstimation {
        estimation: f64,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Short name for logging
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::OfferData { .. } => "offerData",
            Self::TracksAdded { .. } => "tracksAdded",
            Self::TracksRemoved { .. } => "tracksRemoved",
            Self::SdpAnswer { .. } => "sdpAnswer",
            Self::Candidate(_) => "candidate",
            Self::EndpointAdded(_) => "endpointAdded",
            Self::EndpointRemoved { .. } => "endpointRemoved",
            Self::EndpointUpdated { .. } => "endpointUpdated",
            Self::TrackUpdated { .. } => "trackUpdated",
            Self::TrackVariantSwitched { .. } => "trackVariantSwitched",
            Self::TrackVariantEnabled { .. } => "trackVariantEnabled",
            Self::TrackVariantDisabled { .. } => "trackVariantDisabled",
            Self::VadNotification { .. } => "vadNotification",
            Self::BandwidthEstimation { .. } => "bandwidthEstimation",
            Self::Error { .. } => "error",
        }
    }
}

/// Bidirectional mapping between wire messages and semantic intents/events
pub trait MediaEventCodec: Send + Sync {
    fn encode(&self, intent: &ClientIntent) -> Result<Bytes, CodecError>;

    fn decode(&self, raw: &[u8]) -> Result<ServerEvent, CodecError>;
}
