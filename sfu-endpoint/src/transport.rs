//! Native transport capability
//!
//! The endpoint never talks to ICE/DTLS/SRTP directly. It drives a host
//! provided [`PeerConnection`] through the narrow set of operations below and
//! receives the host's callbacks as [`PeerConnectionEvent`]s over an unbounded
//! channel.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use crate::config::{BundlePolicy, IceTransportPolicy};
use crate::types::TrackKind;

/// Handle to a native media track (camera, microphone, inbound RTP track...)
pub trait MediaStreamTrack: Send + Sync + fmt::Debug {
    /// Native id, unique per track object
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;
}

pub type NativeTrack = Arc<dyn MediaStreamTrack>;

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// ICE candidate for the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub sdp_mid: Option<String>,
    pub username_fragment: Option<String>,
}

/// ICE server handed to the native connection at creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfferOptions {
    pub ice_restart: bool,
}

/// Opaque handle of a transceiver, issued by the native connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransceiverId(pub usize);

/// One send encoding of a sender
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingParameters {
    pub rid: Option<String>,
    pub active: bool,
    /// bps, `None` meaning unlimited
    pub max_bitrate: Option<u64>,
    pub scale_resolution_down_by: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TransceiverInit {
    pub kind: TrackKind,
    pub direction: RTCRtpTransceiverDirection,
    pub track: Option<NativeTrack>,
    pub stream_ids: Vec<String>,
    pub send_encodings: Vec<EncodingParameters>,
}

/// Snapshot of a transceiver
#[derive(Debug, Clone)]
pub struct TransceiverInfo {
    pub id: TransceiverId,
    pub mid: Option<String>,
    pub kind: TrackKind,
    pub direction: RTCRtpTransceiverDirection,
    /// Native id of the track currently bound to the sender
    pub sender_track_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

/// Raw statistics report of the native connection, keyed by stats id
pub type StatsReport = serde_json::Map<String, serde_json::Value>;

/// Payload received on a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelPayload {
    Binary(Bytes),
    Text(String),
}

impl DataChannelPayload {
    /// Normalize to bytes; text is UTF-8 encoded.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Binary(data) => data,
            Self::Text(text) => Bytes::from(text.into_bytes()),
        }
    }
}

/// Callbacks raised by the native connection
#[derive(Debug, Clone)]
pub enum PeerConnectionEvent {
    /// Inbound media arrived on the transceiver with `mid`
    Track {
        mid: String,
        stream_id: String,
        track: NativeTrack,
    },
    IceCandidate(IceCandidate),
    SignalingStateChange(RTCSignalingState),
    IceGatheringStateChange(RTCIceGatheringState),
    IceConnectionStateChange(RTCIceConnectionState),
    ConnectionStateChange(RTCPeerConnectionState),
    DataChannelOpen {
        label: String,
    },
    DataChannelClose {
        label: String,
    },
    DataChannelMessage {
        label: String,
        payload: DataChannelPayload,
    },
}

pub type PeerConnectionEventSender = mpsc::UnboundedSender<PeerConnectionEvent>;
pub type PeerConnectionEvents = mpsc::UnboundedReceiver<PeerConnectionEvent>;

/// Native data channel
#[cfg_attr(test, mockall::automock)]
pub trait NativeDataChannel: Send + Sync {
    fn label(&self) -> String;

    fn send(&self, data: Bytes) -> anyhow::Result<()>;

    fn close(&self);
}

/// Native peer connection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, options: OfferOptions) -> anyhow::Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> anyhow::Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()>;

    async fn add_transceiver(&self, init: TransceiverInit) -> anyhow::Result<TransceiverId>;

    fn transceivers(&self) -> Vec<TransceiverInfo>;

    async fn replace_sender_track(
        &self,
        transceiver: TransceiverId,
        track: Option<NativeTrack>,
    ) -> anyhow::Result<()>;

    /// Detach the sender of `transceiver`; the transceiver stops sending.
    async fn remove_sender(&self, transceiver: TransceiverId) -> anyhow::Result<()>;

    async fn set_send_encodings(
        &self,
        transceiver: TransceiverId,
        encodings: Vec<EncodingParameters>,
    ) -> anyhow::Result<()>;

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> anyhow::Result<Box<dyn NativeDataChannel>>;

    async fn get_stats(&self) -> anyhow::Result<StatsReport>;

    fn signaling_state(&self) -> RTCSignalingState;

    fn ice_connection_state(&self) -> RTCIceConnectionState;

    fn ice_gathering_state(&self) -> RTCIceGatheringState;

    fn connection_state(&self) -> RTCPeerConnectionState;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Creates native connections on demand; the endpoint creates one lazily on
/// the first `offerData`.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        config: PeerConnectionConfig,
        events: PeerConnectionEventSender,
    ) -> anyhow::Result<Box<dyn PeerConnection>>;
}
