//! Notifications raised by the endpoint
//!
//! Every subscriber receives every [`EndpointEvent`] over its own unbounded
//! channel. Outbound media events are notifications too: the host forwards
//! [`EndpointEvent::SendMediaEvent`] payloads to the server.

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use crate::codec::{ClientIntent, MediaEventCodec};
use crate::local::LocalTrack;
use crate::remote::{RemoteEndpoint, RemoteTrack};
use crate::types::{EndpointId, TrackBandwidthLimit, TrackId, TrackVariant, VadStatus, EncodingReason};

#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// Encoded media event to deliver to the server
    SendMediaEvent(Bytes),

    /// The server accepted this endpoint
    Connected {
        endpoint_id: EndpointId,
        other_endpoints: Vec<RemoteEndpoint>,
    },
    /// The session was torn down locally
    Disconnected,
    /// `disconnect` started tearing the session down
    DisconnectRequested,

    // Remote tracks
    TrackAdded(RemoteTrack),
    TrackReady(RemoteTrack),
    TrackRemoved(RemoteTrack),
    TrackUpdated(RemoteTrack),
    TrackEncodingChanged {
        track_id: TrackId,
        encoding: TrackVariant,
        reason: EncodingReason,
    },
    TrackEncodingEnabled {
        track_id: TrackId,
        encoding: TrackVariant,
    },
    TrackEncodingDisabled {
        track_id: TrackId,
        encoding: TrackVariant,
    },
    VoiceActivityChanged {
        track_id: TrackId,
        status: VadStatus,
    },

    // Remote endpoints
    EndpointAdded(RemoteEndpoint),
    EndpointRemoved(RemoteEndpoint),
    EndpointUpdated(RemoteEndpoint),

    // Local tracks
    LocalTrackAdded(LocalTrack),
    LocalTrackRemoved(LocalTrack),
    LocalTrackReplaced(LocalTrack),
    LocalTrackMuted(LocalTrack),
    LocalTrackUnmuted(LocalTrack),
    LocalTrackMetadataChanged {
        track_id: TrackId,
        metadata: Value,
    },
    LocalTrackBandwidthSet {
        track_id: TrackId,
        bandwidth: TrackBandwidthLimit,
    },
    LocalTrackEncodingBandwidthSet {
        track_id: TrackId,
        encoding: TrackVariant,
        bandwidth: u64,
    },
    LocalTrackEncodingEnabled {
        track_id: TrackId,
        encoding: TrackVariant,
    },
    LocalTrackEncodingDisabled {
        track_id: TrackId,
        encoding: TrackVariant,
    },
    LocalEndpointMetadataChanged(Value),
    TargetTrackEncodingRequested {
        track_id: TrackId,
        variant: TrackVariant,
    },

    /// Server side estimation of the bandwidth available to this endpoint, bps
    BandwidthEstimationChanged(f64),

    ConnectionError(String),
    SignalingError(String),
    SignalingStateChanged(RTCSignalingState),
    IceConnectionStateChanged(RTCIceConnectionState),
    ConnectionStateChanged(RTCPeerConnectionState),

    /// Both data channels are open
    DataChannelsReady,
}

pub type EndpointEvents = mpsc::UnboundedReceiver<EndpointEvent>;

/// Fan-out of [`EndpointEvent`]s to every subscriber
#[derive(Clone, Default)]
pub struct EventEmitter {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EndpointEvent>>>>,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EndpointEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber; closed ones are dropped.
    pub fn emit(&self, event: EndpointEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(subscribers = subscribers.len(), ?event, "Event emitted");
    }
}

/// Encodes outbound intents and emits them as [`EndpointEvent::SendMediaEvent`]
#[derive(Clone)]
pub struct Signaler {
    codec: Arc<dyn MediaEventCodec>,
    emitter: EventEmitter,
}

impl Signaler {
    pub fn new(codec: Arc<dyn MediaEventCodec>, emitter: EventEmitter) -> Self {
        Self { codec, emitter }
    }

    pub fn send(&self, intent: &ClientIntent) {
        match self.codec.encode(intent) {
            Ok(payload) => self.emitter.emit(EndpointEvent::SendMediaEvent(payload)),
            Err(e) => warn!(intent = intent.name(), error = %e, "Failed to encode media event"),
        }
    }

    pub fn emit(&self, event: EndpointEvent) {
        self.emitter.emit(event);
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn MediaEventCodec> {
        &self.codec
    }
}
