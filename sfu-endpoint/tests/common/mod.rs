//! In-memory peer connection and a harness driving `WebRTCEndpoint` with
//! JSON media events, the way a server would.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use sfu_endpoint::transport::{
    DataChannelInit, EncodingParameters, IceCandidate, MediaStreamTrack, NativeDataChannel,
    NativeTrack, OfferOptions, PeerConnection, PeerConnectionConfig, PeerConnectionEventSender,
    PeerConnectionEvents, PeerConnectionFactory, SdpType, SessionDescription, StatsReport,
    TransceiverId, TransceiverInfo, TransceiverInit,
};
use sfu_endpoint::{EndpointConfig, EndpointEvent, EndpointEvents, JsonCodec, TrackKind, WebRTCEndpoint};

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
}

impl MediaStreamTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }
}

pub fn video(id: &str) -> NativeTrack {
    Arc::new(FakeTrack {
        id: id.to_string(),
        kind: TrackKind::Video,
    })
}

pub fn audio(id: &str) -> NativeTrack {
    Arc::new(FakeTrack {
        id: id.to_string(),
        kind: TrackKind::Audio,
    })
}

/// Everything the fake connection did, shared with the test
pub struct FakeState {
    pub created: usize,
    pub fail_create: bool,
    pub fail_remote_description: bool,
    pub config: Option<PeerConnectionConfig>,
    pub transceivers: Vec<TransceiverInfo>,
    pub encodings: Vec<(TransceiverId, Vec<EncodingParameters>)>,
    pub next_mid: usize,
    pub offers: usize,
    pub ice_restarts: usize,
    pub remote_descriptions: usize,
    pub candidates: Vec<IceCandidate>,
    pub data_channels: Vec<(String, DataChannelInit)>,
    pub data_sent: Arc<Mutex<Vec<(String, Bytes)>>>,
    pub signaling: RTCSignalingState,
    pub ice: RTCIceConnectionState,
    pub connection: RTCPeerConnectionState,
    pub closed: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            created: 0,
            fail_create: false,
            fail_remote_description: false,
            config: None,
            transceivers: Vec::new(),
            encodings: Vec::new(),
            next_mid: 0,
            offers: 0,
            ice_restarts: 0,
            remote_descriptions: 0,
            candidates: Vec::new(),
            data_channels: Vec::new(),
            data_sent: Arc::new(Mutex::new(Vec::new())),
            signaling: RTCSignalingState::Stable,
            ice: RTCIceConnectionState::New,
            connection: RTCPeerConnectionState::New,
            closed: false,
        }
    }
}

impl FakeState {
    /// Mids of receive-only transceivers, in creation order
    pub fn receive_mids(&self) -> Vec<String> {
        self.transceivers
            .iter()
            .filter(|t| t.direction == RTCRtpTransceiverDirection::Recvonly)
            .filter_map(|t| t.mid.clone())
            .collect()
    }

    pub fn sender_of(&self, mid: &str) -> Option<String> {
        self.transceivers
            .iter()
            .find(|t| t.mid.as_deref() == Some(mid))
            .and_then(|t| t.sender_track_id.clone())
    }
}

pub type SharedState = Arc<Mutex<FakeState>>;

struct FakeDataChannel {
    label: String,
    sent: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl NativeDataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn send(&self, data: Bytes) -> anyhow::Result<()> {
        self.sent.lock().push((self.label.clone(), data));
        Ok(())
    }

    fn close(&self) {}
}

pub struct FakePeerConnection {
    state: SharedState,
    _events: PeerConnectionEventSender,
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self, options: OfferOptions) -> anyhow::Result<SessionDescription> {
        let mut state = self.state.lock();
        state.offers += 1;
        if options.ice_restart {
            state.ice_restarts += 1;
        }
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: format!("v=0 offer {}", state.offers),
        })
    }

    async fn set_local_description(&self, _description: SessionDescription) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.signaling = RTCSignalingState::HaveLocalOffer;
        let mut next_mid = state.next_mid;
        for transceiver in state.transceivers.iter_mut().filter(|t| t.mid.is_none()) {
            transceiver.mid = Some(next_mid.to_string());
            next_mid += 1;
        }
        state.next_mid = next_mid;
        Ok(())
    }

    async fn set_remote_description(&self, _description: SessionDescription) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_remote_description {
            anyhow::bail!("remote description rejected");
        }
        state.remote_descriptions += 1;
        state.signaling = RTCSignalingState::Stable;
        state.ice = RTCIceConnectionState::Connected;
        state.connection = RTCPeerConnectionState::Connected;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        self.state.lock().candidates.push(candidate);
        Ok(())
    }

    async fn add_transceiver(&self, init: TransceiverInit) -> anyhow::Result<TransceiverId> {
        let mut state = self.state.lock();
        let id = TransceiverId(state.transceivers.len());
        state.transceivers.push(TransceiverInfo {
            id,
            mid: None,
            kind: init.kind,
            direction: init.direction,
            sender_track_id: init.track.map(|track| track.id().to_string()),
        });
        state.encodings.push((id, init.send_encodings));
        Ok(id)
    }

    fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.state.lock().transceivers.clone()
    }

    async fn replace_sender_track(
        &self,
        transceiver: TransceiverId,
        track: Option<NativeTrack>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let info = state
            .transceivers
            .get_mut(transceiver.0)
            .ok_or_else(|| anyhow::anyhow!("unknown transceiver"))?;
        info.sender_track_id = track.map(|track| track.id().to_string());
        Ok(())
    }

    async fn remove_sender(&self, transceiver: TransceiverId) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let info = state
            .transceivers
            .get_mut(transceiver.0)
            .ok_or_else(|| anyhow::anyhow!("unknown transceiver"))?;
        info.sender_track_id = None;
        info.direction = RTCRtpTransceiverDirection::Inactive;
        Ok(())
    }

    async fn set_send_encodings(
        &self,
        transceiver: TransceiverId,
        encodings: Vec<EncodingParameters>,
    ) -> anyhow::Result<()> {
        self.state.lock().encodings.push((transceiver, encodings));
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> anyhow::Result<Box<dyn NativeDataChannel>> {
        let mut state = self.state.lock();
        state.data_channels.push((label.to_string(), init));
        Ok(Box::new(FakeDataChannel {
            label: label.to_string(),
            sent: Arc::clone(&state.data_sent),
        }))
    }

    async fn get_stats(&self) -> anyhow::Result<StatsReport> {
        let mut report = StatsReport::new();
        report.insert("transport".to_string(), json!({"bytesSent": 1200}));
        Ok(report)
    }

    fn signaling_state(&self) -> RTCSignalingState {
        self.state.lock().signaling
    }

    fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.state.lock().ice
    }

    fn ice_gathering_state(&self) -> RTCIceGatheringState {
        RTCIceGatheringState::Complete
    }

    fn connection_state(&self) -> RTCPeerConnectionState {
        self.state.lock().connection
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

pub struct FakeFactory {
    pub state: SharedState,
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        config: PeerConnectionConfig,
        events: PeerConnectionEventSender,
    ) -> anyhow::Result<Box<dyn PeerConnection>> {
        let mut state = self.state.lock();
        if state.fail_create {
            anyhow::bail!("no network");
        }
        state.created += 1;
        state.config = Some(config);
        Ok(Box::new(FakePeerConnection {
            state: Arc::clone(&self.state),
            _events: events,
        }))
    }
}

// Server media events

pub fn endpoint_json(id: &str, tracks: &[&str]) -> Value {
    let tracks: serde_json::Map<String, Value> = tracks
        .iter()
        .map(|track_id| {
            (
                (*track_id).to_string(),
                json!({"metadata": {"source": "camera"}, "simulcastConfig": {"enabled": false}}),
            )
        })
        .collect();
    json!({"id": id, "type": "webrtc", "metadata": {"name": id}, "tracks": tracks})
}

pub fn connected(id: &str, others: Vec<Value>) -> Value {
    json!({"type": "connected", "data": {"id": id, "otherEndpoints": others}})
}

pub fn offer_data(audio: usize, video: usize) -> Value {
    json!({
        "type": "custom",
        "data": {"type": "offerData", "data": {
            "tracksTypes": {"audio": audio, "video": video},
            "integratedTurnServers": []
        }}
    })
}

pub fn sdp_answer(mid_to_track_id: Value) -> Value {
    json!({
        "type": "custom",
        "data": {"type": "sdpAnswer", "data": {
            "type": "answer", "sdp": "v=0 answer", "midToTrackId": mid_to_track_id
        }}
    })
}

pub fn tracks_added(endpoint_id: &str, tracks: &[&str]) -> Value {
    let endpoint = endpoint_json(endpoint_id, tracks);
    json!({"type": "tracksAdded", "data": {"endpointId": endpoint_id, "tracks": endpoint["tracks"]}})
}

pub fn tracks_removed(endpoint_id: &str, track_ids: &[&str]) -> Value {
    json!({"type": "tracksRemoved", "data": {"endpointId": endpoint_id, "trackIds": track_ids}})
}

/// Name of an encoded intent, unwrapping the `custom` envelope
pub fn intent_name(intent: &Value) -> String {
    let name = intent["type"].as_str().unwrap_or_default();
    if name == "custom" {
        intent["data"]["type"].as_str().unwrap_or_default().to_string()
    } else {
        name.to_string()
    }
}

pub struct Harness {
    pub endpoint: WebRTCEndpoint,
    pub events: EndpointEvents,
    pub pc_events: PeerConnectionEvents,
    pub pc: SharedState,
    pub outbox: Vec<Value>,
    pub notifications: Vec<EndpointEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EndpointConfig::default())
    }

    pub fn with_config(config: EndpointConfig) -> Self {
        let pc: SharedState = Arc::new(Mutex::new(FakeState::default()));
        let factory = Arc::new(FakeFactory {
            state: Arc::clone(&pc),
        });
        let (endpoint, pc_events) = WebRTCEndpoint::new(config, factory, Arc::new(JsonCodec));
        let events = endpoint.subscribe();
        Self {
            endpoint,
            events,
            pc_events,
            pc,
            outbox: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Move everything emitted so far into `outbox` / `notifications`
    pub fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                EndpointEvent::SendMediaEvent(payload) => {
                    self.outbox
                        .push(serde_json::from_slice(&payload).expect("intent is JSON"));
                }
                other => self.notifications.push(other),
            }
        }
    }

    pub fn sent(&mut self, name: &str) -> Vec<Value> {
        self.drain();
        self.outbox
            .iter()
            .filter(|intent| intent_name(intent) == name)
            .cloned()
            .collect()
    }

    pub fn count(&mut self, name: &str) -> usize {
        self.sent(name).len()
    }

    pub async fn server(&mut self, event: Value) {
        self.endpoint
            .receive_media_event(event.to_string().as_bytes())
            .await
            .expect("server event decodes");
    }

    /// Connect and get accepted as `id`
    pub async fn join(&mut self, id: &str, others: Vec<Value>) {
        self.endpoint.connect(json!({"name": id}));
        self.server(connected(id, others)).await;
    }

    /// Answer the last offer, mapping every mid it declared plus `remote`
    pub async fn answer(&mut self, remote: &[(&str, &str)]) {
        let offer = self
            .sent("sdpOffer")
            .pop()
            .expect("an offer was sent");
        let mut mids = offer["data"]["data"]["midToTrackId"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        for (mid, track_id) in remote {
            mids.insert((*mid).to_string(), json!(track_id));
        }
        self.server(sdp_answer(Value::Object(mids))).await;
    }

    /// A full server-driven round: offerData, then the answer
    pub async fn round(&mut self, audio: usize, video: usize) {
        self.server(offer_data(audio, video)).await;
        self.answer(&[]).await;
    }
}
