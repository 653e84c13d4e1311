//! JSON wire encoding
//!
//! Every message is `{"type": ..., "data": ...}`. Negotiation and track
//! control messages travel wrapped in a `custom` envelope:
//! `{"type": "custom", "data": {"type": "sdpOffer", "data": {...}}}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::{
    ClientIntent, CodecError, EndpointAnnouncement, MediaEventCodec, ServerEvent,
    TrackAnnouncement, TrackTypeCounts, TurnServer,
};
use crate::transport::{IceCandidate, SdpType, SessionDescription};
use crate::types::{
    EncodingReason, EndpointId, SimulcastConfig, TrackBitrates, TrackId, TrackVariant, VadStatus,
};

/// Default codec: JSON media events
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MediaEventCodec for JsonCodec {
    fn encode(&self, intent: &ClientIntent) -> Result<Bytes, CodecError> {
        let message = OutboundMessage::from(intent.clone());
        Ok(Bytes::from(serde_json::to_vec(&message)?))
    }

    fn decode(&self, raw: &[u8]) -> Result<ServerEvent, CodecError> {
        let message: InboundMessage = serde_json::from_slice(raw)?;
        ServerEvent::try_from(message)
    }
}

// Outbound

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum OutboundMessage {
    Connect(MetadataWire),
    Disconnect,
    UpdateEndpointMetadata(MetadataWire),
    UpdateTrackMetadata(TrackMetadataWire),
    Custom(OutboundCustom),
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum OutboundCustom {
    RenegotiateTracks,
    SdpOffer(SdpOfferWire),
    Candidate(IceCandidate),
    EnableTrackVariant(TrackVariantWire),
    DisableTrackVariant(TrackVariantWire),
    TrackBitrates(TrackBitratesWire),
    SetTargetTrackVariant(TrackVariantWire),
}

#[derive(Serialize)]
struct MetadataWire {
    metadata: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackMetadataWire {
    track_id: TrackId,
    track_metadata: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SdpOfferWire {
    sdp_offer: SessionDescription,
    track_id_to_track_metadata: BTreeMap<TrackId, Value>,
    track_id_to_track_bitrates: BTreeMap<TrackId, TrackBitrates>,
    mid_to_track_id: BTreeMap<String, TrackId>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackVariantWire {
    #[serde(default, skip_serializing)]
    endpoint_id: Option<EndpointId>,
    track_id: TrackId,
    variant: TrackVariant,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackBitratesWire {
    track_id: TrackId,
    track_bitrates: TrackBitrates,
}

impl From<ClientIntent> for OutboundMessage {
    fn from(intent: ClientIntent) -> Self {
        match intent {
            ClientIntent::Connect { metadata } => Self::Connect(MetadataWire { metadata }),
            ClientIntent::Disconnect => Self::Disconnect,
            ClientIntent::UpdateEndpointMetadata { metadata } => {
                Self::UpdateEndpointMetadata(MetadataWire { metadata })
            }
            ClientIntent::UpdateTrackMetadata { track_id, metadata } => {
                Self::UpdateTrackMetadata(TrackMetadataWire {
                    track_id,
                    track_metadata: metadata,
                })
            }
            ClientIntent::RenegotiateTracks => Self::Custom(OutboundCustom::RenegotiateTracks),
            ClientIntent::SdpOffer {
                offer,
                track_id_to_metadata,
                track_id_to_bitrates,
                mid_to_track_id,
            } => Self::Custom(OutboundCustom::SdpOffer(SdpOfferWire {
                sdp_offer: offer,
                track_id_to_track_metadata: track_id_to_metadata,
                track_id_to_track_bitrates: track_id_to_bitrates,
                mid_to_track_id,
            })),
            ClientIntent::Candidate(candidate) => Self::Custom(OutboundCustom::Candidate(candidate)),
            ClientIntent::EnableTrackVariant { track_id, variant } => {
                Self::Custom(OutboundCustom::EnableTrackVariant(TrackVariantWire {
                    endpoint_id: None,
                    track_id,
                    variant,
                }))
            }
            ClientIntent::DisableTrackVariant { track_id, variant } => {
                Self::Custom(OutboundCustom::DisableTrackVariant(TrackVariantWire {
                    endpoint_id: None,
                    track_id,
                    variant,
                }))
            }
            ClientIntent::TrackBitrates { track_id, bitrates } => {
                Self::Custom(OutboundCustom::TrackBitrates(TrackBitratesWire {
                    track_id,
                    track_bitrates: bitrates,
                }))
            }
            ClientIntent::SetTargetTrackVariant { track_id, variant } => {
                Self::Custom(OutboundCustom::SetTargetTrackVariant(TrackVariantWire {
                    endpoint_id: None,
                    track_id,
                    variant,
                }))
            }
        }
    }
}

// Inbound

#[derive(Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum InboundMessage {
    Connected(ConnectedWire),
    EndpointAdded(EndpointWire),
    EndpointRemoved(EndpointRefWire),
    EndpointUpdated(EndpointUpdatedWire),
    TracksAdded(TracksAddedWire),
    TracksRemoved(TracksRemovedWire),
    TrackUpdated(TrackUpdatedWire),
    Error(ErrorWire),
    Custom(InboundCustom),
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum InboundCustom {
    OfferData(OfferDataWire),
    Candidate(IceCandidate),
    SdpAnswer(SdpAnswerWire),
    TrackVariantSwitched(TrackVariantSwitchedWire),
    TrackVariantEnabled(TrackVariantWire),
    TrackVariantDisabled(TrackVariantWire),
    VadNotification(VadNotificationWire),
    BandwidthEstimation(BandwidthEstimationWire),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedWire {
    id: EndpointId,
    #[serde(default)]
    other_endpoints: Vec<EndpointWire>,
}

#[derive(Deserialize)]
struct EndpointWire {
    id: EndpointId,
    #[serde(rename = "type", default)]
    endpoint_type: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    tracks: HashMap<TrackId, TrackWire>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackWire {
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    simulcast_config: Option<SimulcastConfig>,
}

#[derive(Deserialize)]
struct EndpointRefWire {
    id: EndpointId,
}

#[derive(Deserialize)]
struct EndpointUpdatedWire {
    id: EndpointId,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracksAddedWire {
    endpoint_id: EndpointId,
    #[serde(default)]
    tracks: HashMap<TrackId, TrackWire>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracksRemovedWire {
    endpoint_id: EndpointId,
    track_ids: Vec<TrackId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackUpdatedWire {
    endpoint_id: EndpointId,
    track_id: TrackId,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
struct ErrorWire {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferDataWire {
    #[serde(default)]
    tracks_types: TrackTypesWire,
    #[serde(default)]
    integrated_turn_servers: Vec<TurnServerWire>,
}

#[derive(Deserialize, Default)]
struct TrackTypesWire {
    #[serde(default)]
    audio: usize,
    #[serde(default)]
    video: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnServerWire {
    server_addr: String,
    server_port: u16,
    transport: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SdpAnswerWire {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
    #[serde(default)]
    mid_to_track_id: HashMap<String, TrackId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackVariantSwitchedWire {
    endpoint_id: EndpointId,
    track_id: TrackId,
    variant: TrackVariant,
    reason: EncodingReason,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VadNotificationWire {
    track_id: TrackId,
    status: VadStatus,
}

#[derive(Deserialize)]
struct BandwidthEstimationWire {
    estimation: f64,
}

impl From<EndpointWire> for EndpointAnnouncement {
    fn from(wire: EndpointWire) -> Self {
        Self {
            id: wire.id,
            endpoint_type: wire.endpoint_type,
            metadata: wire.metadata,
            tracks: tracks_from_wire(wire.tracks),
        }
    }
}

fn tracks_from_wire(tracks: HashMap<TrackId, TrackWire>) -> HashMap<TrackId, TrackAnnouncement> {
    tracks
        .into_iter()
        .map(|(track_id, track)| {
            (
                track_id,
                TrackAnnouncement {
                    metadata: track.metadata,
                    simulcast_config: track.simulcast_config,
                },
            )
        })
        .collect()
}

fn variant_endpoint(wire: &TrackVariantWire) -> Result<EndpointId, CodecError> {
    wire.endpoint_id
        .clone()
        .ok_or_else(|| CodecError::Unsupported("track variant event without endpointId".into()))
}

impl TryFrom<InboundMessage> for ServerEvent {
    type Error = CodecError;

    fn try_from(message: InboundMessage) -> Result<Self, CodecError> {
        let event = match message {
            InboundMessage::Connected(data) => Self::Connected {
                endpoint_id: data.id,
                other_endpoints: data.other_endpoints.into_iter().map(Into::into).collect(),
            },
            InboundMessage::EndpointAdded(data) => Self::EndpointAdded(data.into()),
            InboundMessage::EndpointRemoved(data) => Self::EndpointRemoved {
                endpoint_id: data.id,
            },
            InboundMessage::EndpointUpdated(data) => Self::EndpointUpdated {
                endpoint_id: data.id,
                metadata: data.metadata,
            },
            InboundMessage::TracksAdded(data) => Self::TracksAdded {
                endpoint_id: data.endpoint_id,
                tracks: tracks_from_wire(data.tracks),
            },
            InboundMessage::TracksRemoved(data) => Self::TracksRemoved {
                endpoint_id: data.endpoint_id,
                track_ids: data.track_ids,
            },
            InboundMessage::TrackUpdated(data) => Self::TrackUpdated {
                endpoint_id: data.endpoint_id,
                track_id: data.track_id,
                metadata: data.metadata,
            },
            InboundMessage::Error(data) => ServerEvent::Error {
                message: data.message,
            },
            InboundMessage::Custom(custom) => match custom {
                InboundCustom::OfferData(data) => Self::OfferData {
                    tracks_types: TrackTypeCounts {
                        audio: data.tracks_types.audio,
                        video: data.tracks_types.video,
                    },
                    turn_servers: data
                        .integrated_turn_servers
                        .into_iter()
                        .map(|server| TurnServer {
                            server_addr: server.server_addr,
                            server_port: server.server_port,
                            transport: server.transport,
                            username: server.username,
                            password: server.password,
                        })
                        .collect(),
                },
                InboundCustom::Candidate(candidate) => Self::Candidate(candidate),
                InboundCustom::SdpAnswer(data) => {
                    if data.sdp_type != SdpType::Answer {
                        return Err(CodecError::Unsupported(format!(
                            "sdpAnswer carrying a {:?} description",
                            data.sdp_type
                        )));
                    }
                    Self::SdpAnswer {
                        answer: SessionDescription {
                            sdp_type: data.sdp_type,
                            sdp: data.sdp,
                        },
                        mid_to_track_id: data.mid_to_track_id,
                    }
                }
                InboundCustom::TrackVariantSwitched(data) => Self::TrackVariantSwitched {
                    endpoint_id: data.endpoint_id,
                    track_id: data.track_id,
                    variant: data.variant,
                    reason: data.reason,
                },
                InboundCustom::TrackVariantEnabled(data) => Self::TrackVariantEnabled {
                    endpoint_id: variant_endpoint(&data)?,
                    track_id: data.track_id,
                    variant: data.variant,
                },
                InboundCustom::TrackVariantDisabled(data) => Self::TrackVariantDisabled {
                    endpoint_id: variant_endpoint(&data)?,
                    track_id: data.track_id,
                    variant: data.variant,
                },
                InboundCustom::VadNotification(data) => Self::VadNotification {
                    track_id: data.track_id,
                    status: data.status,
                },
                InboundCustom::BandwidthEstimation(data) => Self::BandwidthEstimation {
                    estimation: data.estimation,
                },
            },
        };
        Ok(event)
    }
}
