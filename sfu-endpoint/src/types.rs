//! Common types used throughout the endpoint implementation

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Identifier of an endpoint (peer) as assigned by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local endpoint carries an empty id until the server accepts it.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a media track, unique across the room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an id for a track published by `endpoint_id`.
    #[must_use]
    pub fn generate(endpoint_id: &EndpointId) -> Self {
        Self(format!("{}:{}", endpoint_id, uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            RTPCodecType::Video => Self::Video,
            _ => Self::Video,
        }
    }
}

impl From<TrackKind> for RTPCodecType {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::Audio,
            TrackKind::Video => Self::Video,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulcast variant of a video track.
///
/// Serialized as its RID (`l`, `m`, `h`), which is also the key used on the
/// wire and in SDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackVariant {
    #[serde(rename = "l")]
    Low,
    #[serde(rename = "m")]
    Medium,
    #[serde(rename = "h")]
    High,
}

impl TrackVariant {
    /// All variants in the order their encodings are sent.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Get the RID (restriction identifier) for this variant
    #[must_use]
    pub const fn rid(&self) -> &'static str {
        match self {
            Self::High => "h",
            Self::Medium => "m",
            Self::Low => "l",
        }
    }

    #[must_use]
    pub fn from_rid(rid: &str) -> Option<Self> {
        match rid {
            "h" => Some(Self::High),
            "m" => Some(Self::Medium),
            "l" => Some(Self::Low),
            _ => None,
        }
    }

    /// Resolution divisor applied to the captured frame for this variant
    #[must_use]
    pub const fn scale_resolution_down_by(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 2.0,
            Self::Low => 4.0,
        }
    }
}

impl fmt::Display for TrackVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rid())
    }
}

/// Simulcast configuration of a track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastConfig {
    pub enabled: bool,
    #[serde(default)]
    pub active_encodings: BTreeSet<TrackVariant>,
    #[serde(default)]
    pub disabled_encodings: BTreeSet<TrackVariant>,
}

impl SimulcastConfig {
    /// Simulcast with the given variants active and the rest disabled.
    #[must_use]
    pub fn with_active(active: impl IntoIterator<Item = TrackVariant>) -> Self {
        let active_encodings: BTreeSet<_> = active.into_iter().collect();
        let disabled_encodings = TrackVariant::ALL
            .into_iter()
            .filter(|v| !active_encodings.contains(v))
            .collect();
        Self {
            enabled: true,
            active_encodings,
            disabled_encodings,
        }
    }

    #[must_use]
    pub fn is_active(&self, variant: TrackVariant) -> bool {
        self.active_encodings.contains(&variant)
    }
}

/// Bandwidth limit of a local track in kbps, `0` meaning unlimited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackBandwidthLimit {
    /// One limit for the whole track
    Single(u64),
    /// Per-variant limits of a simulcast track
    Simulcast(BTreeMap<TrackVariant, u64>),
}

impl Default for TrackBandwidthLimit {
    fn default() -> Self {
        Self::Single(0)
    }
}

/// Bitrates (bps) reported to the server for a local track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackBitrates {
    Single(u64),
    Simulcast(BTreeMap<TrackVariant, u64>),
}

/// Voice activity of a remote audio track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStatus {
    Speech,
    #[default]
    Silence,
}

/// Why the server switched the variant forwarded to us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EncodingReason {
    Other,
    EncodingInactive,
    LowBandwidth,
}

/// Where a local track is in the offer/answer cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    /// Not yet part of any offer
    Awaiting,
    /// Captured by an offer whose answer has not arrived
    Offered,
    /// Confirmed by an answer
    Done,
}
