//! Local endpoint and the tracks it publishes

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::codec::ClientIntent;
use crate::config::BitrateConfig;
use crate::connection::{ConnectionAdapter, SendTrack};
use crate::error::{Error, Result};
use crate::events::{EndpointEvent, Signaler};
use crate::simulcast;
use crate::transport::{NativeTrack, TransceiverId, TransceiverInfo};
use crate::types::{
    EndpointId, NegotiationStatus, SimulcastConfig, TrackBandwidthLimit, TrackBitrates, TrackId,
    TrackKind, TrackVariant,
};

/// This client, as known to the server
#[derive(Debug, Clone, Default)]
pub struct LocalEndpoint {
    /// Empty until the server accepts the endpoint
    pub id: EndpointId,
    pub metadata: Value,
}

/// A track published by this endpoint
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub track_id: TrackId,
    pub kind: TrackKind,
    /// `None` while muted
    pub track: Option<NativeTrack>,
    pub stream_id: String,
    pub metadata: Value,
    pub simulcast_config: Option<SimulcastConfig>,
    /// kbps, `0` meaning unlimited
    pub max_bandwidth: TrackBandwidthLimit,
    pub mid: Option<String>,
    pub transceiver: Option<TransceiverId>,
    pub negotiation_status: NegotiationStatus,
    pub pending_metadata_update: bool,
}

impl LocalTrack {
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.track.is_none()
    }

    fn send_track(&self) -> SendTrack {
        SendTrack {
            kind: self.kind,
            track: self.track.clone(),
            stream_id: self.stream_id.clone(),
            encodings: simulcast::send_encodings(self.simulcast_config.as_ref(), &self.max_bandwidth),
        }
    }

    fn simulcast_enabled(&self) -> bool {
        self.simulcast_config.as_ref().is_some_and(|config| config.enabled)
    }
}

/// Arguments of a new local track
#[derive(Debug, Clone)]
pub struct NewLocalTrack {
    pub track_id: TrackId,
    pub track: NativeTrack,
    pub metadata: Value,
    pub simulcast_config: Option<SimulcastConfig>,
    pub max_bandwidth: TrackBandwidthLimit,
}

pub struct LocalTrackStore {
    endpoint: LocalEndpoint,
    tracks: HashMap<TrackId, LocalTrack>,
    stream_id: String,
    bitrates: BitrateConfig,
    signaler: Signaler,
}

impl LocalTrackStore {
    pub fn new(bitrates: BitrateConfig, signaler: Signaler) -> Self {
        Self {
            endpoint: LocalEndpoint::default(),
            tracks: HashMap::new(),
            stream_id: uuid::Uuid::new_v4().to_string(),
            bitrates,
            signaler,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &LocalEndpoint {
        &self.endpoint
    }

    pub fn set_endpoint_id(&mut self, id: EndpointId) {
        info!(endpoint_id = %id, "Local endpoint accepted");
        self.endpoint.id = id;
    }

    pub fn set_endpoint_metadata(&mut self, metadata: Value) {
        self.endpoint.metadata = metadata;
    }

    #[must_use]
    pub fn track(&self, track_id: &TrackId) -> Option<&LocalTrack> {
        self.tracks.get(track_id)
    }

    #[must_use]
    pub fn tracks(&self) -> HashMap<TrackId, LocalTrack> {
        self.tracks.clone()
    }

    /// Whether a local track currently holds `native_id`
    #[must_use]
    pub fn holds_native_track(&self, native_id: &str) -> bool {
        self.tracks
            .values()
            .filter_map(|track| track.track.as_ref())
            .any(|native| native.id() == native_id)
    }

    fn track_mut(&mut self, track_id: &TrackId) -> Result<&mut LocalTrack> {
        self.tracks
            .get_mut(track_id)
            .ok_or_else(|| Error::NotFound(format!("local track {track_id}")))
    }

    /// Create a track in `Awaiting`, attaching it if a connection exists.
    pub async fn add_track(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        new: NewLocalTrack,
    ) -> Result<LocalTrack> {
        let mut track = LocalTrack {
            track_id: new.track_id,
            kind: new.track.kind(),
            track: Some(new.track),
            stream_id: self.stream_id.clone(),
            metadata: new.metadata,
            simulcast_config: new.simulcast_config,
            max_bandwidth: new.max_bandwidth,
            mid: None,
            transceiver: None,
            negotiation_status: NegotiationStatus::Awaiting,
            pending_metadata_update: false,
        };

        if let Some(connection) = connection {
            track.transceiver = Some(connection.attach(track.send_track()).await?);
        }

        info!(track_id = %track.track_id, kind = %track.kind, "Local track added");
        self.tracks.insert(track.track_id.clone(), track.clone());
        self.signaler.emit(EndpointEvent::LocalTrackAdded(track.clone()));
        Ok(track)
    }

    /// Attach every track that has no transceiver yet; used once the
    /// connection comes into existence.
    pub async fn attach_all(&mut self, connection: &ConnectionAdapter) -> Result<()> {
        for track in self.tracks.values_mut().filter(|t| t.transceiver.is_none()) {
            track.transceiver = Some(connection.attach(track.send_track()).await?);
        }
        Ok(())
    }

    pub async fn remove_track(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
    ) -> Result<LocalTrack> {
        let track = self
            .tracks
            .get(track_id)
            .ok_or_else(|| Error::NotFound(format!("local track {track_id}")))?;

        if let (Some(connection), Some(transceiver)) = (connection, track.transceiver) {
            connection.detach(transceiver).await?;
        }

        let track = self
            .tracks
            .remove(track_id)
            .ok_or_else(|| Error::NotFound(format!("local track {track_id}")))?;
        info!(%track_id, "Local track removed");
        self.signaler.emit(EndpointEvent::LocalTrackRemoved(track.clone()));
        Ok(track)
    }

    /// Swap the native handle. `Some -> None` mutes, `None -> Some` unmutes.
    pub async fn replace_track(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
        native: Option<NativeTrack>,
    ) -> Result<LocalTrack> {
        let track = self.track_mut(track_id)?;

        if let Some(new) = &native {
            if new.kind() != track.kind {
                return Err(Error::Validation(format!(
                    "cannot replace {} track {track_id} with a {} track",
                    track.kind,
                    new.kind()
                )));
            }
        }

        if let (Some(connection), Some(transceiver)) = (connection, track.transceiver) {
            connection.replace_track(transceiver, native.clone()).await?;
        }

        let was_muted = track.is_muted();
        track.track = native;
        let snapshot = track.clone();

        let event = match (was_muted, snapshot.is_muted()) {
            (false, true) => EndpointEvent::LocalTrackMuted(snapshot.clone()),
            (true, false) => EndpointEvent::LocalTrackUnmuted(snapshot.clone()),
            _ => EndpointEvent::LocalTrackReplaced(snapshot.clone()),
        };
        debug!(%track_id, muted = snapshot.is_muted(), "Local track replaced");
        self.signaler.emit(event);
        Ok(snapshot)
    }

    /// Store new metadata and send it when the server can take it.
    ///
    /// `Done` sends now. `Offered` defers until the answer, since the offer
    /// in flight carries the old metadata. `Awaiting` sends nothing: the first
    /// offer will carry it.
    pub fn update_track_metadata(&mut self, track_id: &TrackId, metadata: Value) -> Result<()> {
        let signaler = self.signaler.clone();
        let track = self.track_mut(track_id)?;
        track.metadata = metadata.clone();

        match track.negotiation_status {
            NegotiationStatus::Done => signaler.send(&ClientIntent::UpdateTrackMetadata {
                track_id: track_id.clone(),
                metadata: metadata.clone(),
            }),
            NegotiationStatus::Offered => {
                debug!(%track_id, "Deferring metadata update until answer");
                track.pending_metadata_update = true;
            }
            NegotiationStatus::Awaiting => {}
        }

        signaler.emit(EndpointEvent::LocalTrackMetadataChanged {
            track_id: track_id.clone(),
            metadata,
        });
        Ok(())
    }

    /// Every local track is captured by the offer just sent.
    pub fn mark_offered(&mut self) {
        for track in self.tracks.values_mut() {
            track.negotiation_status = NegotiationStatus::Offered;
        }
    }

    /// Apply an answer: record mids, finalize offered tracks and flush their
    /// deferred metadata.
    pub fn apply_answer(&mut self, mid_to_track_id: &HashMap<String, TrackId>) {
        for (mid, track_id) in mid_to_track_id {
            if let Some(track) = self.tracks.get_mut(track_id) {
                track.mid = Some(mid.clone());
            }
        }

        for track in self.tracks.values_mut() {
            if track.negotiation_status != NegotiationStatus::Offered {
                continue;
            }
            track.negotiation_status = NegotiationStatus::Done;

            if std::mem::take(&mut track.pending_metadata_update) {
                debug!(track_id = %track.track_id, "Flushing deferred metadata update");
                self.signaler.send(&ClientIntent::UpdateTrackMetadata {
                    track_id: track.track_id.clone(),
                    metadata: track.metadata.clone(),
                });
            }
        }
    }

    /// mid -> track id for the offer.
    ///
    /// Union of transceivers whose sender is bound to one of our tracks (or
    /// that we attached a track to) and of mids recorded from earlier answers,
    /// which still cover muted tracks.
    #[must_use]
    pub fn mid_to_track_id(&self, transceivers: &[TransceiverInfo]) -> BTreeMap<String, TrackId> {
        let mut mids = BTreeMap::new();

        for transceiver in transceivers {
            let Some(mid) = &transceiver.mid else {
                continue;
            };
            let owner = self.tracks.values().find(|track| {
                track.transceiver == Some(transceiver.id)
                    || matches!(
                        (&track.track, &transceiver.sender_track_id),
                        (Some(native), Some(bound)) if native.id() == bound.as_str()
                    )
            });
            if let Some(track) = owner {
                mids.insert(mid.clone(), track.track_id.clone());
            }
        }

        for track in self.tracks.values() {
            if let Some(mid) = &track.mid {
                mids.entry(mid.clone()).or_insert_with(|| track.track_id.clone());
            }
        }

        mids
    }

    #[must_use]
    pub fn offer_metadata(&self) -> BTreeMap<TrackId, Value> {
        self.tracks
            .values()
            .map(|track| (track.track_id.clone(), track.metadata.clone()))
            .collect()
    }

    #[must_use]
    pub fn offer_bitrates(&self) -> BTreeMap<TrackId, TrackBitrates> {
        self.tracks
            .values()
            .map(|track| (track.track_id.clone(), self.bitrates_of(track)))
            .collect()
    }

    fn bitrates_of(&self, track: &LocalTrack) -> TrackBitrates {
        simulcast::track_bitrates(
            track.kind,
            track.simulcast_config.as_ref(),
            &track.max_bandwidth,
            &self.bitrates,
        )
    }

    /// Push the track's encodings to its sender, if attached
    async fn apply_encodings(
        connection: Option<&ConnectionAdapter>,
        track: &LocalTrack,
    ) -> Result<()> {
        if let (Some(connection), Some(transceiver)) = (connection, track.transceiver) {
            let encodings =
                simulcast::send_encodings(track.simulcast_config.as_ref(), &track.max_bandwidth);
            connection.set_encodings(transceiver, encodings).await?;
        }
        Ok(())
    }

    pub async fn set_track_bandwidth(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
        limit: TrackBandwidthLimit,
    ) -> Result<()> {
        let track = self.track_mut(track_id)?;
        if !track.simulcast_enabled() && matches!(limit, TrackBandwidthLimit::Simulcast(_)) {
            return Err(Error::Validation(format!(
                "per-variant bandwidth on non-simulcast track {track_id}"
            )));
        }
        track.max_bandwidth = limit.clone();
        let track = track.clone();

        Self::apply_encodings(connection, &track).await?;
        self.signaler.send(&ClientIntent::TrackBitrates {
            track_id: track_id.clone(),
            bitrates: self.bitrates_of(&track),
        });
        self.signaler.emit(EndpointEvent::LocalTrackBandwidthSet {
            track_id: track_id.clone(),
            bandwidth: limit,
        });
        Ok(())
    }

    pub async fn set_encoding_bandwidth(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
        variant: TrackVariant,
        kbps: u64,
    ) -> Result<()> {
        let track = self.track_mut(track_id)?;
        if !track.simulcast_enabled() {
            return Err(Error::Validation(format!(
                "track {track_id} is not a simulcast track"
            )));
        }

        let mut limits = match &track.max_bandwidth {
            TrackBandwidthLimit::Simulcast(limits) => limits.clone(),
            TrackBandwidthLimit::Single(_) => BTreeMap::new(),
        };
        limits.insert(variant, kbps);
        track.max_bandwidth = TrackBandwidthLimit::Simulcast(limits);
        let track = track.clone();

        Self::apply_encodings(connection, &track).await?;
        self.signaler.send(&ClientIntent::TrackBitrates {
            track_id: track_id.clone(),
            bitrates: self.bitrates_of(&track),
        });
        self.signaler.emit(EndpointEvent::LocalTrackEncodingBandwidthSet {
            track_id: track_id.clone(),
            encoding: variant,
            bandwidth: kbps,
        });
        Ok(())
    }

    /// Move `variant` between the active and disabled sets of a simulcast track.
    pub async fn set_encoding_active(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
        variant: TrackVariant,
        active: bool,
    ) -> Result<()> {
        let track = self.track_mut(track_id)?;
        let config = track
            .simulcast_config
            .as_mut()
            .filter(|config| config.enabled)
            .ok_or_else(|| Error::Validation(format!("track {track_id} is not a simulcast track")))?;

        if active {
            config.disabled_encodings.remove(&variant);
            config.active_encodings.insert(variant);
        } else {
            config.active_encodings.remove(&variant);
            config.disabled_encodings.insert(variant);
        }
        let track = track.clone();

        Self::apply_encodings(connection, &track).await?;

        let track_id = track_id.clone();
        let (intent, event) = if active {
            (
                ClientIntent::EnableTrackVariant {
                    track_id: track_id.clone(),
                    variant,
                },
                EndpointEvent::LocalTrackEncodingEnabled {
                    track_id,
                    encoding: variant,
                },
            )
        } else {
            (
                ClientIntent::DisableTrackVariant {
                    track_id: track_id.clone(),
                    variant,
                },
                EndpointEvent::LocalTrackEncodingDisabled {
                    track_id,
                    encoding: variant,
                },
            )
        };
        self.signaler.send(&intent);
        self.signaler.emit(event);
        Ok(())
    }

    /// Forget the endpoint and every track; used on disconnect.
    pub fn reset(&mut self) {
        if !self.tracks.is_empty() {
            warn!(tracks = self.tracks.len(), "Dropping local tracks on reset");
        }
        self.tracks.clear();
        self.endpoint = LocalEndpoint::default();
    }
}
