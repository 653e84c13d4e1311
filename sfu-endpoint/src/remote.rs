//! Remote endpoints and the tracks they publish
//!
//! Tracks are announced by the server long before media arrives. An announced
//! track has no native handle; it becomes ready once the native connection
//! reports inbound media on the transceiver whose mid the server mapped to it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{EndpointAnnouncement, TrackAnnouncement};
use crate::error::{Error, Result};
use crate::events::{EndpointEvent, EventEmitter};
use crate::transport::NativeTrack;
use crate::types::{
    EncodingReason, EndpointId, SimulcastConfig, TrackId, TrackKind, TrackVariant, VadStatus,
};

/// Validates raw metadata received from the server. An `Err` is stored on
/// the entity instead of being propagated.
pub type MetadataParser = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Parser that accepts any metadata unchanged
#[must_use]
pub fn identity_parser() -> MetadataParser {
    Arc::new(|raw: &Value| Ok(raw.clone()))
}

/// A track published by another endpoint
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub track_id: TrackId,
    pub endpoint_id: EndpointId,
    /// Known once media arrived
    pub kind: Option<TrackKind>,
    /// `None` until media arrived
    pub track: Option<NativeTrack>,
    pub stream_id: Option<String>,
    pub mid: Option<String>,
    pub metadata: Option<Value>,
    pub raw_metadata: Value,
    pub metadata_parsing_error: Option<String>,
    pub simulcast_config: Option<SimulcastConfig>,
    /// Variant currently forwarded by the server
    pub encoding: Option<TrackVariant>,
    pub encoding_reason: Option<EncodingReason>,
    pub vad_status: VadStatus,
}

impl RemoteTrack {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.track.is_some()
    }
}

/// Another endpoint in the room
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub id: EndpointId,
    pub endpoint_type: String,
    pub metadata: Option<Value>,
    pub raw_metadata: Value,
    pub metadata_parsing_error: Option<String>,
    pub tracks: HashMap<TrackId, RemoteTrack>,
}

/// Parse `raw`, splitting the outcome into (metadata, error)
fn parse_metadata(parser: &MetadataParser, raw: &Value) -> (Option<Value>, Option<String>) {
    match parser(raw) {
        Ok(parsed) => (Some(parsed), None),
        Err(err) => (None, Some(err)),
    }
}

pub struct RemoteTrackStore {
    endpoints: HashMap<EndpointId, RemoteEndpoint>,
    /// track id -> owning endpoint
    owners: HashMap<TrackId, EndpointId>,
    /// mid -> track id, as mapped by the last SDP answers
    mids: HashMap<String, TrackId>,
    endpoint_parser: MetadataParser,
    track_parser: MetadataParser,
    emitter: EventEmitter,
}

impl RemoteTrackStore {
    #[must_use]
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            endpoints: HashMap::new(),
            owners: HashMap::new(),
            mids: HashMap::new(),
            endpoint_parser: identity_parser(),
            track_parser: identity_parser(),
            emitter,
        }
    }

    pub fn set_endpoint_parser(&mut self, parser: MetadataParser) {
        self.endpoint_parser = parser;
    }

    pub fn set_track_parser(&mut self, parser: MetadataParser) {
        self.track_parser = parser;
    }

    /// Register an endpoint and every track it already publishes
    pub fn add_remote_endpoint(&mut self, announcement: EndpointAnnouncement) {
        if self.endpoints.contains_key(&announcement.id) {
            warn!(endpoint_id = %announcement.id, "Endpoint already known, ignoring announcement");
            return;
        }

        let (metadata, metadata_parsing_error) =
            parse_metadata(&self.endpoint_parser, &announcement.metadata);
        if let Some(error) = &metadata_parsing_error {
            warn!(endpoint_id = %announcement.id, %error, "Invalid endpoint metadata");
        }

        let endpoint = RemoteEndpoint {
            id: announcement.id.clone(),
            endpoint_type: announcement.endpoint_type,
            metadata,
            raw_metadata: announcement.metadata,
            metadata_parsing_error,
            tracks: HashMap::new(),
        };
        debug!(endpoint_id = %endpoint.id, "Remote endpoint added");
        self.emitter.emit(EndpointEvent::EndpointAdded(endpoint.clone()));
        self.endpoints.insert(announcement.id.clone(), endpoint);

        if !announcement.tracks.is_empty() {
            // The endpoint was inserted just above
            let _ = self.add_tracks(&announcement.id, announcement.tracks);
        }
    }

    /// Announce tracks of a known endpoint; each is emitted as not ready.
    pub fn add_tracks(
        &mut self,
        endpoint_id: &EndpointId,
        tracks: HashMap<TrackId, TrackAnnouncement>,
    ) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| Error::NotFound(format!("endpoint {endpoint_id}")))?;

        for (track_id, announcement) in tracks {
            if endpoint.tracks.contains_key(&track_id) {
                warn!(%track_id, "Track already announced");
                continue;
            }

            let (metadata, metadata_parsing_error) =
                parse_metadata(&self.track_parser, &announcement.metadata);
            if let Some(error) = &metadata_parsing_error {
                warn!(%track_id, %error, "Invalid track metadata");
            }

            let track = RemoteTrack {
                track_id: track_id.clone(),
                endpoint_id: endpoint_id.clone(),
                kind: None,
                track: None,
                stream_id: None,
                mid: None,
                metadata,
                raw_metadata: announcement.metadata,
                metadata_parsing_error,
                simulcast_config: announcement.simulcast_config,
                encoding: None,
                encoding_reason: None,
                vad_status: VadStatus::default(),
            };

            debug!(%track_id, %endpoint_id, "Remote track announced");
            self.emitter.emit(EndpointEvent::TrackAdded(track.clone()));
            self.owners.insert(track_id.clone(), endpoint_id.clone());
            endpoint.tracks.insert(track_id, track);
        }

        Ok(())
    }

    pub fn remove_tracks(&mut self, endpoint_id: &EndpointId, track_ids: &[TrackId]) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| Error::NotFound(format!("endpoint {endpoint_id}")))?;

        for track_id in track_ids {
            match endpoint.tracks.remove(track_id) {
                Some(track) => {
                    self.owners.remove(track_id);
                    self.mids.retain(|_, mapped| mapped != track_id);
                    debug!(%track_id, %endpoint_id, "Remote track removed");
                    self.emitter.emit(EndpointEvent::TrackRemoved(track));
                }
                None => warn!(%track_id, %endpoint_id, "Cannot remove unknown track"),
            }
        }

        Ok(())
    }

    /// Remove an endpoint; its tracks are removed (and notified) first.
    pub fn remove_remote_endpoint(&mut self, endpoint_id: &EndpointId) -> Result<()> {
        let track_ids: Vec<TrackId> = self
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| Error::NotFound(format!("endpoint {endpoint_id}")))?
            .tracks
            .keys()
            .cloned()
            .collect();

        self.remove_tracks(endpoint_id, &track_ids)?;

        if let Some(endpoint) = self.endpoints.remove(endpoint_id) {
            debug!(%endpoint_id, "Remote endpoint removed");
            self.emitter.emit(EndpointEvent::EndpointRemoved(endpoint));
        }
        Ok(())
    }

    pub fn update_remote_endpoint(&mut self, endpoint_id: &EndpointId, raw: Value) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| Error::NotFound(format!("endpoint {endpoint_id}")))?;

        let (metadata, metadata_parsing_error) = parse_metadata(&self.endpoint_parser, &raw);
        if let Some(error) = &metadata_parsing_error {
            warn!(%endpoint_id, %error, "Invalid endpoint metadata");
        }
        endpoint.metadata = metadata;
        endpoint.metadata_parsing_error = metadata_parsing_error;
        endpoint.raw_metadata = raw;

        self.emitter.emit(EndpointEvent::EndpointUpdated(endpoint.clone()));
        Ok(())
    }

    pub fn update_remote_track(
        &mut self,
        endpoint_id: &EndpointId,
        track_id: &TrackId,
        raw: Value,
    ) -> Result<()> {
        let parser = Arc::clone(&self.track_parser);
        let track = self
            .endpoints
            .get_mut(endpoint_id)
            .and_then(|endpoint| endpoint.tracks.get_mut(track_id))
            .ok_or_else(|| Error::NotFound(format!("track {track_id} of endpoint {endpoint_id}")))?;

        let (metadata, metadata_parsing_error) = parse_metadata(&parser, &raw);
        if let Some(error) = &metadata_parsing_error {
            warn!(%track_id, %error, "Invalid track metadata");
        }
        track.metadata = metadata;
        track.metadata_parsing_error = metadata_parsing_error;
        track.raw_metadata = raw;

        self.emitter.emit(EndpointEvent::TrackUpdated(track.clone()));
        Ok(())
    }

    /// Record which mid carries which remote track; unknown ids are skipped
    /// (they belong to local tracks).
    pub fn set_mid_mapping(&mut self, mid_to_track_id: &HashMap<String, TrackId>) {
        for (mid, track_id) in mid_to_track_id {
            let Some(track) = self.track_mut(track_id) else {
                continue;
            };
            track.mid = Some(mid.clone());
            self.mids.insert(mid.clone(), track_id.clone());
        }
    }

    /// Media arrived on `mid`: attach the native handle and notify readiness.
    pub fn set_ready(&mut self, mid: &str, stream_id: String, native: NativeTrack) -> Result<()> {
        let track_id = self
            .mids
            .get(mid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("remote track for mid {mid}")))?;
        let track = self
            .track_mut(&track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;

        track.kind = Some(native.kind());
        track.track = Some(native);
        track.stream_id = Some(stream_id);

        debug!(%track_id, mid, "Remote track ready");
        let snapshot = track.clone();
        self.emitter.emit(EndpointEvent::TrackReady(snapshot));
        Ok(())
    }

    pub fn set_track_variant(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
        reason: EncodingReason,
    ) -> Result<()> {
        let track = self
            .track_mut(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        track.encoding = Some(variant);
        track.encoding_reason = Some(reason);

        self.emitter.emit(EndpointEvent::TrackEncodingChanged {
            track_id: track_id.clone(),
            encoding: variant,
            reason,
        });
        Ok(())
    }

    pub fn set_variant_enabled(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
        enabled: bool,
    ) -> Result<()> {
        if self.track(track_id).is_none() {
            return Err(Error::NotFound(format!("track {track_id}")));
        }

        let event = if enabled {
            EndpointEvent::TrackEncodingEnabled {
                track_id: track_id.clone(),
                encoding: variant,
            }
        } else {
            EndpointEvent::TrackEncodingDisabled {
                track_id: track_id.clone(),
                encoding: variant,
            }
        };
        self.emitter.emit(event);
        Ok(())
    }

    pub fn set_vad_status(&mut self, track_id: &TrackId, status: VadStatus) -> Result<()> {
        let track = self
            .track_mut(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        if track.vad_status == status {
            return Ok(());
        }
        track.vad_status = status;

        self.emitter.emit(EndpointEvent::VoiceActivityChanged {
            track_id: track_id.clone(),
            status,
        });
        Ok(())
    }

    #[must_use]
    pub fn track(&self, track_id: &TrackId) -> Option<&RemoteTrack> {
        let owner = self.owners.get(track_id)?;
        self.endpoints.get(owner)?.tracks.get(track_id)
    }

    fn track_mut(&mut self, track_id: &TrackId) -> Option<&mut RemoteTrack> {
        let owner = self.owners.get(track_id)?;
        self.endpoints.get_mut(owner)?.tracks.get_mut(track_id)
    }

    #[must_use]
    pub fn endpoint(&self, endpoint_id: &EndpointId) -> Option<&RemoteEndpoint> {
        self.endpoints.get(endpoint_id)
    }

    #[must_use]
    pub fn tracks(&self) -> HashMap<TrackId, RemoteTrack> {
        self.endpoints
            .values()
            .flat_map(|endpoint| endpoint.tracks.values())
            .map(|track| (track.track_id.clone(), track.clone()))
            .collect()
    }

    #[must_use]
    pub fn endpoints(&self) -> HashMap<EndpointId, RemoteEndpoint> {
        self.endpoints.clone()
    }

    /// Forget everything without notifying; used on disconnect.
    pub fn reset(&mut self) {
        self.endpoints.clear();
        self.owners.clear();
        self.mids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EndpointEvents;
    use serde_json::json;

    #[derive(Debug)]
    struct FakeTrack(&'static str, TrackKind);

    impl crate::transport::MediaStreamTrack for FakeTrack {
        fn id(&self) -> &str {
            self.0
        }

        fn kind(&self) -> TrackKind {
            self.1
        }
    }

    fn store() -> (RemoteTrackStore, EndpointEvents) {
        let emitter = EventEmitter::new();
        let events = emitter.subscribe();
        (RemoteTrackStore::new(emitter), events)
    }

    fn drain(events: &mut EndpointEvents) -> Vec<EndpointEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn announcement(id: &str, tracks: &[&str]) -> EndpointAnnouncement {
        EndpointAnnouncement {
            id: EndpointId::from(id),
            endpoint_type: "webrtc".to_string(),
            metadata: json!({"name": id}),
            tracks: tracks
                .iter()
                .map(|track_id| {
                    (
                        TrackId::from(*track_id),
                        TrackAnnouncement {
                            metadata: json!({"source": "camera"}),
                            simulcast_config: None,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_add_endpoint_announces_tracks_not_ready() {
        let (mut store, mut events) = store();
        store.add_remote_endpoint(announcement("peer", &["peer:a"]));

        let events = drain(&mut events);
        assert!(matches!(events[0], EndpointEvent::EndpointAdded(_)));
        let EndpointEvent::TrackAdded(track) = &events[1] else {
            panic!("expected trackAdded");
        };
        assert!(!track.is_ready());
        assert!(track.track.is_none());
        assert_eq!(store.tracks().len(), 1);
    }

    #[test]
    fn test_remove_endpoint_cascades_before_endpoint_notification() {
        let (mut store, mut events) = store();
        store.add_remote_endpoint(announcement("peer", &["peer:a", "peer:b"]));
        drain(&mut events);

        store.remove_remote_endpoint(&EndpointId::from("peer")).unwrap();

        let events = drain(&mut events);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], EndpointEvent::TrackRemoved(_)));
        assert!(matches!(events[1], EndpointEvent::TrackRemoved(_)));
        assert!(matches!(events[2], EndpointEvent::EndpointRemoved(_)));
        assert!(store.tracks().is_empty());
        assert!(store.track(&TrackId::from("peer:a")).is_none());
    }

    #[test]
    fn test_metadata_parse_failure_is_stored() {
        let (mut store, mut events) = store();
        store.set_track_parser(Arc::new(|raw: &Value| {
            raw.get("source")
                .cloned()
                .ok_or_else(|| "missing source".to_string())
        }));
        store.add_remote_endpoint(announcement("peer", &["peer:a"]));
        drain(&mut events);

        store
            .update_remote_track(&EndpointId::from("peer"), &TrackId::from("peer:a"), json!({"x": 1}))
            .unwrap();

        let track = store.track(&TrackId::from("peer:a")).unwrap();
        assert!(track.metadata.is_none());
        assert_eq!(track.metadata_parsing_error.as_deref(), Some("missing source"));
        assert_eq!(track.raw_metadata, json!({"x": 1}));
        assert!(matches!(drain(&mut events)[0], EndpointEvent::TrackUpdated(_)));

        // A later valid update clears the error
        store
            .update_remote_track(
                &EndpointId::from("peer"),
                &TrackId::from("peer:a"),
                json!({"source": "screen"}),
            )
            .unwrap();
        let track = store.track(&TrackId::from("peer:a")).unwrap();
        assert_eq!(track.metadata, Some(json!("screen")));
        assert!(track.metadata_parsing_error.is_none());
    }

    #[test]
    fn test_set_ready_by_mid() {
        let (mut store, mut events) = store();
        store.add_remote_endpoint(announcement("peer", &["peer:a"]));
        store.set_mid_mapping(&HashMap::from([
            ("1".to_string(), TrackId::from("peer:a")),
            ("0".to_string(), TrackId::from("me:local")),
        ]));
        drain(&mut events);

        assert!(store
            .set_ready("0", "stream".to_string(), Arc::new(FakeTrack("x", TrackKind::Audio)))
            .is_err());

        store
            .set_ready("1", "stream".to_string(), Arc::new(FakeTrack("native", TrackKind::Video)))
            .unwrap();

        let track = store.track(&TrackId::from("peer:a")).unwrap();
        assert!(track.is_ready());
        assert_eq!(track.kind, Some(TrackKind::Video));
        assert_eq!(track.mid.as_deref(), Some("1"));
        assert!(matches!(drain(&mut events)[0], EndpointEvent::TrackReady(_)));
    }

    #[test]
    fn test_vad_only_notifies_on_change() {
        let (mut store, mut events) = store();
        store.add_remote_endpoint(announcement("peer", &["peer:a"]));
        drain(&mut events);

        let track_id = TrackId::from("peer:a");
        store.set_vad_status(&track_id, VadStatus::Speech).unwrap();
        store.set_vad_status(&track_id, VadStatus::Speech).unwrap();
        assert_eq!(drain(&mut events).len(), 1);
        assert!(store.set_vad_status(&TrackId::from("nope"), VadStatus::Speech).is_err());
    }

    #[test]
    fn test_unknown_endpoint_operations_fail() {
        let (mut store, _events) = store();
        let ghost = EndpointId::from("ghost");
        assert!(matches!(
            store.add_tracks(&ghost, HashMap::new()),
            Err(Error::NotFound(_))
        ));
        assert!(store.remove_remote_endpoint(&ghost).is_err());
        assert!(store.update_remote_endpoint(&ghost, json!({})).is_err());
    }
}
