//! Send encodings and bandwidth distribution
//!
//! Limits are expressed in kbps by callers and sent in bps (x1024) to both the
//! native sender and the server.

use std::collections::BTreeMap;

use crate::config::BitrateConfig;
use crate::transport::EncodingParameters;
use crate::types::{SimulcastConfig, TrackBandwidthLimit, TrackBitrates, TrackKind, TrackVariant};

const KBPS: u64 = 1024;

/// Split a whole-track limit across simulcast variants.
///
/// Each variant gets a share proportional to its pixel count relative to the
/// first (smallest) variant, i.e. `(scale_first / scale)^2`. Returns bps.
#[must_use]
pub fn split_bandwidth(limit_kbps: u64, variants: &[TrackVariant]) -> BTreeMap<TrackVariant, u64> {
    let Some(first) = variants.first() else {
        return BTreeMap::new();
    };
    if limit_kbps == 0 {
        return BTreeMap::new();
    }

    let first_scale = first.scale_resolution_down_by();
    let weight = |variant: &TrackVariant| (first_scale / variant.scale_resolution_down_by()).powi(2);
    let parts: f64 = variants.iter().map(weight).sum();
    let unit = limit_kbps.saturating_mul(KBPS) as f64 / parts;

    variants
        .iter()
        .map(|variant| (*variant, (unit * weight(variant)).round() as u64))
        .collect()
}

fn active_variants(simulcast: &SimulcastConfig) -> Vec<TrackVariant> {
    TrackVariant::ALL
        .into_iter()
        .filter(|variant| simulcast.is_active(*variant))
        .collect()
}

/// Per-variant bps limits of a simulcast track; variants without a limit are absent.
fn variant_limits(simulcast: &SimulcastConfig, limit: &TrackBandwidthLimit) -> BTreeMap<TrackVariant, u64> {
    match limit {
        TrackBandwidthLimit::Single(kbps) => split_bandwidth(*kbps, &active_variants(simulcast)),
        TrackBandwidthLimit::Simulcast(limits) => limits
            .iter()
            .filter(|(_, kbps)| **kbps > 0)
            .map(|(variant, kbps)| (*variant, kbps.saturating_mul(KBPS)))
            .collect(),
    }
}

/// Encodings the sender of a local track should use
#[must_use]
pub fn send_encodings(
    simulcast: Option<&SimulcastConfig>,
    limit: &TrackBandwidthLimit,
) -> Vec<EncodingParameters> {
    match simulcast.filter(|config| config.enabled) {
        Some(config) => {
            let limits = variant_limits(config, limit);
            TrackVariant::ALL
                .into_iter()
                .map(|variant| EncodingParameters {
                    rid: Some(variant.rid().to_string()),
                    active: config.is_active(variant),
                    max_bitrate: limits.get(&variant).copied(),
                    scale_resolution_down_by: Some(variant.scale_resolution_down_by()),
                })
                .collect()
        }
        None => {
            let max_bitrate = match limit {
                TrackBandwidthLimit::Single(kbps) if *kbps > 0 => Some(kbps.saturating_mul(KBPS)),
                _ => None,
            };
            vec![EncodingParameters {
                rid: None,
                active: true,
                max_bitrate,
                scale_resolution_down_by: None,
            }]
        }
    }
}

/// Bitrates reported to the server, falling back to configured defaults
#[must_use]
pub fn track_bitrates(
    kind: TrackKind,
    simulcast: Option<&SimulcastConfig>,
    limit: &TrackBandwidthLimit,
    defaults: &BitrateConfig,
) -> TrackBitrates {
    match simulcast.filter(|config| config.enabled) {
        Some(config) => {
            let limits = variant_limits(config, limit);
            TrackBitrates::Simulcast(
                active_variants(config)
                    .into_iter()
                    .map(|variant| {
                        let bitrate = limits
                            .get(&variant)
                            .copied()
                            .unwrap_or_else(|| defaults.for_variant(variant));
                        (variant, bitrate)
                    })
                    .collect(),
            )
        }
        None => match limit {
            TrackBandwidthLimit::Single(kbps) if *kbps > 0 => {
                TrackBitrates::Single(kbps.saturating_mul(KBPS))
            }
            _ => TrackBitrates::Single(defaults.for_kind(kind)),
        },
    }
}
