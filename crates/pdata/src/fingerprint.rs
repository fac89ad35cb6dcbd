// SPDX-License-Identifier: Apache-2.0

//! Series fingerprints.
//!
//! A fingerprint identifies a time series: a metric name plus the semantic
//! content of an attribute set. Attribute order must not influence the
//! fingerprint, so keys are sorted before hashing. The hash is xxh3-64;
//! fingerprints are identities, not security tokens.

use crate::point::AttributeSet;
use xxhash_rust::xxh3::Xxh3;

/// Separator between hashed fields. Attribute keys and metric names never
/// contain NUL, which keeps the encoding prefix-free.
const FIELD_SEP: u8 = 0;

/// Computes the fingerprint of a series.
///
/// When `keys` is `Some`, the attribute set is projected onto those keys
/// (absent keys contribute nothing); when `None`, every attribute
/// participates.
#[must_use]
pub fn series_fingerprint(
    metric_name: &str,
    attributes: &AttributeSet,
    keys: Option<&[String]>,
) -> u64 {
    let mut pairs: Vec<(&str, String)> = attributes
        .iter()
        .filter(|kv| match keys {
            Some(keys) => keys.iter().any(|k| k == &kv.key),
            None => true,
        })
        .map(|kv| (kv.key.as_str(), kv.value.to_string()))
        .collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Xxh3::new();
    hasher.update(metric_name.as_bytes());
    hasher.update(&[FIELD_SEP]);
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(&[FIELD_SEP]);
        hasher.update(value.as_bytes());
        hasher.update(&[FIELD_SEP]);
    }
    hasher.digest()
}

/// Computes the fingerprint of a series whose identity spans the resource
/// attributes and the point attributes.
///
/// Both sets are projected and key-sorted independently; a resource key and
/// an equally named point key are distinct identity contributors.
#[must_use]
pub fn series_fingerprint2(
    metric_name: &str,
    resource: &AttributeSet,
    attributes: &AttributeSet,
    keys: Option<&[String]>,
) -> u64 {
    let resource_hash = series_fingerprint("", resource, keys);
    let point_hash = series_fingerprint(metric_name, attributes, keys);
    let mut hasher = Xxh3::new();
    hasher.update(&resource_hash.to_le_bytes());
    hasher.update(&point_hash.to_le_bytes());
    hasher.digest()
}
