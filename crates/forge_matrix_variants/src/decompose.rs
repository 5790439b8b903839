//! Decomposition of a reduced variant into one config per CI job.

use std::{cmp::Reverse, collections::BTreeSet};

use forge_matrix_types::{NormalizedKey, Pin};
use indexmap::IndexMap;
use itertools::Itertools;
use rattler_conda_types::Platform;
use sha2::{Digest, Sha256};

use crate::{error::DecomposeError, reduce::TARGET_PLATFORM, variant::Variant};

/// Names of this length or longer get a short name.
const SHORT_NAME_THRESHOLD: usize = 49;
/// The number of characters of the name kept in the short name.
const SHORT_NAME_PREFIX: usize = 35;
/// CI systems store a marker file named after the config, its name has to
/// stay below this length.
const MAX_DONE_MARKER_LENGTH: usize = 250;
const DONE_MARKER_PREFIX: &str = "conda-forge-build-done-";

/// One concrete CI job configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    /// The name derived from the top-level values
    pub name: String,
    /// `name`, or a prefix of it plus a hash when it is too long
    pub short_name: String,
    /// The variant of this job. Top-level keys have a single value.
    pub variant: Variant,
}

impl ConfigEntry {
    /// The stem of the file the config is written to.
    pub fn file_stem(&self) -> &str {
        if DONE_MARKER_PREFIX.len() + self.name.len() >= MAX_DONE_MARKER_LENGTH {
            &self.short_name
        } else {
            &self.name
        }
    }
}

/// One dimension the matrix is split on: a single key, or a zip group whose
/// members are split together.
#[derive(Debug, Clone)]
struct Axis {
    keys: Vec<NormalizedKey>,
    rows: Vec<Vec<String>>,
}

impl Axis {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn at(&self, index: usize) -> Option<Vec<(NormalizedKey, String)>> {
        let row = self.rows.get(index)?;
        Some(self.keys.iter().cloned().zip(row.iter().cloned()).collect())
    }
}

/// Recursively compute all combinations of the axes
fn find_combinations(
    axes: &[Axis],
    index: usize,
    current: &mut Vec<(NormalizedKey, String)>,
    result: &mut Vec<Vec<(NormalizedKey, String)>>,
) {
    if index == axes.len() {
        result.push(current.clone());
        return;
    }

    for i in 0..axes[index].len() {
        if let Some(items) = axes[index].at(i) {
            let count = items.len();
            current.extend(items);
            find_combinations(axes, index + 1, current, result);
            current.truncate(current.len() - count);
        }
    }
}

/// The rows of a zip group, sorted. Members missing from the variant are
/// skipped, the others need sequences of the same length.
fn zip_rows(
    variant: &Variant,
    group: &[NormalizedKey],
    assigned: &BTreeSet<NormalizedKey>,
) -> Result<Axis, DecomposeError> {
    let members = group
        .iter()
        .filter(|key| !assigned.contains(*key))
        .filter_map(|key| variant.values.get_key_value(key))
        .collect::<Vec<_>>();

    let length = members.first().map_or(0, |(_, values)| values.len());
    if members.iter().any(|(_, values)| values.len() != length) {
        return Err(DecomposeError::InvalidZipKeyLength(
            members
                .iter()
                .map(|(key, values)| format!("{key} ({})", values.len()))
                .join(", "),
        ));
    }

    let mut rows = (0..length)
        .map(|i| {
            members
                .iter()
                .map(|(_, values)| values[i].clone())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    rows.sort();

    Ok(Axis {
        keys: members.into_iter().map(|(key, _)| key.clone()).collect(),
        rows,
    })
}

/// Sort pins by package name, stricter pins first.
fn sorted_pins(pins: &IndexMap<String, Pin>) -> IndexMap<String, Pin> {
    let mut pins = pins.clone();
    pins.sort_by_cached_key(|package, pin| {
        (
            NormalizedKey::from(package.as_str()),
            Reverse(pin.strictness()),
        )
    });
    pins
}

/// The part of a config name that identifies its top-level values.
///
/// `key + value` of every top-level key in sorted order, followed by the
/// target platform if it is not `subdir`. `*` and spaces are replaced by `_`.
pub fn package_key(
    config: &Variant,
    top_level: &BTreeSet<NormalizedKey>,
    subdir: &str,
) -> String {
    let target_platform = NormalizedKey::from(TARGET_PLATFORM);
    let mut key = top_level
        .iter()
        .filter(|key| **key != target_platform)
        .filter_map(|key| {
            let value = config.get(key)?.first()?;
            Some(format!("{key}{value}"))
        })
        .collect::<String>();

    if let Some(tp) = config.get(&target_platform).and_then(|v| v.first())
        && tp != subdir
    {
        key.push_str(TARGET_PLATFORM);
        key.push_str(tp);
    }

    key.replace(['*', ' '], "_")
}

/// Shorten a config name to a prefix plus the first ten hex digits of its
/// SHA-256, if it is too long.
pub fn shorten_name(name: &str) -> String {
    if name.chars().count() < SHORT_NAME_THRESHOLD {
        return name.to_string();
    }
    let hash = hex::encode(Sha256::digest(name.as_bytes()));
    format!(
        "{}_h{}",
        name.chars().take(SHORT_NAME_PREFIX).collect::<String>(),
        &hash[..10]
    )
}

/// Split a reduced variant into one config per combination of the top-level
/// values.
///
/// Every zip group with a top-level member is one axis, its rows split
/// together. Every other top-level key is an axis of its own. All remaining
/// keys keep their full (sorted) sequence in every config. The configs are
/// returned sorted by name, names are prefixed with `platform`.
pub fn decompose(
    reduced: &Variant,
    top_level: &BTreeSet<NormalizedKey>,
    platform: Platform,
) -> Result<Vec<ConfigEntry>, DecomposeError> {
    let mut axes = Vec::new();
    let mut assigned = BTreeSet::new();
    let mut residual = Variant {
        zip_keys: reduced.zip_keys.clone(),
        pin_run_as_build: reduced.pin_run_as_build.as_ref().map(sorted_pins),
        ..Default::default()
    };

    for group in reduced.zip_groups() {
        let axis = zip_rows(reduced, group, &assigned)?;
        assigned.extend(axis.keys.iter().cloned());
        if axis.keys.iter().any(|key| top_level.contains(key)) {
            axes.push(axis);
        } else {
            for (i, key) in axis.keys.iter().enumerate() {
                let column = axis.rows.iter().map(|row| row[i].clone()).collect();
                residual.values.insert(key.clone(), column);
            }
        }
    }

    for (key, values) in &reduced.values {
        if assigned.contains(key) {
            continue;
        }
        if top_level.contains(key) {
            axes.push(Axis {
                keys: vec![key.clone()],
                rows: values.iter().map(|value| vec![value.clone()]).collect(),
            });
        } else {
            let mut values = values.clone();
            values.sort();
            residual.values.insert(key.clone(), values);
        }
    }

    let mut combinations = Vec::new();
    find_combinations(&axes, 0, &mut Vec::new(), &mut combinations);

    let subdir = platform.to_string();
    let mut entries = combinations
        .into_iter()
        .map(|combination| {
            let mut variant = residual.clone();
            for (key, value) in combination {
                variant.values.insert(key, vec![value]);
            }
            let name = format!(
                "{}_{}",
                subdir.replace('-', "_"),
                package_key(&variant, top_level, &subdir)
            );
            ConfigEntry {
                short_name: shorten_name(&name),
                name,
                variant,
            }
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(
        "Split the matrix for {subdir} on {} into {} configs",
        top_level.iter().join(", "),
        entries.len()
    );
    Ok(entries)
}
