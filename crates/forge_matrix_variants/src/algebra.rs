//! Addition of variants.
//!
//! [`variant_add`] merges a migration into a base variant. Without an
//! operation every key present on both sides is merged elementwise, keeping
//! the larger value at each index. `key_add` and `key_remove` migrations
//! instead insert or remove values of one key while keeping the keys zipped
//! with it aligned.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

use forge_matrix_types::{NormalizedKey, Pin};
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{
    error::VariantAlgebraError,
    migration::{Migration, MigrationDirective, Operation},
    ordering::ValueOrdering,
    variant::Variant,
};

/// Add a migration to a base variant.
///
/// Keys only present on one side pass through. `zip_keys` and
/// `pin_run_as_build` are merged by [`merge_zip_keys`] and
/// [`merge_pin_run_as_build`]; every other joint key by
/// [`variant_key_add`]. A directive with an `operation` hands the whole
/// addition over to that operation.
///
/// The addition is not commutative. Migrations have to be added in their
/// timestamp order.
pub fn variant_add(
    base: &Variant,
    migration: &Migration,
) -> Result<Variant, VariantAlgebraError> {
    let no_ordering = BTreeMap::new();
    let orderings = match &migration.directive {
        Some(directive) => {
            if let Some(operation) = &directive.operation {
                return apply_operation(base, &migration.variant, directive, operation);
            }
            &directive.ordering
        }
        None => &no_ordering,
    };

    let other = &migration.variant;
    let mut values = BTreeMap::new();
    for (key, left) in &base.values {
        let merged = match other.values.get(key) {
            Some(right) => {
                variant_key_add(key, left, right, ValueOrdering::for_key(orderings, key))?
            }
            None => left.clone(),
        };
        values.insert(key.clone(), merged);
    }
    for (key, right) in &other.values {
        if !values.contains_key(key) {
            values.insert(key.clone(), right.clone());
        }
    }

    let zip_keys = match (&base.zip_keys, &other.zip_keys) {
        (Some(left), Some(right)) => Some(merge_zip_keys(left, right)),
        (left, right) => left.clone().or_else(|| right.clone()),
    };

    let pin_run_as_build = match (&base.pin_run_as_build, &other.pin_run_as_build) {
        (Some(left), Some(right)) => Some(merge_pin_run_as_build(left, right)),
        (left, right) => left.clone().or_else(|| right.clone()),
    };

    Ok(Variant {
        zip_keys,
        pin_run_as_build,
        values,
    })
}

fn apply_operation(
    base: &Variant,
    migration: &Variant,
    directive: &MigrationDirective,
    operation: &str,
) -> Result<Variant, VariantAlgebraError> {
    let operation = Operation::from_str(operation).map_err(|_| {
        VariantAlgebraError::UnsupportedMigration(format!("unknown operation '{operation}'"))
    })?;
    let primary_key = directive.primary_key.as_ref().ok_or_else(|| {
        VariantAlgebraError::UnsupportedMigration(format!("{operation} without a primary_key"))
    })?;

    match operation {
        Operation::KeyAdd => key_add(base, migration, directive, primary_key),
        Operation::KeyRemove => key_remove(base, migration, directive, primary_key),
    }
}

/// Merge the values of one key: the larger value at every shared index,
/// followed by the tail of the longer sequence.
pub fn variant_key_add(
    key: &NormalizedKey,
    left: &[String],
    right: &[String],
    ordering: ValueOrdering<'_>,
) -> Result<Vec<String>, VariantAlgebraError> {
    let mut merged = left
        .iter()
        .zip(right)
        .map(|(l, r)| ordering.max(key, l, r).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    let common_length = merged.len();
    // at most one of the two tails is non-empty
    merged.extend(left.iter().skip(common_length).cloned());
    merged.extend(right.iter().skip(common_length).cloned());
    Ok(merged)
}

/// Deduplicated key sets, longest first.
fn keysets(groups: &[Vec<NormalizedKey>]) -> Vec<BTreeSet<NormalizedKey>> {
    let mut sets: Vec<BTreeSet<NormalizedKey>> = Vec::new();
    for group in groups {
        let set = group.iter().cloned().collect::<BTreeSet<_>>();
        if !sets.contains(&set) {
            sets.push(set);
        }
    }
    sets.sort_by_cached_key(|set| (Reverse(set.len()), group_repr(set)));
    sets
}

/// `['a', 'b']`, the representation groups are sorted by.
fn group_repr<'a>(group: impl IntoIterator<Item = &'a NormalizedKey>) -> String {
    format!(
        "[{}]",
        group
            .into_iter()
            .map(|key| format!("'{}'", key.normalize()))
            .join(", ")
    )
}

/// Merge two `zip_keys` lists.
///
/// Groups are compared as sets. Starting with the longest, every group of
/// `right` is paired with the first group of `left` that is a subset or a
/// superset of it, and the larger of the two is kept. Unpaired groups of
/// both sides are kept as they are. The result is sorted by group size,
/// then by the group's string form.
pub fn merge_zip_keys(
    left: &[Vec<NormalizedKey>],
    right: &[Vec<NormalizedKey>],
) -> Vec<Vec<NormalizedKey>> {
    let mut left = keysets(left);
    let mut right = keysets(right);
    let mut merged = Vec::new();

    let mut i = 0;
    while i < right.len() {
        let paired = left
            .iter()
            .position(|l| l.is_subset(&right[i]) || l.is_superset(&right[i]));
        match paired {
            Some(j) => {
                let l = left.remove(j);
                let r = right.remove(i);
                merged.push(if l.len() > r.len() { l } else { r });
            }
            None => i += 1,
        }
    }
    merged.extend(left);
    merged.extend(right);

    let mut groups = merged
        .into_iter()
        .map(|set| set.into_iter().collect::<Vec<_>>())
        .collect::<Vec<_>>();
    groups.sort_by_cached_key(|group| (group.len(), group_repr(group)));
    groups
}

/// Merge two `pin_run_as_build` maps. A package pinned on both sides takes
/// the right pin in full.
pub fn merge_pin_run_as_build(
    left: &IndexMap<String, Pin>,
    right: &IndexMap<String, Pin>,
) -> IndexMap<String, Pin> {
    let mut merged = left.clone();
    for (package, pin) in right {
        merged.insert(package.clone(), pin.clone());
    }
    merged
}

/// The zip groups containing `key`, with `key` itself removed.
fn zipped_with(variant: &Variant, key: &NormalizedKey) -> Vec<NormalizedKey> {
    variant
        .zip_groups()
        .iter()
        .filter(|group| group.contains(key))
        .flatten()
        .filter(|k| *k != key)
        .unique()
        .cloned()
        .collect()
}

/// Reorder the values of a zipped key after its primary key changed.
/// `old_indices[i]` is the index in `old` of the value that goes to index `i`.
fn reproject(
    old: &[String],
    old_indices: &[Option<usize>],
    key: &NormalizedKey,
    primary_key: &NormalizedKey,
) -> Result<Vec<Option<String>>, VariantAlgebraError> {
    old_indices
        .iter()
        .map(|index| match index {
            Some(index) => old.get(*index).cloned().map(Some).ok_or_else(|| {
                VariantAlgebraError::MissingZipValue {
                    key: key.normalize(),
                    primary_key: primary_key.normalize(),
                }
            }),
            None => Ok(None),
        })
        .collect()
}

fn key_add(
    base: &Variant,
    migration: &Variant,
    directive: &MigrationDirective,
    primary_key: &NormalizedKey,
) -> Result<Variant, VariantAlgebraError> {
    let Some(new_values) = migration.get(primary_key) else {
        return Ok(base.clone());
    };
    let Some(current) = base.get(primary_key) else {
        return Err(VariantAlgebraError::UnsupportedMigration(format!(
            "key_add targets '{primary_key}' which is not part of the base variant"
        )));
    };
    if new_values.iter().all(|value| current.contains(value)) {
        return Ok(base.clone());
    }

    let mut result = base.clone();
    let defaults = zip_additional_keys(&mut result, primary_key, &directive.additional_zip_keys)?;

    for (index, value) in new_values.iter().enumerate() {
        insert_value(
            &mut result,
            migration,
            directive,
            primary_key,
            (index, value),
            &defaults,
        )?;
    }
    Ok(result)
}

/// Zip `additional_zip_keys` with the primary key.
///
/// Returns the default values of the keys that were not zipped with the
/// primary key before. Their values are broadcast to the length of the
/// primary key.
fn zip_additional_keys(
    result: &mut Variant,
    primary_key: &NormalizedKey,
    additional_zip_keys: &[NormalizedKey],
) -> Result<BTreeMap<NormalizedKey, String>, VariantAlgebraError> {
    if additional_zip_keys.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut newly_zipped = Vec::new();
    let zip_keys = result.zip_keys.get_or_insert_with(Vec::new);
    match zip_keys.iter_mut().find(|group| group.contains(primary_key)) {
        Some(group) => {
            for key in additional_zip_keys {
                if !group.contains(key) {
                    group.push(key.clone());
                    newly_zipped.push(key.clone());
                }
            }
        }
        None => {
            let mut group = vec![primary_key.clone()];
            for key in additional_zip_keys {
                if !group.contains(key) {
                    group.push(key.clone());
                    newly_zipped.push(key.clone());
                }
            }
            zip_keys.push(group);
        }
    }

    let primary_length = result.get(primary_key).map_or(0, Vec::len);
    let mut defaults = BTreeMap::new();
    for key in newly_zipped {
        let default = result
            .get(&key)
            .and_then(|values| values.first())
            .cloned()
            .ok_or_else(|| VariantAlgebraError::MigrationTargetMissing(key.normalize()))?;
        result.insert(key.clone(), vec![default.clone(); primary_length]);
        defaults.insert(key, default);
    }
    Ok(defaults)
}

/// Insert one value into the primary key at the position its ordering
/// dictates, and the matching values into every key zipped with it.
fn insert_value(
    result: &mut Variant,
    migration: &Variant,
    directive: &MigrationDirective,
    primary_key: &NormalizedKey,
    (index, value): (usize, &String),
    defaults: &BTreeMap<NormalizedKey, String>,
) -> Result<(), VariantAlgebraError> {
    let current = result.get(primary_key).cloned().unwrap_or_default();
    if current.contains(value) {
        return Ok(());
    }

    let order = directive.ordering.get(primary_key).ok_or_else(|| {
        VariantAlgebraError::MissingOrdering {
            key: primary_key.normalize(),
            value: value.clone(),
        }
    })?;

    let mut entries = current
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, v)| (Some(i), v))
        .chain([(None, value.clone())])
        .collect::<Vec<_>>();
    ValueOrdering::Explicit(order).sort_by_value(primary_key, &mut entries, |entry| {
        entry.1.as_str()
    })?;
    let old_indices = entries.iter().map(|(i, _)| *i).collect::<Vec<_>>();

    for key in zipped_with(result, primary_key) {
        let old = result
            .get(&key)
            .ok_or_else(|| VariantAlgebraError::MigrationTargetMissing(key.normalize()))?;
        if old.len() != current.len() {
            return Err(VariantAlgebraError::MissingZipValue {
                key: key.normalize(),
                primary_key: primary_key.normalize(),
            });
        }

        let new_value = migration
            .get(&key)
            .and_then(|values| values.get(index))
            .or_else(|| defaults.get(&key))
            .ok_or_else(|| VariantAlgebraError::MissingZipValue {
                key: key.normalize(),
                primary_key: primary_key.normalize(),
            })?;

        let projected = reproject(old, &old_indices, &key, primary_key)?
            .into_iter()
            .map(|v| v.unwrap_or_else(|| new_value.clone()))
            .collect();
        result.insert(key, projected);
    }

    result.insert(
        primary_key.clone(),
        entries.into_iter().map(|(_, v)| v).collect(),
    );
    Ok(())
}

fn key_remove(
    base: &Variant,
    migration: &Variant,
    directive: &MigrationDirective,
    primary_key: &NormalizedKey,
) -> Result<Variant, VariantAlgebraError> {
    let Some(removed_values) = migration.get(primary_key) else {
        return Ok(base.clone());
    };
    if !base.contains_key(primary_key) {
        return Err(VariantAlgebraError::MigrationTargetMissing(
            primary_key.normalize(),
        ));
    }

    let mut result = base.clone();
    for value in removed_values {
        remove_value(&mut result, directive, primary_key, value)?;
    }
    Ok(result)
}

/// Remove a value from the primary key and the matching entries from every
/// key zipped with it. The remaining values are sorted by the ordering of
/// the primary key.
fn remove_value(
    result: &mut Variant,
    directive: &MigrationDirective,
    primary_key: &NormalizedKey,
    value: &str,
) -> Result<(), VariantAlgebraError> {
    let current = result.get(primary_key).cloned().unwrap_or_default();
    if !current.iter().any(|v| v == value) {
        return Ok(());
    }

    let mut entries = current
        .iter()
        .cloned()
        .enumerate()
        .filter(|(_, v)| v != value)
        .collect::<Vec<_>>();
    ValueOrdering::for_key(&directive.ordering, primary_key).sort_by_value(
        primary_key,
        &mut entries,
        |entry| entry.1.as_str(),
    )?;
    let old_indices = entries.iter().map(|(i, _)| Some(*i)).collect::<Vec<_>>();

    for key in zipped_with(result, primary_key) {
        let old = result
            .get(&key)
            .ok_or_else(|| VariantAlgebraError::MigrationTargetMissing(key.normalize()))?;
        if old.len() != current.len() {
            return Err(VariantAlgebraError::MissingZipValue {
                key: key.normalize(),
                primary_key: primary_key.normalize(),
            });
        }
        let projected = reproject(old, &old_indices, &key, primary_key)?
            .into_iter()
            .flatten()
            .collect();
        result.insert(key, projected);
    }

    result.insert(
        primary_key.clone(),
        entries.into_iter().map(|(_, v)| v).collect(),
    );
    Ok(())
}
