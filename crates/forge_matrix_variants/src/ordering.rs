//! Per-key orderings used to compare variant values.
//!
//! By default values are compared as conda versions. A migration can replace
//! that with an explicit list for a key (e.g. to prefer `gcc` over
//! `toolchain`, or to downgrade `jpeg`).

use std::{cmp::Ordering, collections::BTreeMap, str::FromStr};

use forge_matrix_types::NormalizedKey;
use rattler_conda_types::{ParseVersionError, Version};

use crate::error::VariantAlgebraError;

/// The ordering of the values of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrdering<'a> {
    /// Conda version ordering, falling back to plain string comparison for
    /// values that are not versions
    Version,
    /// The position in an explicit list, lowest first
    Explicit(&'a [String]),
}

/// Parse a variant value as a conda version.
///
/// Spaces and `*` are common in variant values (`3.9.* *_cpython`); they are
/// mapped onto version separators and a number before parsing.
pub fn parse_version_value(value: &str) -> Result<Version, ParseVersionError> {
    Version::from_str(&value.replace(' ', ".").replace('*', "1"))
}

/// Compare two values as conda versions.
pub fn version_cmp(a: &str, b: &str) -> Result<Ordering, ParseVersionError> {
    Ok(parse_version_value(a)?.cmp(&parse_version_value(b)?))
}

impl<'a> ValueOrdering<'a> {
    /// The ordering a migration defines for `key`, or version ordering.
    pub fn for_key(
        orderings: &'a BTreeMap<NormalizedKey, Vec<String>>,
        key: &NormalizedKey,
    ) -> Self {
        match orderings.get(key) {
            Some(order) => ValueOrdering::Explicit(order),
            None => ValueOrdering::Version,
        }
    }

    fn position(
        order: &[String],
        key: &NormalizedKey,
        value: &str,
    ) -> Result<usize, VariantAlgebraError> {
        order
            .iter()
            .position(|v| v == value)
            .ok_or_else(|| VariantAlgebraError::MissingOrdering {
                key: key.normalize(),
                value: value.to_string(),
            })
    }

    /// Compare two values of `key`.
    pub fn compare(
        &self,
        key: &NormalizedKey,
        a: &str,
        b: &str,
    ) -> Result<Ordering, VariantAlgebraError> {
        match self {
            ValueOrdering::Explicit(order) => {
                Ok(Self::position(order, key, a)?.cmp(&Self::position(order, key, b)?))
            }
            ValueOrdering::Version => Ok(version_cmp(a, b).unwrap_or_else(|err| {
                tracing::debug!(
                    "Comparing '{a}' and '{b}' of '{key}' as strings, they are not versions: {err}"
                );
                a.cmp(b)
            })),
        }
    }

    /// The larger of two values. Ties keep the left value.
    pub fn max<'v>(
        &self,
        key: &NormalizedKey,
        left: &'v str,
        right: &'v str,
    ) -> Result<&'v str, VariantAlgebraError> {
        Ok(match self.compare(key, left, right)? {
            Ordering::Less => right,
            Ordering::Equal | Ordering::Greater => left,
        })
    }

    /// Stable sort of `items` by the value each of them carries.
    ///
    /// With version ordering the whole list is sorted as versions when every
    /// value parses, and as strings otherwise. This keeps the sort a total
    /// order even when only some of the values are versions.
    pub fn sort_by_value<T>(
        &self,
        key: &NormalizedKey,
        items: &mut [T],
        value: impl Fn(&T) -> &str,
    ) -> Result<(), VariantAlgebraError> {
        match self {
            ValueOrdering::Explicit(order) => {
                for item in items.iter() {
                    Self::position(order, key, value(item))?;
                }
                items.sort_by_key(|item| order.iter().position(|v| v == value(item)));
            }
            ValueOrdering::Version => {
                if let Some(err) = items
                    .iter()
                    .find_map(|item| parse_version_value(value(item)).err())
                {
                    tracing::debug!("Sorting the values of '{key}' as strings: {err}");
                    items.sort_by(|a, b| value(a).cmp(value(b)));
                } else {
                    items.sort_by_cached_key(|item| parse_version_value(value(item)).ok());
                }
            }
        }
        Ok(())
    }
}
