//! The variant value type

use std::{collections::BTreeMap, fmt};

use forge_matrix_types::{NormalizedKey, Pin};
use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{IgnoredAny, MapAccess, Visitor},
    ser::SerializeMap,
};
use serde_untagged::UntaggedEnumVisitor;

use crate::selectors::quote_numeric_scalars;

/// The reserved key holding the zip groups.
pub const ZIP_KEYS: &str = "zip_keys";
/// The reserved key holding the per-package pin overrides.
pub const PIN_RUN_AS_BUILD: &str = "pin_run_as_build";
/// The key of the migration directive block in migration files.
pub const MIGRATOR_KEY: &str = "__migrator";
/// The key of the migration timestamp in migration files.
pub const MIGRATOR_TS_KEY: &str = "migrator_ts";

/// A variant: a mapping from build dimension to its ordered candidate values.
///
/// ```yaml
/// python:
///   - 3.9.* *_cpython
///   - 3.10.* *_cpython
/// numpy:
///   - "1.22"
///   - "1.22"
/// zip_keys:
///   - [python, numpy]
/// pin_run_as_build:
///   python:
///     min_pin: x.x
///     max_pin: x.x
/// ```
///
/// The two reserved keys are kept in their own typed fields so that every
/// merge has to handle them explicitly. Ordinary values are always strings,
/// `1.10` and `1.1` are different values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    /// Groups of keys whose sequences are read at the same index.
    pub zip_keys: Option<Vec<Vec<NormalizedKey>>>,

    /// Pin overrides, keyed by package name.
    pub pin_run_as_build: Option<IndexMap<String, Pin>>,

    /// The ordinary keys and their candidate values.
    pub values: BTreeMap<NormalizedKey, Vec<String>>,
}

/// One entry of a [`Variant`], viewed through its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariantEntry<'a> {
    /// An ordinary key with its candidate values
    Values(&'a [String]),
    /// The `zip_keys` groups, keys as written
    ZipKeys(Vec<Vec<&'a str>>),
    /// The `pin_run_as_build` map
    PinRunAsBuild(&'a IndexMap<String, Pin>),
}

impl Variant {
    /// Create a new, empty variant
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a variant from a YAML string without evaluating selectors.
    /// Unquoted numbers are kept as written.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(&quote_numeric_scalars(yaml))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
    }

    /// Serialize to a YAML string with sorted keys
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Insert or replace the values of an ordinary key
    pub fn insert(&mut self, key: impl Into<NormalizedKey>, values: Vec<String>) {
        self.values.insert(key.into(), values);
    }

    /// Get the values of an ordinary key
    pub fn get(&self, key: &NormalizedKey) -> Option<&Vec<String>> {
        self.values.get(key)
    }

    /// Whether the ordinary key exists
    pub fn contains_key(&self, key: &NormalizedKey) -> bool {
        self.values.contains_key(key)
    }

    /// All ordinary keys
    pub fn keys(&self) -> impl Iterator<Item = &NormalizedKey> {
        self.values.keys()
    }

    /// The zip groups (empty when the variant has none)
    pub fn zip_groups(&self) -> &[Vec<NormalizedKey>] {
        self.zip_keys.as_deref().unwrap_or(&[])
    }

    /// All entries, ordinary and reserved, sorted by key. Keys are spelled
    /// as they were first written.
    pub fn entries(&self) -> Vec<(&str, VariantEntry<'_>)> {
        let mut entries = self
            .values
            .iter()
            .map(|(key, values)| (key.as_str(), VariantEntry::Values(values)))
            .collect::<Vec<_>>();
        if let Some(zip_keys) = &self.zip_keys {
            let groups = zip_keys
                .iter()
                .map(|group| group.iter().map(NormalizedKey::as_str).collect())
                .collect();
            entries.push((ZIP_KEYS, VariantEntry::ZipKeys(groups)));
        }
        if let Some(pins) = &self.pin_run_as_build {
            entries.push((PIN_RUN_AS_BUILD, VariantEntry::PinRunAsBuild(pins)));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }
}

impl Serialize for Variant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries = self.entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, entry) in entries {
            map.serialize_entry(&key, &entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VariantVisitor;

        impl<'de> Visitor<'de> for VariantVisitor {
            type Value = Variant;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping from variant keys to lists of values")
            }

            fn visit_unit<E>(self) -> Result<Variant, E> {
                Ok(Variant::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Variant, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut variant = Variant::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        ZIP_KEYS => {
                            let zip_keys: Option<ZipKeys> = map.next_value()?;
                            variant.zip_keys = zip_keys.map(|z| z.0);
                        }
                        PIN_RUN_AS_BUILD => {
                            let pins: Option<IndexMap<String, Pin>> = map.next_value()?;
                            variant.pin_run_as_build = pins;
                        }
                        // the migration side channel is read by `Migration`
                        MIGRATOR_KEY | MIGRATOR_TS_KEY => {
                            map.next_value::<IgnoredAny>()?;
                        }
                        _ => {
                            let values: ScalarList = map.next_value()?;
                            // empty keys are trimmed
                            if !values.0.is_empty() {
                                variant.values.insert(key.into(), values.0);
                            }
                        }
                    }
                }
                Ok(variant)
            }
        }

        deserializer.deserialize_any(VariantVisitor)
    }
}

/// Render a float the way it was most likely written (`3.0` stays `3.0`).
fn float_to_string(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains(['.', 'e', 'E']) {
        format!("{s}.0")
    } else {
        s
    }
}

/// A single scalar value of a variant, always held as a string.
pub(crate) struct Scalar(pub(crate) String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        UntaggedEnumVisitor::new()
            .string(|s| Ok(Scalar(s.to_owned())))
            .bool(|b| Ok(Scalar(b.to_string())))
            .i64(|n| Ok(Scalar(n.to_string())))
            .u64(|n| Ok(Scalar(n.to_string())))
            .f64(|n| Ok(Scalar(float_to_string(n))))
            .deserialize(deserializer)
    }
}

/// The values of an ordinary key: a list of scalars, a single scalar (treated
/// as a one-element list) or null (no values).
pub(crate) struct ScalarList(pub(crate) Vec<String>);

impl<'de> Deserialize<'de> for ScalarList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        UntaggedEnumVisitor::new()
            .string(|s| Ok(ScalarList(vec![s.to_owned()])))
            .bool(|b| Ok(ScalarList(vec![b.to_string()])))
            .i64(|n| Ok(ScalarList(vec![n.to_string()])))
            .u64(|n| Ok(ScalarList(vec![n.to_string()])))
            .f64(|n| Ok(ScalarList(vec![float_to_string(n)])))
            .unit(|| Ok(ScalarList(Vec::new())))
            .seq(|seq| {
                let values: Vec<Scalar> = seq.deserialize()?;
                Ok(ScalarList(values.into_iter().map(|s| s.0).collect()))
            })
            .deserialize(deserializer)
    }
}

/// `zip_keys` as written: a list of lists, or a flat list meaning one group.
struct ZipKeys(Vec<Vec<NormalizedKey>>);

enum ZipKeysItem {
    Key(NormalizedKey),
    Group(Vec<NormalizedKey>),
}

impl<'de> Deserialize<'de> for ZipKeysItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        UntaggedEnumVisitor::new()
            .string(|s| Ok(ZipKeysItem::Key(s.into())))
            .seq(|seq| {
                let keys: Vec<String> = seq.deserialize()?;
                Ok(ZipKeysItem::Group(keys.into_iter().map(Into::into).collect()))
            })
            .deserialize(deserializer)
    }
}

impl<'de> Deserialize<'de> for ZipKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = Vec::<ZipKeysItem>::deserialize(deserializer)?;
        if items.iter().all(|item| matches!(item, ZipKeysItem::Key(_))) {
            let group = items
                .into_iter()
                .filter_map(|item| match item {
                    ZipKeysItem::Key(key) => Some(key),
                    ZipKeysItem::Group(_) => None,
                })
                .collect::<Vec<_>>();
            return Ok(ZipKeys(if group.is_empty() {
                Vec::new()
            } else {
                vec![group]
            }));
        }

        items
            .into_iter()
            .map(|item| match item {
                ZipKeysItem::Group(group) => Ok(group),
                ZipKeysItem::Key(key) => Err(serde::de::Error::custom(format!(
                    "zip_keys must be a list of lists, found the bare key '{}'",
                    key.as_str()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ZipKeys)
    }
}
