//! Reduction of the variable usage of all outputs of a recipe into one
//! minimal variant.

use std::collections::{BTreeMap, BTreeSet};

use forge_matrix_types::NormalizedKey;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;

use crate::variant::Variant;

/// The key holding the platform a config builds for.
pub const TARGET_PLATFORM: &str = "target_platform";

/// Keys that are kept in the reduced variant even when no output uses them.
pub const ALWAYS_KEEP_KEYS: &[&str] = &[
    "MACOSX_DEPLOYMENT_TARGET",
    "MACOSX_SDK_VERSION",
    "macos_min_version",
    "macos_machine",
    "channel_sources",
    "channel_targets",
    "docker_image",
    "build_number_decrement",
    "BUILD",
    "cdt_arch",
];

/// What one rendered output of a recipe used from the variant it was
/// rendered with.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputUsage {
    /// The variables the output depends on
    #[serde(default)]
    pub used_vars: BTreeSet<NormalizedKey>,

    /// The values the output was rendered with
    #[serde(default)]
    pub used_variant: Variant,

    /// Whether the output is `noarch`
    #[serde(default, rename = "noarch")]
    pub is_noarch: bool,
}

/// Keys with more than one distinct value.
fn loop_vars(variant: &Variant) -> BTreeSet<NormalizedKey> {
    variant
        .values
        .iter()
        .filter(|(_, values)| values.iter().unique().count() > 1)
        .map(|(key, _)| key.clone())
        .collect()
}

/// The rows of `members` that the outputs used, in the order of the input.
///
/// A row is one index of the input sequences of `members`. When no output
/// reports any of the members all input rows are used. Otherwise a row is
/// used when some output reports the same values for the members it reports.
/// Rows that outputs report in full but that are not part of the input are
/// appended.
fn used_rows(
    members: &[NormalizedKey],
    input_variants: &Variant,
    outputs: &[OutputUsage],
) -> Vec<Vec<String>> {
    let input_rows = match members
        .iter()
        .map(|key| input_variants.get(key))
        .collect::<Option<Vec<_>>>()
    {
        Some(columns) => {
            let length = columns.iter().map(|c| c.len()).min().unwrap_or(0);
            if columns.iter().any(|c| c.len() != length) {
                tracing::warn!(
                    "Zipped keys {} have different lengths, using the first {length} values",
                    members.iter().join(", ")
                );
            }
            (0..length)
                .map(|i| columns.iter().map(|c| c[i].clone()).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        }
        None => Vec::new(),
    };

    let reports = outputs
        .iter()
        .map(|output| {
            members
                .iter()
                .map(|key| output.used_variant.get(key).and_then(|v| v.first()))
                .collect::<Vec<_>>()
        })
        .filter(|report| report.iter().any(Option::is_some))
        .collect::<Vec<_>>();

    if reports.is_empty() {
        return input_rows.into_iter().unique().collect();
    }

    let mut rows = input_rows
        .into_iter()
        .filter(|row| reports.iter().any(|report| row_matches(row, report)))
        .collect::<Vec<_>>();
    for report in &reports {
        let complete = report
            .iter()
            .map(|value| value.cloned())
            .collect::<Option<Vec<_>>>();
        if let Some(row) = complete
            && !rows.contains(&row)
        {
            rows.push(row);
        }
    }
    rows.into_iter().unique().collect()
}

/// Whether `row` has the reported value wherever the report has one.
fn row_matches(row: &[String], report: &[Option<&String>]) -> bool {
    row.iter()
        .zip(report)
        .all(|(value, reported)| (*reported).is_none_or(|r| r == value))
}

/// Turn rows into one sequence per member.
fn columns(rows: Vec<Vec<String>>, width: usize) -> Vec<Vec<String>> {
    let mut columns = vec![Vec::with_capacity(rows.len()); width];
    for row in rows {
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }
    columns
}

/// Collapse the variable usage of all outputs into one variant.
///
/// Returns the reduced variant and the top-level loop variables: the keys
/// that vary in `input_variants` and are used by at least one output, plus
/// `target_platform` when an output uses it. Those are the keys the matrix
/// is split on, one CI job per combination.
///
/// The reduced variant holds the used keys, the [`ALWAYS_KEEP_KEYS`] and
/// `target_platform` (unless every output is noarch). Values follow the
/// order of `input_variants` and are restricted to the values the outputs
/// report. Zip groups are reduced together, so the rows of a group stay
/// aligned. `zip_keys` and `pin_run_as_build` are trimmed to the keys that
/// are left.
pub fn reduce_outputs(
    outputs: &[OutputUsage],
    input_variants: &Variant,
) -> (Variant, BTreeSet<NormalizedKey>) {
    let target_platform = NormalizedKey::from(TARGET_PLATFORM);
    let loop_vars = loop_vars(input_variants);

    let all_used = outputs
        .iter()
        .flat_map(|output| output.used_vars.iter().cloned())
        .collect::<BTreeSet<_>>();

    let mut top_level = all_used
        .intersection(&loop_vars)
        .cloned()
        .collect::<BTreeSet<_>>();
    if all_used.contains(&target_platform) {
        top_level.insert(target_platform.clone());
    }

    let mut keep = all_used;
    keep.extend(ALWAYS_KEEP_KEYS.iter().map(|key| NormalizedKey::from(*key)));
    if outputs.iter().any(|output| !output.is_noarch) {
        keep.insert(target_platform);
    }
    keep.extend(top_level.iter().cloned());

    let mut values = BTreeMap::<NormalizedKey, Vec<String>>::new();
    let mut handled = BTreeSet::<NormalizedKey>::new();

    for group in input_variants.zip_groups() {
        let members = group
            .iter()
            .filter(|key| {
                keep.contains(*key) && input_variants.contains_key(*key) && !handled.contains(*key)
            })
            .unique()
            .cloned()
            .collect::<Vec<_>>();
        if members.is_empty() {
            continue;
        }
        let rows = used_rows(&members, input_variants, outputs);
        for (key, column) in members.iter().zip(columns(rows, members.len())) {
            values.insert(key.clone(), column);
        }
        handled.extend(members);
    }

    for key in keep.iter().filter(|key| !handled.contains(*key)) {
        let rows = used_rows(std::slice::from_ref(key), input_variants, outputs);
        if let Some(column) = columns(rows, 1).pop()
            && !column.is_empty()
        {
            values.insert(key.clone(), column);
        }
    }

    let zip_keys = input_variants
        .zip_groups()
        .iter()
        .map(|group| {
            group
                .iter()
                .filter(|key| values.contains_key(*key))
                .unique()
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|group| group.len() >= 2)
        .collect::<Vec<_>>();

    let pin_run_as_build = input_variants
        .pin_run_as_build
        .as_ref()
        .map(|pins| {
            pins.iter()
                .filter(|(package, _)| values.contains_key(&NormalizedKey::from(package.as_str())))
                .map(|(package, pin)| (package.clone(), pin.clone()))
                .collect::<IndexMap<_, _>>()
        })
        .filter(|pins| !pins.is_empty());

    let reduced = Variant {
        zip_keys: (!zip_keys.is_empty()).then_some(zip_keys),
        pin_run_as_build,
        values,
    };
    (reduced, top_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INPUT: &str = r#"
python: ['3.9.* *_cpython', '3.10.* *_cpython', '3.11.* *_cpython']
numpy: ['1.22', '1.22', '1.23']
c_compiler: [gcc]
docker_image: [quay.io/condaforge/linux-anvil-cos7-x86_64]
target_platform: [linux-64]
libboost_devel: ['1.82']
unused: [a, b]
zip_keys:
  - [python, numpy]
pin_run_as_build:
  python: {min_pin: x.x, max_pin: x.x}
  libboost-devel: {max_pin: x.x}
  unused: {max_pin: x}
"#;

    fn output(used_vars: &[&str], used_variant: &str) -> OutputUsage {
        OutputUsage {
            used_vars: used_vars.iter().map(|v| NormalizedKey::from(*v)).collect(),
            used_variant: Variant::from_yaml_str(used_variant).unwrap(),
            is_noarch: false,
        }
    }

    fn key_names(keys: impl IntoIterator<Item = NormalizedKey>) -> Vec<String> {
        keys.into_iter().map(|k| k.normalize()).collect()
    }

    #[test]
    fn test_reduce_python_recipe() {
        let input = Variant::from_yaml_str(INPUT).unwrap();
        let used = ["python", "numpy", "c_compiler", "target_platform", "libboost-devel"];
        let outputs = [
            output(&used, "python: '3.9.* *_cpython'\nnumpy: '1.22'\nc_compiler: gcc"),
            output(&used, "python: '3.10.* *_cpython'\nnumpy: '1.22'\nc_compiler: gcc"),
            output(&used, "python: '3.11.* *_cpython'\nnumpy: '1.23'\nc_compiler: gcc"),
        ];

        let (reduced, top_level) = reduce_outputs(&outputs, &input);

        assert_eq!(
            key_names(top_level),
            ["numpy", "python", "target_platform"]
        );
        assert_eq!(
            key_names(reduced.keys().cloned()),
            [
                "c_compiler",
                "docker_image",
                "libboost_devel",
                "numpy",
                "python",
                "target_platform"
            ]
        );
        assert_eq!(
            reduced.get(&"python".into()).unwrap(),
            &["3.9.* *_cpython", "3.10.* *_cpython", "3.11.* *_cpython"]
        );
        assert_eq!(
            reduced.get(&"numpy".into()).unwrap(),
            &["1.22", "1.22", "1.23"]
        );
        assert_eq!(reduced.zip_groups().len(), 1);

        let pins = reduced.pin_run_as_build.as_ref().unwrap();
        assert_eq!(
            pins.keys().collect::<Vec<_>>(),
            ["python", "libboost-devel"]
        );
    }

    #[test]
    fn test_reported_values_restrict_the_input() {
        let input = Variant::from_yaml_str(INPUT).unwrap();
        let used = ["python", "numpy"];
        // the recipe skips python 3.9
        let outputs = [
            output(&used, "python: '3.10.* *_cpython'\nnumpy: '1.22'"),
            output(&used, "python: '3.11.* *_cpython'\nnumpy: '1.23'"),
        ];

        let (reduced, _) = reduce_outputs(&outputs, &input);
        assert_eq!(
            reduced.get(&"python".into()).unwrap(),
            &["3.10.* *_cpython", "3.11.* *_cpython"]
        );
        assert_eq!(reduced.get(&"numpy".into()).unwrap(), &["1.22", "1.23"]);
    }

    #[test]
    fn test_zip_group_trimmed_to_used_members() {
        let input = Variant::from_yaml_str(INPUT).unwrap();
        let outputs = [
            output(&["python"], "python: '3.9.* *_cpython'"),
            output(&["python"], "python: '3.10.* *_cpython'"),
            output(&["python"], "python: '3.11.* *_cpython'"),
        ];

        let (reduced, top_level) = reduce_outputs(&outputs, &input);
        assert_eq!(key_names(top_level), ["python"]);
        assert!(!reduced.contains_key(&"numpy".into()));
        assert!(reduced.zip_keys.is_none());
        assert_eq!(
            reduced.pin_run_as_build.as_ref().unwrap().keys().collect::<Vec<_>>(),
            ["python"]
        );
    }

    #[test]
    fn test_values_only_reported_by_outputs() {
        let input = Variant::from_yaml_str("target_platform: [linux-64]").unwrap();
        let used = ["cuda_compiler_version"];
        let outputs = [
            output(&used, "cuda_compiler_version: 'None'"),
            output(&used, "cuda_compiler_version: '12.0'"),
            output(&used, "cuda_compiler_version: 'None'"),
        ];

        let (reduced, top_level) = reduce_outputs(&outputs, &input);
        assert_eq!(
            reduced.get(&"cuda_compiler_version".into()).unwrap(),
            &["None", "12.0"]
        );
        // not a loop variable of the input
        assert!(top_level.is_empty());
    }

    #[test]
    fn test_duplicates_are_removed() {
        let input = Variant::from_yaml_str("openssl: ['3', '3', '1.1.1']").unwrap();
        let outputs = [output(&["openssl"], "")];

        let (reduced, top_level) = reduce_outputs(&outputs, &input);
        assert_eq!(reduced.get(&"openssl".into()).unwrap(), &["3", "1.1.1"]);
        assert_eq!(key_names(top_level), ["openssl"]);
    }

    #[test]
    fn test_noarch_drops_target_platform() {
        let input = Variant::from_yaml_str(INPUT).unwrap();
        let outputs = [OutputUsage {
            is_noarch: true,
            ..Default::default()
        }];

        let (reduced, top_level) = reduce_outputs(&outputs, &input);
        assert!(top_level.is_empty());
        assert_eq!(key_names(reduced.keys().cloned()), ["docker_image"]);
        assert!(reduced.pin_run_as_build.is_none());
    }

    #[test]
    fn test_deserialize_output_usage() {
        let usage: OutputUsage = serde_yaml::from_str(
            "used_vars: [python, target_platform]\nused_variant:\n  python: '3.10'\nnoarch: true\n",
        )
        .unwrap();
        assert!(usage.is_noarch);
        assert_eq!(key_names(usage.used_vars), ["python", "target_platform"]);
        assert_eq!(usage.used_variant.get(&"python".into()).unwrap(), &["3.10"]);
    }
}
