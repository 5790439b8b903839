//! # forge_matrix_variants
//!
//! Variant algebra and build-matrix generation for conda-forge style
//! feedstocks.
//!
//! A feedstock's build matrix starts from the global pinning, a variant file
//! that lists candidate values for every build dimension. Migrations are
//! added on top of it in timestamp order ([`sequencer`]) with the merge rules
//! of [`algebra`]. The combined variant is then reduced to the keys the
//! recipe's outputs actually use ([`reduce`]) and split into one config per
//! CI job ([`decompose`]).
//!
//! ## Example
//!
//! ```rust
//! use forge_matrix_variants::{Migration, Variant, variant_add};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pinning = Variant::from_yaml_str(
//!     r#"
//! libpng:
//!   - "1.6"
//! zlib:
//!   - "1.2"
//! "#,
//! )?;
//! let migration = Migration::from_yaml_str(
//!     r#"
//! migrator_ts: 1700000000
//! libpng:
//!   - "1.7"
//! "#,
//! )?;
//!
//! let combined = variant_add(&pinning, &migration)?;
//! assert_eq!(combined.get(&"libpng".into()).unwrap(), &["1.7"]);
//! assert_eq!(combined.get(&"zlib".into()).unwrap(), &["1.2"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Variant files
//!
//! Variant files are YAML mappings from key to a list of candidate values.
//! Values are kept as strings exactly as written. Lines can carry a
//! conda-build selector (`# [osx and arm64]`) which is evaluated against a
//! [`SelectorConfig`] before the document is parsed.

pub mod algebra;
pub mod decompose;
pub mod error;
pub mod migration;
pub mod ordering;
pub mod reduce;
pub mod selectors;
pub mod sequencer;
pub mod variant;

pub use algebra::{merge_pin_run_as_build, merge_zip_keys, variant_add, variant_key_add};
pub use decompose::{ConfigEntry, decompose, package_key, shorten_name};
pub use error::{DecomposeError, MigrationError, VariantAlgebraError, VariantParseError};
pub use forge_matrix_types::{NormalizedKey, Pin};
pub use migration::{
    Migration, MigrationDirective, MigrationHeader, Operation, load_migration_file,
    load_variant_file, parse_migration, parse_variant,
};
pub use ordering::ValueOrdering;
pub use reduce::{ALWAYS_KEEP_KEYS, OutputUsage, TARGET_PLATFORM, reduce_outputs};
pub use selectors::{SelectorConfig, quote_numeric_scalars, select_lines};
pub use sequencer::{
    MigrationOrigin, MigrationSelection, MigrationSource, combine_spec, fold_migrations,
    load_migrations, upstream_migrations_dir,
};
pub use variant::Variant;
