use serde::{Deserialize, Serialize};

/// How strictly a run dependency has to match the version it was built
/// against (an entry of `pin_run_as_build`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Pin {
    /// The maximum pin (a string like "x.x.x").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pin: Option<String>,
    /// The minimum pin (a string like "x.x.x").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pin: Option<String>,
}

impl Pin {
    /// The number of version segments the pin constrains. `x.x.x` is stricter
    /// than `x.x`, which is stricter than `x`. The max pin dominates, the min
    /// pin breaks ties.
    pub fn strictness(&self) -> (usize, usize) {
        fn segments(pin: &Option<String>) -> usize {
            pin.as_deref()
                .map(|p| p.split('.').filter(|s| !s.is_empty()).count())
                .unwrap_or(0)
        }
        (segments(&self.max_pin), segments(&self.min_pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pin(max_pin: Option<&str>, min_pin: Option<&str>) -> Pin {
        Pin {
            max_pin: max_pin.map(str::to_string),
            min_pin: min_pin.map(str::to_string),
        }
    }

    #[rstest]
    #[case(pin(Some("x.x.x"), None), pin(Some("x.x"), None))]
    #[case(pin(Some("x.x"), Some("x.x")), pin(Some("x.x"), None))]
    #[case(pin(Some("x"), None), Pin::default())]
    fn test_strictness(#[case] stricter: Pin, #[case] looser: Pin) {
        assert!(stricter.strictness() > looser.strictness());
    }

    #[test]
    fn test_roundtrip_skips_missing_fields() {
        let parsed: Pin = serde_yaml::from_str("max_pin: x.x").unwrap();
        assert_eq!(parsed, pin(Some("x.x"), None));
        assert_eq!(serde_yaml::to_string(&parsed).unwrap(), "max_pin: x.x\n");
    }
}
