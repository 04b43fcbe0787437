use serde::Deserialize;

/// A raw tag value as reported by the data-access gateway.
///
/// Gateways are loose about value shapes: booleans, integers, floats and
/// decimal strings all occur for the same register type depending on the
/// server. The enum closes that surface at the wire boundary; everything
/// downstream works with the normalized `f64`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Boolean coil/discrete value.
    Bool(bool),
    /// Integral register value.
    Integer(i64),
    /// Floating-point register value.
    Float(f64),
    /// String-typed value, possibly a number in decimal notation.
    Text(String),
    /// Reported as null/empty by the server.
    Null,
}

/// Converts a raw tag value into its canonical numeric form.
///
/// Returns `None` when the value cannot be represented numerically; such
/// readings are skipped for the cycle, never turned into an error.
///
/// String handling: integer literals (optional leading `-`, all remaining
/// characters digits) are parsed as integers first so WORD registers
/// reported as decimal strings round-trip exactly, then widened to `f64`.
/// Anything else falls back to a float parse.
pub fn normalize(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        RawValue::Integer(n) => Some(*n as f64),
        RawValue::Float(f) => Some(*f),
        RawValue::Text(s) => {
            let s = s.trim();
            if is_integer_literal(s) {
                if let Ok(n) = s.parse::<i64>() {
                    return Some(n as f64);
                }
            }
            s.parse::<f64>().ok()
        }
        RawValue::Null => None,
    }
}

/// True for an optional `-` followed by one or more ASCII digits.
fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_maps_to_unit_floats() {
        assert_eq!(normalize(&RawValue::Bool(true)), Some(1.0));
        assert_eq!(normalize(&RawValue::Bool(false)), Some(0.0));
    }

    #[test]
    fn test_numeric_passthrough() {
        assert_eq!(normalize(&RawValue::Integer(42)), Some(42.0));
        assert_eq!(normalize(&RawValue::Integer(-7)), Some(-7.0));
        assert_eq!(normalize(&RawValue::Float(3.25)), Some(3.25));
    }

    #[test]
    fn test_integer_strings_widen_exactly() {
        assert_eq!(normalize(&RawValue::Text("17".to_string())), Some(17.0));
        assert_eq!(normalize(&RawValue::Text("-100".to_string())), Some(-100.0));
        assert_eq!(normalize(&RawValue::Text("  65535 ".to_string())), Some(65535.0));
    }

    #[test]
    fn test_float_strings_parse() {
        assert_eq!(normalize(&RawValue::Text("21.5".to_string())), Some(21.5));
        assert_eq!(normalize(&RawValue::Text("-0.25".to_string())), Some(-0.25));
    }

    #[test]
    fn test_unparsable_strings_are_absent() {
        assert_eq!(normalize(&RawValue::Text("running".to_string())), None);
        assert_eq!(normalize(&RawValue::Text(String::new())), None);
        assert_eq!(normalize(&RawValue::Text("--5".to_string())), None);
    }

    #[test]
    fn test_null_is_absent() {
        assert_eq!(normalize(&RawValue::Null), None);
    }

    #[test]
    fn test_huge_integer_literal_falls_back_to_float() {
        // Exceeds i64 but still a valid float.
        let v = normalize(&RawValue::Text("99999999999999999999".to_string()));
        assert!(v.is_some());
    }

    #[test]
    fn test_untagged_deserialization() {
        assert_eq!(
            serde_json::from_str::<RawValue>("true").expect("bool"),
            RawValue::Bool(true),
        );
        assert_eq!(
            serde_json::from_str::<RawValue>("5").expect("int"),
            RawValue::Integer(5),
        );
        assert_eq!(
            serde_json::from_str::<RawValue>("5.5").expect("float"),
            RawValue::Float(5.5),
        );
        assert_eq!(
            serde_json::from_str::<RawValue>("\"12\"").expect("text"),
            RawValue::Text("12".to_string()),
        );
        assert_eq!(
            serde_json::from_str::<RawValue>("null").expect("null"),
            RawValue::Null,
        );
    }
}
