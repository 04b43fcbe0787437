use std::collections::HashMap;

/// Last emitted value and last seen quality for a single tag.
#[derive(Debug, Clone)]
struct TagState {
    last_value: f64,
    last_quality: String,
}

/// Per-tag change suppression.
///
/// Holds the last emitted value and last seen quality for every tag and
/// decides whether a new reading is significant enough to produce a point.
/// The decision is a single map lookup per tag.
///
/// State is confined to the poll task (one reader, one writer), so a plain
/// `HashMap` is sufficient.
pub struct ChangeFilter {
    tolerance: f64,
    states: HashMap<String, TagState>,
}

impl ChangeFilter {
    /// Creates a filter with the configured minimum absolute delta.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            states: HashMap::new(),
        }
    }

    /// Decides whether a reading should be emitted.
    ///
    /// - Absent values never emit; a differing quality is still recorded so
    ///   quality drift survives without flooding the sink.
    /// - The first representable observation of a tag always emits.
    /// - Otherwise a reading emits when the delta from the last *emitted*
    ///   value reaches the tolerance, or the quality changed (compared
    ///   case-normalized). A tolerance of zero means exact comparison: any
    ///   observed difference emits, an identical value does not.
    ///
    /// On emit, both stored fields are overwritten.
    pub fn decide(&mut self, tag: &str, value: Option<f64>, quality: &str) -> bool {
        let Some(value) = value else {
            if let Some(state) = self.states.get_mut(tag) {
                if !state.last_quality.eq_ignore_ascii_case(quality) {
                    state.last_quality = quality.to_string();
                }
            }
            return false;
        };

        match self.states.get_mut(tag) {
            None => {
                self.states.insert(
                    tag.to_string(),
                    TagState {
                        last_value: value,
                        last_quality: quality.to_string(),
                    },
                );
                true
            }
            Some(state) => {
                let value_changed = if self.tolerance == 0.0 {
                    value != state.last_value
                } else {
                    (value - state.last_value).abs() >= self.tolerance
                };

                let changed = value_changed || !state.last_quality.eq_ignore_ascii_case(quality);

                if changed {
                    state.last_value = value;
                    state.last_quality = quality.to_string();
                }

                changed
            }
        }
    }

    /// Number of tags with recorded state.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

/// Maps a source quality string to the stored quality field.
///
/// A quality is "good" iff it case-insensitively starts with `good`
/// (e.g. "Good", "Good, non-specific"); everything else is bad.
pub fn quality_is_good(quality: &str) -> bool {
    quality.to_ascii_lowercase().starts_with("good")
}
