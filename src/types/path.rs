//! Dataref path parsing.
//!
//! Consumers address simulator variables by dotted path, optionally with a
//! trailing `[index]` suffix selecting one element of an array dataref,
//! e.g. `sim/cockpit2/switches/panel_brightness_ratio[2]`.

use std::fmt;

use crate::error::{Result, XplinkError};

/// A parsed dataref path: base name plus an optional array element index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatarefPath {
    /// Path without any index suffix, e.g. `sim/some/values`.
    pub base: String,
    /// Selected array element, if the path carried an `[index]` suffix.
    pub index: Option<usize>,
}

impl DatarefPath {
    /// Parse a consumer-supplied path string.
    ///
    /// Malformed paths (empty base, unbalanced brackets, non-numeric index)
    /// are programming errors and fail fast with [`XplinkError::InvalidPath`].
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |details: &str| XplinkError::InvalidPath {
            path: path.to_string(),
            details: details.to_string(),
        };

        match path.find('[') {
            None => {
                if path.is_empty() {
                    return Err(invalid("empty path"));
                }
                if path.contains(']') {
                    return Err(invalid("']' without matching '['"));
                }
                Ok(Self { base: path.to_string(), index: None })
            }
            Some(open) => {
                if open == 0 {
                    return Err(invalid("empty base before '['"));
                }
                let Some(close) = path.rfind(']') else {
                    return Err(invalid("'[' without matching ']'"));
                };
                if close != path.len() - 1 || close <= open {
                    return Err(invalid("index suffix must terminate the path"));
                }
                let index = path[open + 1..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index is not a non-negative integer"))?;
                Ok(Self { base: path[..open].to_string(), index: Some(index) })
            }
        }
    }

    /// Full consumer-visible name, index suffix included.
    pub fn full_name(&self) -> String {
        self.to_string()
    }

    /// Whether this path selects a single element of an array.
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Display for DatarefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.base, i),
            None => write!(f, "{}", self.base),
        }
    }
}

/// Format `base[index]` without going through a parsed path.
pub fn element_name(base: &str, index: usize) -> String {
    format!("{base}[{index}]")
}
