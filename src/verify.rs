use regex::bytes::Regex;

use crate::error::ScenarioError;

/// Checks that `captured` starts with `banner`, byte for byte.
///
/// Only the first `banner.len()` bytes are compared; anything after them (the line
/// terminator, further output) is ignored.
pub fn banner_prefix(captured: &[u8], banner: &str) -> Result<(), ScenarioError> {
    let needle = banner.as_bytes();
    if captured.len() < needle.len() {
        return Err(ScenarioError::TooShort {
            observed: captured.len(),
            expected: needle.len(),
        });
    }
    let prefix = &captured[..needle.len()];
    if prefix != needle {
        return Err(ScenarioError::Mismatch {
            expected: banner.to_string(),
            actual: String::from_utf8_lossy(prefix).into_owned(),
        });
    }
    Ok(())
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

/// Tracks two markers line by line until each has followed the other at least once.
///
/// A line mentioning both counts as the first marker only.
#[derive(Debug)]
pub struct Alternation<'a> {
    first: &'a [u8],
    second: &'a [u8],
    consumed: usize,
    got_first: bool,
    got_second: bool,
    first_then_second: bool,
    second_then_first: bool,
}

impl<'a> Alternation<'a> {
    pub fn new(first: &'a str, second: &'a str) -> Self {
        Alternation {
            first: first.as_bytes(),
            second: second.as_bytes(),
            consumed: 0,
            got_first: false,
            got_second: false,
            first_then_second: false,
            second_then_first: false,
        }
    }

    /// Feeds the whole output seen so far; only complete lines not yet looked at are
    /// examined. Returns whether both orders have been observed.
    pub fn feed(&mut self, output: &[u8]) -> bool {
        while let Some(end) = output[self.consumed..].iter().position(|&b| b == b'\n') {
            let line = &output[self.consumed..self.consumed + end];
            self.consumed += end + 1;
            if contains(line, self.first) {
                self.got_first = true;
                self.second_then_first |= self.got_second;
            } else if contains(line, self.second) {
                self.got_second = true;
                self.first_then_second |= self.got_first;
            }
        }
        self.done()
    }

    pub fn done(&self) -> bool {
        self.first_then_second && self.second_then_first
    }
}

pub fn compile_pattern(pattern: &str) -> Result<Regex, ScenarioError> {
    Regex::new(pattern).map_err(|source| ScenarioError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
