// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Display helpers shared across the crate.

use std::{fmt, time::Duration};

pub(crate) mod plural {
    pub(crate) fn files_str(count: usize) -> &'static str {
        if count == 1 {
            "file"
        } else {
            "files"
        }
    }

    pub(crate) fn cases_str(count: usize) -> &'static str {
        if count == 1 {
            "case"
        } else {
            "cases"
        }
    }
}

/// Formats a duration as seconds in brackets, right-aligned, e.g.
/// `[   0.052s]`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DisplayBracketedDuration(pub(crate) Duration);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>8.3}s]", self.0.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plural_forms() {
        assert_eq!(plural::files_str(1), "file");
        assert_eq!(plural::files_str(0), "files");
        assert_eq!(plural::cases_str(2), "cases");
    }

    #[test]
    fn bracketed_duration() {
        let d = DisplayBracketedDuration(Duration::from_millis(52));
        assert_eq!(d.to_string(), "[   0.052s]");
    }
}
