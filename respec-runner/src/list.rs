// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The list of spec files to run.
//!
//! Discovery itself (globbing, directory walks) happens upstream; this module
//! is the boundary where an ordered set of paths becomes the runner's input.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;

/// A single spec file known to the runner.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SpecFile {
    path: Utf8PathBuf,
}

impl SpecFile {
    /// The path to the file, as provided by the caller.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// An ordered, deduplicated list of spec files.
#[derive(Clone, Debug)]
pub struct SpecList {
    files: Vec<SpecFile>,
}

impl SpecList {
    /// Creates a new list from the given paths.
    ///
    /// Duplicates are removed; the first occurrence's position wins.
    pub fn new(paths: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let files = paths
            .into_iter()
            .filter(|path| seen.insert(path.clone()))
            .map(|path| SpecFile { path })
            .collect();
        Self { files }
    }

    /// The number of files that will be run.
    pub fn run_count(&self) -> usize {
        self.files.len()
    }

    /// Returns true if there are no files to run.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates over the files in run order.
    pub fn iter(&self) -> impl Iterator<Item = &SpecFile> + '_ {
        self.files.iter()
    }

    /// The width to pad file labels to for aligned output.
    pub fn label_width(&self) -> usize {
        self.files
            .iter()
            .map(|file| file.path.as_str().len())
            .max()
            .unwrap_or(0)
    }
}
