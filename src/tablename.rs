// Kvzoo: replicated, hierarchically-namespaced transactional key-value store.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2025 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2025 LNP/BP Standards Association. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use crate::Error;

/// Maximum number of `/`-separated segments a [`TableName`] may carry.
pub const MAX_SEGMENTS: usize = 11;

/// A validated hierarchical table path, e.g. `/app/users/sessions`.
///
/// Construction is the only point of validation; once built, a `TableName`
/// is trusted by every downstream component.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableName {
    path: String,
    segments: Vec<String>,
}

impl TableName {
    /// Parses a path string into a [`TableName`].
    ///
    /// Rejects: empty strings, strings not starting with `/`, strings
    /// ending in `/`, consecutive slashes, and paths with more than
    /// [`MAX_SEGMENTS`] segments.
    pub fn parse(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(Error::invalid_table_name(path));
        }
        if path.len() > 1 && path.ends_with('/') {
            return Err(Error::invalid_table_name(path));
        }
        if path.contains("//") {
            return Err(Error::invalid_table_name(path));
        }
        let segments: Vec<String> =
            path.split('/').skip(1).map(str::to_owned).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(Error::invalid_table_name(path));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(Error::invalid_table_name(path));
        }
        Ok(Self { path, segments })
    }

    /// The ordered list of path segments, excluding the leading `/`.
    pub fn segments(&self) -> &[String] { &self.segments }

    /// The name obtained by removing the last segment.
    ///
    /// Errors when called on a single-segment name, since a root has no
    /// parent table.
    pub fn parent(&self) -> Result<Self, Error> {
        if self.segments.len() <= 1 {
            return Err(Error::invalid_table_name(format!("{} has no parent", self.path)));
        }
        let parent_path = format!("/{}", self.segments[..self.segments.len() - 1].join("/"));
        Self::parse(parent_path)
    }

    /// Whether `self` is a strict prefix of `other`'s segment list, i.e.
    /// `other` lives underneath `self` in the bucket tree.
    pub fn is_parent(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// The canonical key used to store this name in the metadata index and
    /// to name the underlying `redb` table. Joins segments with `\0`, a byte
    /// that sorts below every legal path character, so lexicographic order
    /// on this key coincides with segment-lexicographic order.
    pub fn storage_key(&self) -> String { self.segments.join("\0") }

    pub fn as_str(&self) -> &str { &self.path }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.path) }
}

impl TryFrom<&str> for TableName {
    type Error = Error;

    fn try_from(path: &str) -> Result<Self, Error> { Self::parse(path) }
}

impl TryFrom<String> for TableName {
    type Error = Error;

    fn try_from(path: String) -> Result<Self, Error> { Self::parse(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_unparse_round_trip() {
        for path in ["/a", "/a/b", "/a/b/c/d/e/f/g/h/i/j/k"] {
            let tn = TableName::parse(path).expect("valid path");
            assert_eq!(tn.to_string(), path);
        }
    }

    #[test]
    fn parse_rejects_invalid_paths() {
        for path in ["xxx", "/", "/x//", "/x/", "/1/2/3/4/5/6/7/8/9/10/11/12", ""] {
            assert!(TableName::parse(path).is_err(), "expected {path:?} to be rejected");
        }
    }

    #[test]
    fn parent_and_is_parent() {
        let child = TableName::parse("/a/b/c").unwrap();
        let parent = child.parent().unwrap();
        assert_eq!(parent.as_str(), "/a/b");
        assert!(parent.is_parent(&child));
        assert!(!child.is_parent(&parent));

        let root = TableName::parse("/a").unwrap();
        assert!(root.parent().is_err());
    }

    #[test]
    fn storage_key_orders_like_segments() {
        let a = TableName::parse("/a").unwrap();
        let ab = TableName::parse("/a/b").unwrap();
        let ac = TableName::parse("/a/c").unwrap();
        let mut keys = vec![ac.storage_key(), a.storage_key(), ab.storage_key()];
        keys.sort();
        assert_eq!(keys, vec![a.storage_key(), ab.storage_key(), ac.storage_key()]);
    }
}
