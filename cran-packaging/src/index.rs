// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading CRAN/Bioconductor package indices.

R package repositories advertise their contents in `PACKAGES` files using the
same field syntax as Debian control files: paragraphs of `Name: value` fields
separated by blank lines, with continuation lines marked by leading
whitespace. This module parses that format into a [PackageIndex] snapshot
mapping package names to their latest advertised metadata.
*/

use {
    crate::error::{CranPackagingError, Result},
    std::{
        collections::BTreeMap,
        io::BufRead,
    },
};

/// Metadata for one package as advertised by an upstream index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexEntry {
    /// The R package name.
    pub name: String,

    /// The latest advertised upstream version.
    pub version: String,

    /// Raw `Depends` field, if present.
    pub depends: Option<String>,

    /// Raw `Imports` field, if present.
    pub imports: Option<String>,

    /// Raw `LinkingTo` field, if present.
    pub linking_to: Option<String>,

    /// Raw `Suggests` field, if present.
    pub suggests: Option<String>,

    /// URL of the repository the entry came from, if advertised.
    pub repository: Option<String>,
}

/// A snapshot of the packages known to the upstream repositories.
///
/// When the same package appears in multiple paragraphs (e.g. because indices
/// from several mirrors were concatenated), the first occurrence wins.
#[derive(Clone, Debug, Default)]
pub struct PackageIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl PackageIndex {
    /// Parse a `PACKAGES` document from a reader.
    pub fn parse_reader(reader: impl BufRead) -> Result<Self> {
        let mut index = Self::default();
        index.extend_from_reader(reader)?;

        Ok(index)
    }

    /// Parse a `PACKAGES` document and merge its entries into this index.
    ///
    /// Entries for already-known packages are ignored, so the call order of
    /// mirrors establishes preference.
    pub fn extend_from_reader(&mut self, reader: impl BufRead) -> Result<()> {
        let mut duplicates = 0usize;

        for paragraph in read_paragraphs(reader)? {
            let entry = IndexEntry::try_from(paragraph)?;

            if self.entries.contains_key(&entry.name) {
                duplicates += 1;
                continue;
            }

            self.entries.insert(entry.name.clone(), entry);
        }

        if duplicates > 0 {
            log::info!(
                "ignored {} duplicate package entries from a lower-preference index",
                duplicates
            );
        }

        Ok(())
    }

    /// Look up a package by name.
    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    /// Whether a package is known to the index.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The latest advertised upstream version of a package.
    pub fn latest_version(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.version.as_str())
    }

    /// Iterate over all entries, ordered by package name.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Iterate over known package names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Number of known packages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed paragraph: field name/value pairs in file order.
type Paragraph = Vec<(String, String)>;

/// Read control-style paragraphs from a reader.
///
/// Continuation lines (leading whitespace) are folded into the preceding
/// field with a single space, which collapses the multi-line dependency
/// fields R indices are fond of.
fn read_paragraphs(reader: impl BufRead) -> Result<Vec<Paragraph>> {
    let mut paragraphs = Vec::new();
    let mut current: Paragraph = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current.last_mut().ok_or_else(|| {
                CranPackagingError::IndexParse(
                    line_number + 1,
                    "continuation line without a preceding field".to_string(),
                )
            })?;

            value.push(' ');
            value.push_str(line.trim());
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            CranPackagingError::IndexParse(line_number + 1, format!("not a field line: {}", line))
        })?;

        current.push((name.trim().to_string(), value.trim().to_string()));
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

impl TryFrom<Paragraph> for IndexEntry {
    type Error = CranPackagingError;

    fn try_from(paragraph: Paragraph) -> Result<Self> {
        let mut entry = IndexEntry::default();

        for (name, value) in paragraph {
            match name.as_str() {
                "Package" => entry.name = value,
                "Version" => entry.version = value,
                "Depends" => entry.depends = Some(value),
                "Imports" => entry.imports = Some(value),
                "LinkingTo" => entry.linking_to = Some(value),
                "Suggests" => entry.suggests = Some(value),
                "Repository" => entry.repository = Some(value),
                _ => {}
            }
        }

        if entry.name.is_empty() {
            return Err(CranPackagingError::IndexRequiredFieldMissing("Package"));
        }

        if entry.version.is_empty() {
            return Err(CranPackagingError::IndexRequiredFieldMissing("Version"));
        }

        Ok(entry)
    }
}
