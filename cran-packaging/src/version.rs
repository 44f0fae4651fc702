// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CRAN-flavored Debian package version string handling.

Debian packages produced from CRAN/Bioconductor sources carry version strings
of the form `[epoch:]upstream-1cran<revision>[R<major.minor>]`, e.g.
`1.2.3-1cran2R4.0`. The upstream component is the version assigned by the R
package author. The `1cran<revision>` suffix is the Debian revision, counting
repackagings of the same upstream version. The optional trailing `R<major.minor>`
tag records the R interpreter the package was built against; it is part of the
version's identity but is ignored when ordering versions.

Ordering follows Debian semantics restricted to the grammar R package versions
are allowed to use (digits separated by `.` or `-`): epoch first, then the
upstream components compared segment-wise numerically, then the revision.
*/

use {
    crate::error::{CranPackagingError, Result},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// Fixed first component of the Debian revision.
pub const VERSION_SUFFIX_STEP: u32 = 1;

/// Fixed literal separating the revision step from the revision counter.
pub const VERSION_SUFFIX: &str = "cran";

/// Upstream versions are sequences of digit runs separated by `.` or `-`.
static UPSTREAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+[.-])+[0-9]+$").expect("regex should compile"));

/// Upstream versions must also be expressible as a Debian version.
static DEBIAN_SAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9][A-Za-z0-9.+:~-]*$").expect("regex should compile"));

/// Trailing R interpreter tag, e.g. `R4.0`.
static RUNTIME_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"R[0-9]+\.[0-9]+$").expect("regex should compile"));

/// Isolates the `-<step>cran<revision>` suffix. The step and `cran` literal
/// are optional on input so that versions recorded before the suffix scheme
/// stabilized still parse.
static REVISION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)-(?:[0-9]+cran)?([0-9]+)$").expect("regex should compile"));

/// A Debian package version for a package generated from a CRAN source.
///
/// Instances always hold a validated upstream version. An epoch of 0 is
/// equivalent to "no epoch" and is never rendered.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CranDebVersion {
    epoch: u32,
    upstream_version: String,
    revision: u32,
    runtime_tag: Option<String>,
}

impl CranDebVersion {
    /// Construct an instance from components, validating the upstream version.
    pub fn new(upstream_version: impl ToString, revision: u32, epoch: u32) -> Result<Self> {
        let upstream_version = upstream_version.to_string();

        if !UPSTREAM_RE.is_match(&upstream_version) {
            return Err(CranPackagingError::UpstreamVersionInvalid(upstream_version));
        }

        if !DEBIAN_SAFE_RE.is_match(&upstream_version) {
            return Err(CranPackagingError::UpstreamVersionNotDebian(
                upstream_version,
            ));
        }

        Ok(Self {
            epoch,
            upstream_version,
            revision,
            runtime_tag: None,
        })
    }

    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // Epoch is the part before a colon, if present.
        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            let epoch = &s[0..pos];

            if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(CranPackagingError::EpochNonNumeric(s.to_string()));
            }

            (u32::from_str(epoch)?, &s[pos + 1..])
        } else {
            (0, s)
        };

        // The R interpreter tag, if present, trails everything else.
        let (remainder, runtime_tag) = if let Some(m) = RUNTIME_TAG_RE.find(remainder) {
            (
                &remainder[0..m.start()],
                Some(remainder[m.start()..].to_string()),
            )
        } else {
            (remainder, None)
        };

        let caps = REVISION_SUFFIX_RE
            .captures(remainder)
            .ok_or_else(|| CranPackagingError::RevisionSuffixInvalid(s.to_string()))?;

        let upstream = caps
            .get(1)
            .expect("capture group 1 is not optional")
            .as_str();
        let revision = u32::from_str(
            caps.get(2)
                .expect("capture group 2 is not optional")
                .as_str(),
        )?;

        let mut v = Self::new(upstream, revision, epoch)?;
        v.runtime_tag = runtime_tag;

        Ok(v)
    }

    /// The epoch component. 0 means no epoch.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The upstream (R author assigned) version component.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// The Debian revision counter.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The R interpreter tag, e.g. `R4.0`, if attached.
    pub fn runtime_tag(&self) -> Option<&str> {
        self.runtime_tag.as_deref()
    }

    /// Return a copy of this version carrying the given R interpreter tag.
    pub fn with_runtime_tag(&self, tag: impl ToString) -> Self {
        let mut v = self.clone();
        v.runtime_tag = Some(tag.to_string());
        v
    }

    /// Return a copy of this version without an R interpreter tag.
    pub fn without_runtime_tag(&self) -> Self {
        let mut v = self.clone();
        v.runtime_tag = None;
        v
    }

    /// Render without the epoch prefix.
    ///
    /// Artifact filenames (`.changes`, `.deb`) never carry the epoch.
    pub fn to_filename_string(&self) -> String {
        format!(
            "{}-{}{}{}{}",
            self.upstream_version,
            VERSION_SUFFIX_STEP,
            VERSION_SUFFIX,
            self.revision,
            self.runtime_tag.as_deref().unwrap_or("")
        )
    }
}

impl Display for CranDebVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // A 0 epoch is never rendered. If the upstream version itself contains
        // a colon, rendering without an epoch would be ambiguous on re-parse,
        // so the epoch is forced to 1 in that single case.
        let epoch = if self.epoch == 0 && self.upstream_version.contains(':') {
            1
        } else {
            self.epoch
        };

        if epoch != 0 {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.to_filename_string())
    }
}

impl FromStr for CranDebVersion {
    type Err = CranPackagingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compare two upstream version strings segment-wise.
///
/// Segments are the digit runs between `.`/`-` separators. A missing segment
/// sorts before a present one, matching Debian's treatment of the shorter
/// string running out while the longer still has a separator to compare.
fn compare_upstream(a: &str, b: &str) -> Ordering {
    let is_separator = |c: char| c == '.' || c == '-';

    let mut a_segments = a.split(is_separator).map(|s| u64::from_str(s).unwrap_or(0));
    let mut b_segments = b.split(is_separator).map(|s| u64::from_str(s).unwrap_or(0));

    loop {
        match (a_segments.next(), b_segments.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => {}
                res => return res,
            },
        }
    }
}

impl PartialOrd<Self> for CranDebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CranDebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // The runtime tag does not participate in ordering.
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            res => return res,
        }

        match compare_upstream(&self.upstream_version, &other.upstream_version) {
            Ordering::Equal => {}
            res => return res,
        }

        self.revision.cmp(&other.revision)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            CranDebVersion::parse("1.0-0-1cran1")?,
            CranDebVersion {
                epoch: 0,
                upstream_version: "1.0-0".into(),
                revision: 1,
                runtime_tag: None,
            }
        );
        assert_eq!(
            CranDebVersion::parse("2:0.2.20-1cran3")?,
            CranDebVersion {
                epoch: 2,
                upstream_version: "0.2.20".into(),
                revision: 3,
                runtime_tag: None,
            }
        );
        assert_eq!(
            CranDebVersion::parse("1.2.3-1cran2R4.0")?,
            CranDebVersion {
                epoch: 0,
                upstream_version: "1.2.3".into(),
                revision: 2,
                runtime_tag: Some("R4.0".into()),
            }
        );
        // Revision recorded without the step/suffix literal still parses.
        assert_eq!(
            CranDebVersion::parse("1.0-8-2")?,
            CranDebVersion {
                epoch: 0,
                upstream_version: "1.0-8".into(),
                revision: 2,
                runtime_tag: None,
            }
        );

        Ok(())
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            CranDebVersion::parse("1.0"),
            Err(CranPackagingError::RevisionSuffixInvalid(_))
        ));
        assert!(matches!(
            CranDebVersion::parse("abc-1cran1"),
            Err(CranPackagingError::UpstreamVersionInvalid(_))
        ));
        assert!(matches!(
            CranDebVersion::parse("x:1.0-1cran1"),
            Err(CranPackagingError::EpochNonNumeric(_))
        ));
        assert!(matches!(
            CranDebVersion::new("1.0.", 1, 0),
            Err(CranPackagingError::UpstreamVersionInvalid(_))
        ));
        // Single digit run with no separator is not an R package version.
        assert!(CranDebVersion::new("10", 1, 0).is_err());
    }

    #[test]
    fn format() -> Result<()> {
        for s in [
            "1.0-0-1cran1",
            "2:0.2.20-1cran3",
            "1.2.3-1cran2R4.0",
            "3:1.2.3-1cran2R4.1",
        ] {
            let v = CranDebVersion::parse(s)?;
            assert_eq!(format!("{}", v), s);
        }

        Ok(())
    }

    #[test]
    fn round_trip() -> Result<()> {
        for (upstream, revision, epoch) in [
            ("1.0-0", 1, 0),
            ("0.2.20", 3, 0),
            ("1.2.3", 2, 5),
            ("1-1-1", 42, 1),
        ] {
            let v = CranDebVersion::new(upstream, revision, epoch)?;
            assert_eq!(CranDebVersion::parse(&v.to_string())?, v);

            let tagged = v.with_runtime_tag("R4.0");
            assert_eq!(CranDebVersion::parse(&tagged.to_string())?, tagged);
        }

        Ok(())
    }

    #[test]
    fn zero_epoch_never_rendered() -> Result<()> {
        let v = CranDebVersion::new("1.0-0", 1, 0)?;
        assert_eq!(v.to_string(), "1.0-0-1cran1");

        Ok(())
    }

    #[test]
    fn filename_form_strips_epoch() -> Result<()> {
        let v = CranDebVersion::new("1.2.3", 2, 3)?.with_runtime_tag("R4.0");
        assert_eq!(v.to_string(), "3:1.2.3-1cran2R4.0");
        assert_eq!(v.to_filename_string(), "1.2.3-1cran2R4.0");

        Ok(())
    }

    #[test]
    fn ordering() -> Result<()> {
        let parse = CranDebVersion::parse;

        assert!(parse("1.0-1-1cran1")? < parse("1.0-2-1cran1")?);
        assert!(parse("1.0-1-1cran1")? < parse("1.0-1-1cran2")?);
        assert!(parse("1.9-0-1cran1")? < parse("1.10-0-1cran1")?);
        assert!(parse("1:1.0-0-1cran1")? > parse("2.0-0-1cran9")?);
        assert!(parse("1.0-1cran1")? < parse("1.0.0-1cran1")?);

        // The runtime tag is identity, not order.
        assert_eq!(
            parse("1.0-1-1cran1R4.0")?.cmp(&parse("1.0-1-1cran1")?),
            Ordering::Equal
        );
        assert_ne!(parse("1.0-1-1cran1R4.0")?, parse("1.0-1-1cran1")?);

        Ok(())
    }
}
