// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mapping R package names onto Debian package names.

Binary packages built from R sources follow the `r-<repo>-<name>` convention,
e.g. `r-cran-ggplot2`. The interpreter itself is special: R code depends on
`R`, which maps to `r-base-core` at install time and `r-base-dev` at build
time.
*/

use crate::error::{CranPackagingError, Result};

/// Prefixes identifying Debian packages that were generated from R sources.
pub const R_DEBIAN_PREFIXES: &[&str] = &["r-cran-", "r-bioc-"];

/// Which Debian name flavor to generate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebianNameFlavor {
    /// Source package name.
    Source,

    /// Binary package name, as used in runtime dependency fields.
    Binary,

    /// Binary package name, as used in build dependency fields.
    BinaryBuild,
}

/// Map a repository URL onto its short tag in Debian package names.
pub fn repourl_as_debian(url: &str) -> Result<&'static str> {
    for (needle, tag) in [
        ("cran", "cran"),
        ("bioc", "bioc"),
        ("omegahat", "omegahat"),
        ("rforge", "rforge"),
    ] {
        if url.contains(needle) {
            return Ok(tag);
        }
    }

    Err(CranPackagingError::UnknownRepository(url.to_string()))
}

/// Generate the Debian package name corresponding to an R package name.
///
/// `repo_tag` is the short repository tag (see [repourl_as_debian]) used in
/// binary names; callers without repository information pass `None` and get
/// the `unknown` placeholder the archive tooling expects. Callers are
/// responsible for first mapping base packages (those shipped with the
/// interpreter) to `R`.
pub fn pkgname_as_debian(name: &str, repo_tag: Option<&str>, flavor: DebianNameFlavor) -> String {
    if name == "R" {
        return match flavor {
            DebianNameFlavor::Source => "R".to_string(),
            DebianNameFlavor::Binary => "r-base-core".to_string(),
            DebianNameFlavor::BinaryBuild => "r-base-dev".to_string(),
        };
    }

    let name = name.to_lowercase();

    match flavor {
        DebianNameFlavor::Source => name,
        DebianNameFlavor::Binary | DebianNameFlavor::BinaryBuild => {
            format!("r-{}-{}", repo_tag.unwrap_or("unknown"), name)
        }
    }
}

/// Render a Debian package name with a version constraint attached,
/// e.g. `r-cran-gtable (>= 0.1.1)`.
pub fn pkgname_with_constraint(debian_name: &str, constraint: &str) -> String {
    format!("{} ({})", debian_name, constraint)
}

/// Strip a recognized `r-cran-`/`r-bioc-` prefix, recovering the R package
/// name (in lowercase) from a Debian binary name.
pub fn strip_r_debian_prefix(debian_name: &str) -> Option<&str> {
    R_DEBIAN_PREFIXES
        .iter()
        .find_map(|prefix| debian_name.strip_prefix(prefix))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn repository_urls() -> Result<()> {
        assert_eq!(
            repourl_as_debian("https://cran.r-project.org/src/contrib")?,
            "cran"
        );
        assert_eq!(
            repourl_as_debian("http://www.bioconductor.org/packages/3.5")?,
            "bioc"
        );
        assert!(matches!(
            repourl_as_debian("https://example.com"),
            Err(CranPackagingError::UnknownRepository(_))
        ));

        Ok(())
    }

    #[test]
    fn binary_names() {
        assert_eq!(
            pkgname_as_debian("ggplot2", Some("cran"), DebianNameFlavor::Binary),
            "r-cran-ggplot2"
        );
        assert_eq!(
            pkgname_as_debian("Matrix", None, DebianNameFlavor::Binary),
            "r-unknown-matrix"
        );
    }

    #[test]
    fn source_names_are_lowercased() {
        assert_eq!(
            pkgname_as_debian("BiocGenerics", Some("bioc"), DebianNameFlavor::Source),
            "biocgenerics"
        );
    }

    #[test]
    fn interpreter_is_special() {
        assert_eq!(
            pkgname_as_debian("R", None, DebianNameFlavor::Source),
            "R"
        );
        assert_eq!(
            pkgname_as_debian("R", None, DebianNameFlavor::Binary),
            "r-base-core"
        );
        assert_eq!(
            pkgname_as_debian("R", None, DebianNameFlavor::BinaryBuild),
            "r-base-dev"
        );
    }

    #[test]
    fn constraints_and_prefixes() {
        assert_eq!(
            pkgname_with_constraint("r-cran-gtable", ">= 0.1.1"),
            "r-cran-gtable (>= 0.1.1)"
        );
        assert_eq!(strip_r_debian_prefix("r-cran-ggplot2"), Some("ggplot2"));
        assert_eq!(strip_r_debian_prefix("r-bioc-limma"), Some("limma"));
        assert_eq!(strip_r_debian_prefix("libc6"), None);
    }
}
