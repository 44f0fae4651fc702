// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Tool configuration.

Settings are loaded from a YAML document. Every field has a default, so an
empty document (or no `--config` argument at all) yields a working
configuration for a conventional single-host deployment.
*/

use {
    crate::error::Result,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Tool settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database holding build state.
    pub database_path: PathBuf,

    /// Directory where build artifacts (`.changes`, `.deb`) are collected.
    pub results_dir: PathBuf,

    /// Root of the local apt repository managed via reprepro, if any.
    pub local_repository_root: Option<PathBuf>,

    /// Distribution name inside the local repository.
    pub local_repository_distribution: String,

    /// Base URL of the remote package repository service, if any.
    pub remote_repository_url: Option<String>,

    /// Codename under which packages are filed in the remote repository.
    /// Typically the OS release codename, e.g. `bullseye`.
    pub repository_codename: String,

    /// Root of the archive pool holding generated Debian source packages.
    pub pool_root: PathBuf,

    /// Identifier of the system builds are recorded under,
    /// e.g. `debian-bullseye`.
    pub system: String,

    /// Revision of the packaging rule set, recorded with every build.
    pub scm_revision: String,

    /// Major.minor version of the R interpreter packages are built against.
    pub r_version: String,

    /// R packages shipped with the interpreter; these are never built.
    pub base_packages: Vec<String>,

    /// Path to a `PACKAGES` index document used for dependency walking and
    /// index refreshes, if present.
    pub index_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/cache/cbt/builds.db"),
            results_dir: PathBuf::from("/var/cache/cbt/results"),
            local_repository_root: None,
            local_repository_distribution: "rbuilders".to_string(),
            remote_repository_url: None,
            repository_codename: "unstable".to_string(),
            pool_root: PathBuf::from("/var/www/cbt/rep/pool/main"),
            system: std::env::var("CBT_SYSTEM").unwrap_or_else(|_| "debian-amd64".to_string()),
            scm_revision: "svn:0".to_string(),
            r_version: "4.0".to_string(),
            base_packages: vec![],
            index_path: None,
        }
    }
}

impl Config {
    /// Load settings from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())?;

        Ok(serde_yaml::from_reader(f)?)
    }

    /// The `R<major.minor>` tag stamped onto produced versions.
    pub fn runtime_tag(&self) -> String {
        format!("R{}", self.r_version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").expect("empty config should parse");
        assert_eq!(config.local_repository_distribution, "rbuilders");
        assert_eq!(config.runtime_tag(), "R4.0");
    }

    #[test]
    fn fields_override() {
        let config: Config = serde_yaml::from_str(
            "r_version: '4.1'\nsystem: ubuntu-focal\nbase_packages: [methods, utils]\n",
        )
        .expect("config should parse");

        assert_eq!(config.runtime_tag(), "R4.1");
        assert_eq!(config.system, "ubuntu-focal");
        assert_eq!(config.base_packages, vec!["methods", "utils"]);
    }
}
