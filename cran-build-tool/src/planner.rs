// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Version planning.

Before a package is built, two questions need answers: what Debian version
string should the artifact carry, and is a build necessary at all?

[VersionPlanner::next_version] answers the first. The version must increase
monotonically across rebuild attempts or the repository will reject the
upload, so the planner derives it deterministically from the build history:

* No prior build: revision 1 at the ledger's base epoch.
* Same upstream version as the last build: the revision increments if that
  build succeeded and is retried unchanged if it failed, so repeated failures
  of one upstream version do not inflate the revision counter.
* New upstream version: the revision resets to 1. The epoch always carries
  forward from the previous build.

[VersionPlanner::needs_build] answers the second and fails open: with no
successful history, a changed upstream version, epoch, or schema version, or
a missing artifact, the verdict is "build".

Both operations are pure reads over the store and an explicit
[LedgerSnapshot]; recording the outcome afterwards is the caller's job.
*/

use {
    crate::{
        config::Config,
        db::{BuildRecordStore, LedgerSnapshot},
        error::{Result, ToolError},
    },
    cran_packaging::{
        naming::{pkgname_as_debian, DebianNameFlavor},
        package_ref::PackageRef,
        version::CranDebVersion,
    },
    std::path::PathBuf,
};

/// Computes next versions and build verdicts.
///
/// Holds configuration only; all state is read from the store passed into
/// each call.
pub struct VersionPlanner {
    system: String,
    results_dir: PathBuf,
    runtime_tag: Option<String>,
}

impl VersionPlanner {
    pub fn new(config: &Config) -> Self {
        Self {
            system: config.system.clone(),
            results_dir: config.results_dir.clone(),
            runtime_tag: Some(config.runtime_tag()),
        }
    }

    /// Construct a planner that does not stamp an R interpreter tag.
    pub fn without_runtime_tag(system: impl ToString, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            system: system.to_string(),
            results_dir: results_dir.into(),
            runtime_tag: None,
        }
    }

    /// The version the next build of `pkg` must be stamped with.
    pub fn next_version(
        &self,
        store: &dyn BuildRecordStore,
        pkg: &PackageRef,
        snapshot: &LedgerSnapshot,
    ) -> Result<CranDebVersion> {
        let upstream = match pkg.pinned_version() {
            Some(version) => version.to_string(),
            None => store
                .latest_upstream_version(pkg.name())?
                .ok_or_else(|| ToolError::PackageNotAvailable(pkg.name().to_string()))?,
        };

        let version = match store.latest_build(pkg.name(), &self.system)? {
            None => CranDebVersion::new(&upstream, 1, snapshot.base_epoch)?,
            Some(prev) => {
                if prev.r_version == upstream {
                    // A failed build is retried at the same revision.
                    let increment = u32::from(prev.success);

                    CranDebVersion::new(&upstream, prev.deb_revision + increment, prev.deb_epoch)?
                } else {
                    log::info!(
                        "{}: new upstream version {} (previously {})",
                        pkg.name(),
                        upstream,
                        prev.r_version
                    );

                    CranDebVersion::new(&upstream, 1, prev.deb_epoch)?
                }
            }
        };

        Ok(match &self.runtime_tag {
            Some(tag) => version.with_runtime_tag(tag),
            None => version,
        })
    }

    /// Whether `pkg` must be (re)built to exist at `candidate` in the
    /// repository.
    pub fn needs_build(
        &self,
        store: &dyn BuildRecordStore,
        pkg: &PackageRef,
        candidate: &CranDebVersion,
        snapshot: &LedgerSnapshot,
    ) -> Result<bool> {
        let prev = match store.latest_build(pkg.name(), &self.system)? {
            Some(prev) if prev.success => prev,
            _ => {
                log::info!(
                    "rebuilding {}: no build record or previous build failed",
                    pkg.name()
                );

                return Ok(true);
            }
        };

        if prev.r_version != candidate.upstream_version() {
            log::info!(
                "rebuilding {}: upstream version {} (old) vs {} (new)",
                pkg.name(),
                prev.r_version,
                candidate.upstream_version()
            );

            return Ok(true);
        }

        if prev.deb_epoch != candidate.epoch() {
            log::info!(
                "rebuilding {}: epoch {} (old) vs {} (new)",
                pkg.name(),
                prev.deb_epoch,
                candidate.epoch()
            );

            return Ok(true);
        }

        if prev.db_version != snapshot.schema_version {
            log::info!(
                "rebuilding {}: schema version {} (old) vs {} (new)",
                pkg.name(),
                prev.db_version,
                snapshot.schema_version
            );

            return Ok(true);
        }

        // Guards against interrupted publishing: a matching build record
        // whose artifact vanished still warrants a rebuild.
        let changes = self.changes_file_path(pkg, candidate);
        if !changes.exists() {
            log::info!(
                "rebuilding {}: artifact {} is missing",
                pkg.name(),
                changes.display()
            );

            return Ok(true);
        }

        log::info!("already built {} version {}", pkg.name(), candidate);

        Ok(false)
    }

    /// Where the source changes file for a build of `pkg` at `version` is
    /// expected to land.
    pub fn changes_file_path(&self, pkg: &PackageRef, version: &CranDebVersion) -> PathBuf {
        let srcname = pkgname_as_debian(pkg.name(), None, DebianNameFlavor::Source);

        self.results_dir.join(format!(
            "{}_{}_source.changes",
            srcname,
            version.to_filename_string()
        ))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::db::{BuildRecord, DatabaseConnection},
        cran_packaging::index::PackageIndex,
        std::str::FromStr,
    };

    const SYSTEM: &str = "debian-amd64";

    fn planner() -> VersionPlanner {
        VersionPlanner::without_runtime_tag(SYSTEM, "/nonexistent/results")
    }

    fn db_with_index(entries: &[(&str, &str)]) -> DatabaseConnection {
        let mut db = DatabaseConnection::new_memory().expect("database should open");

        let doc = entries
            .iter()
            .map(|(name, version)| format!("Package: {}\nVersion: {}\n\n", name, version))
            .collect::<String>();
        let index = PackageIndex::parse_reader(doc.as_bytes()).expect("index should parse");
        db.update_package_versions(&index)
            .expect("index should apply");

        db
    }

    fn record(db: &mut DatabaseConnection, package: &str, version: &str, success: bool) {
        let v = CranDebVersion::parse(version).expect("version should parse");
        db.record_build(&BuildRecord::new(
            package, SYSTEM, &v, 1, "svn:0", success, "",
        ))
        .expect("record should insert");
    }

    fn snapshot(db: &DatabaseConnection) -> LedgerSnapshot {
        db.ledger_snapshot().expect("snapshot should capture")
    }

    #[test]
    fn fresh_package_gets_revision_one() -> Result<()> {
        let db = db_with_index(&[("foo", "1.0-0")]);
        let pkg = PackageRef::from_str("foo")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1.0-0-1cran1");

        Ok(())
    }

    #[test]
    fn fresh_package_inherits_base_epoch() -> Result<()> {
        let mut db = db_with_index(&[("foo", "1.0-0")]);
        db.bump_epoch()?;
        let pkg = PackageRef::from_str("foo")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1:1.0-0-1cran1");

        Ok(())
    }

    #[test]
    fn successful_build_increments_revision() -> Result<()> {
        let mut db = db_with_index(&[("foo", "1.0-0")]);
        record(&mut db, "foo", "1.0-0-1cran1", true);
        let pkg = PackageRef::from_str("foo")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1.0-0-1cran2");

        Ok(())
    }

    #[test]
    fn failed_build_retries_same_revision() -> Result<()> {
        let mut db = db_with_index(&[("foo", "1.0-0")]);
        record(&mut db, "foo", "1.0-0-1cran2", false);
        let pkg = PackageRef::from_str("foo")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1.0-0-1cran2");

        Ok(())
    }

    #[test]
    fn upstream_bump_resets_revision_and_keeps_epoch() -> Result<()> {
        let mut db = db_with_index(&[("foo", "2.0-0")]);
        record(&mut db, "foo", "3:1.0-0-1cran7", true);
        let pkg = PackageRef::from_str("foo")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "3:2.0-0-1cran1");

        Ok(())
    }

    #[test]
    fn pinned_version_overrides_index() -> Result<()> {
        let db = db_with_index(&[("foo", "2.0-0")]);
        let pkg = PackageRef::from_str("foo=1.0-8")?;

        let version = planner().next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1.0-8-1cran1");

        Ok(())
    }

    #[test]
    fn unknown_package_is_fatal() {
        let db = db_with_index(&[]);
        let pkg = PackageRef::from_str("ghost").expect("ref should parse");

        assert!(matches!(
            planner().next_version(&db, &pkg, &snapshot(&db)),
            Err(ToolError::PackageNotAvailable(_))
        ));
    }

    #[test]
    fn runtime_tag_is_appended() -> Result<()> {
        let db = db_with_index(&[("foo", "1.0-0")]);
        let pkg = PackageRef::from_str("foo")?;

        let planner = VersionPlanner::new(&Config::default());
        let version = planner.next_version(&db, &pkg, &snapshot(&db))?;
        assert_eq!(version.to_string(), "1.0-0-1cran1R4.0");

        Ok(())
    }

    #[test]
    fn needs_build_with_no_history() -> Result<()> {
        let db = db_with_index(&[("foo", "1.0-0")]);
        let pkg = PackageRef::from_str("foo")?;
        let candidate = CranDebVersion::parse("1.0-0-1cran1")?;

        assert!(planner().needs_build(&db, &pkg, &candidate, &snapshot(&db))?);

        Ok(())
    }

    #[test]
    fn needs_build_after_failure() -> Result<()> {
        let mut db = db_with_index(&[("foo", "1.0-0")]);
        record(&mut db, "foo", "1.0-0-1cran1", false);
        let pkg = PackageRef::from_str("foo")?;
        let candidate = CranDebVersion::parse("1.0-0-1cran1")?;

        assert!(planner().needs_build(&db, &pkg, &candidate, &snapshot(&db))?);

        Ok(())
    }

    #[test]
    fn needs_build_on_changed_triple() -> Result<()> {
        let mut db = db_with_index(&[("foo", "1.0-0")]);
        record(&mut db, "foo", "1.0-0-1cran1", true);
        let pkg = PackageRef::from_str("foo")?;
        let snap = snapshot(&db);

        // Upstream changed.
        let candidate = CranDebVersion::parse("2.0-0-1cran1")?;
        assert!(planner().needs_build(&db, &pkg, &candidate, &snap)?);

        // Epoch changed.
        let candidate = CranDebVersion::parse("1:1.0-0-1cran1")?;
        assert!(planner().needs_build(&db, &pkg, &candidate, &snap)?);

        // Schema version changed.
        db.bump()?;
        let candidate = CranDebVersion::parse("1.0-0-1cran1")?;
        assert!(planner().needs_build(&db, &pkg, &candidate, &snapshot(&db))?);

        Ok(())
    }

    #[test]
    fn up_to_date_when_triple_matches_and_artifact_exists() -> Result<()> {
        let results = tempfile::tempdir()?;

        let mut db = db_with_index(&[("foo", "1.0-0")]);
        record(&mut db, "foo", "1.0-0-1cran1", true);
        let pkg = PackageRef::from_str("foo")?;
        let candidate = CranDebVersion::parse("1.0-0-1cran1")?;

        let planner = VersionPlanner::without_runtime_tag(SYSTEM, results.path());

        // Matching triple but no artifact on disk: rebuild.
        assert!(planner.needs_build(&db, &pkg, &candidate, &snapshot(&db))?);

        std::fs::write(planner.changes_file_path(&pkg, &candidate), "")?;
        assert!(!planner.needs_build(&db, &pkg, &candidate, &snapshot(&db))?);

        Ok(())
    }
}
