// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build orchestration.

Ties the pieces together for one package: check the blacklist, plan the next
version under the package's epoch scope, decide whether a build is needed,
drive the external toolchain, publish the artifacts, and record the attempt.

The compile/package toolchain itself stays external behind [BuildDriver].
[CommandBuildDriver] is the production implementation: it extracts the
package's generated Debian source package from the archive pool and runs
`debuild` over it. Generating that source package from the R sources is the
job of upstream tooling and out of scope here.
*/

use {
    crate::{
        config::Config,
        db::{BuildRecord, BuildRecordStore, DatabaseConnection},
        epoch::with_epoch,
        error::{Result, ToolError},
        planner::VersionPlanner,
        repo::PackageRepository,
    },
    cran_packaging::{
        dependency::{blocked_by_failure, dependency_build_order},
        index::PackageIndex,
        naming::{pkgname_as_debian, DebianNameFlavor},
        package_ref::PackageRef,
        version::CranDebVersion,
    },
    std::{
        collections::HashSet,
        path::{Path, PathBuf},
        process::Command,
    },
};

/// What a driver run produced.
#[derive(Debug)]
pub struct BuildOutput {
    /// Whether the toolchain succeeded.
    pub success: bool,

    /// Captured toolchain output, recorded with the build attempt.
    pub log: String,

    /// Produced `.deb` files, if any.
    pub debs: Vec<PathBuf>,
}

/// Interface to the external build toolchain.
pub trait BuildDriver {
    /// Build `pkg` at `version`, returning the outcome.
    ///
    /// An `Err` means the driver itself could not run (infrastructure
    /// failure); a compile failure is a successful call with
    /// `success == false`.
    fn build(&self, pkg: &PackageRef, version: &CranDebVersion) -> Result<BuildOutput>;
}

/// Drives `dpkg-source` and `debuild` over source packages from the archive
/// pool.
pub struct CommandBuildDriver {
    pool_root: PathBuf,
    results_dir: PathBuf,
    parallel_jobs: usize,
}

impl CommandBuildDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            pool_root: config.pool_root.clone(),
            results_dir: config.results_dir.clone(),
            parallel_jobs: num_cpus::get(),
        }
    }

    /// Locate the Debian source control file for a package in the pool.
    fn dsc_path(&self, srcname: &str) -> Result<PathBuf> {
        let initial = srcname
            .chars()
            .next()
            .map(|c| c.to_string())
            .unwrap_or_default();
        let dir = self.pool_root.join(initial).join(srcname);

        let mut dscs = vec![];

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "dsc").unwrap_or(false) {
                dscs.push(path);
            }
        }

        if dscs.len() != 1 {
            return Err(ToolError::SourceControlFileAmbiguous(
                dir.display().to_string(),
            ));
        }

        Ok(dscs.remove(0))
    }

    /// Run a command, folding its output into `log`.
    fn run_logged(&self, command: &mut Command, log: &mut String) -> Result<bool> {
        log.push_str(&format!("$ {:?}\n", command));

        let output = command.output()?;

        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(output.status.success())
    }

    /// Collect files with the given extension from a directory into the
    /// results directory.
    fn collect_artifacts(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.results_dir)?;

        let mut collected = vec![];

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == extension).unwrap_or(false) {
                let dest = self.results_dir.join(
                    path.file_name()
                        .expect("path from read_dir should have a file name"),
                );

                std::fs::copy(&path, &dest)?;
                collected.push(dest);
            }
        }

        Ok(collected)
    }
}

impl BuildDriver for CommandBuildDriver {
    fn build(&self, pkg: &PackageRef, version: &CranDebVersion) -> Result<BuildOutput> {
        let srcname = pkgname_as_debian(pkg.name(), None, DebianNameFlavor::Source);
        let dsc = self.dsc_path(&srcname)?;

        let workdir = std::env::temp_dir().join(format!("cbt-build-{}", srcname));
        if workdir.exists() {
            std::fs::remove_dir_all(&workdir)?;
        }
        std::fs::create_dir_all(&workdir)?;

        let mut log = String::new();

        let extracted = self.run_logged(
            Command::new("dpkg-source")
                .arg("-x")
                .arg(&dsc)
                .current_dir(&workdir),
            &mut log,
        )?;

        if !extracted {
            return Ok(BuildOutput {
                success: false,
                log,
                debs: vec![],
            });
        }

        let mut source_dirs = vec![];

        for entry in std::fs::read_dir(&workdir)? {
            let path = entry?.path();

            if path.is_dir() {
                source_dirs.push(path);
            }
        }

        if source_dirs.len() != 1 {
            return Err(ToolError::SourceDirectoryAmbiguous(
                workdir.display().to_string(),
            ));
        }

        let source_dir = source_dirs.remove(0);

        log::info!(
            "building Debian source package {} ({}) in {}",
            srcname,
            version,
            source_dir.display()
        );

        let mut source_build = Command::new("debuild");
        source_build.args(["-us", "-uc", "-sa", "-S", "-d"]);

        // Once the original tarball has shipped twice there is no point
        // including it again.
        if version.revision() > 2 {
            source_build.arg("-sd");
            log::info!("build excludes original source");
        }

        source_build.current_dir(&source_dir);

        let success = self.run_logged(&mut source_build, &mut log)?;

        let success = success && {
            log::info!("building binary packages for {} ({})", srcname, version);

            let mut binary_build = Command::new("debuild");
            binary_build
                .args(["-us", "-uc"])
                .env(
                    "DEB_BUILD_OPTIONS",
                    format!("parallel={}", self.parallel_jobs),
                )
                .env("MAKEFLAGS", format!("-j{}", self.parallel_jobs))
                .current_dir(&source_dir);

            self.run_logged(&mut binary_build, &mut log)?
        };

        let debs = if success {
            self.collect_artifacts(&workdir, "deb")?
        } else {
            vec![]
        };
        self.collect_artifacts(&workdir, "changes")?;

        if let Err(err) = std::fs::remove_dir_all(&workdir) {
            log::warn!("failed to clean up {}: {}", workdir.display(), err);
        }

        Ok(BuildOutput {
            success,
            log,
            debs,
        })
    }
}

/// Result of asking the orchestrator to build a package.
#[derive(Debug)]
pub enum BuildOutcome {
    /// The package is blacklisted and was not considered.
    Blacklisted,

    /// Everything is current; nothing was done.
    UpToDate,

    /// Built and recorded successfully.
    Built(CranDebVersion),

    /// The build ran and failed; the failure is recorded.
    Failed(CranDebVersion),
}

/// Coordinates planning, building, publishing, and recording.
pub struct BuildOrchestrator<'a> {
    config: &'a Config,
    planner: VersionPlanner,
    driver: Box<dyn BuildDriver>,
    repositories: Vec<Box<dyn PackageRepository>>,
    index: Option<PackageIndex>,
}

enum PlanOutcome {
    UpToDate,
    Ran {
        version: CranDebVersion,
        output: BuildOutput,
    },
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(
        config: &'a Config,
        driver: Box<dyn BuildDriver>,
        repositories: Vec<Box<dyn PackageRepository>>,
        index: Option<PackageIndex>,
    ) -> Self {
        Self {
            config,
            planner: VersionPlanner::new(config),
            driver,
            repositories,
            index,
        }
    }

    /// Build one package: plan, gate, drive, record, publish.
    pub async fn build_package(
        &self,
        db: &mut DatabaseConnection,
        pkg: &PackageRef,
        force: bool,
    ) -> Result<BuildOutcome> {
        if db.is_blacklisted(pkg.name())? {
            log::info!(
                "package {} is blacklisted; consult the database for the reason",
                pkg.name()
            );

            return Ok(BuildOutcome::Blacklisted);
        }

        // Planning, the build itself, and the history record all happen
        // under the package's epoch scope; publishing does not consult the
        // database and runs after the scope is released.
        let outcome = with_epoch(db, pkg, |db| self.plan_and_run(db, pkg, force))?;

        match outcome {
            PlanOutcome::UpToDate => {
                log::info!("skipping build of {}", pkg.name());

                Ok(BuildOutcome::UpToDate)
            }
            PlanOutcome::Ran { version, output } if output.success => {
                self.publish(&output.debs).await?;

                Ok(BuildOutcome::Built(version))
            }
            PlanOutcome::Ran { version, .. } => {
                self.report_blocked(pkg);

                Ok(BuildOutcome::Failed(version))
            }
        }
    }

    /// Build a package after first building everything in its dependency
    /// closure, dependencies first.
    pub async fn build_with_dependencies(
        &self,
        db: &mut DatabaseConnection,
        pkg: &PackageRef,
        force: bool,
    ) -> Result<BuildOutcome> {
        let order = match &self.index {
            Some(index) => {
                let base = self.base_package_set();

                dependency_build_order(index, pkg.name(), &base)?
            }
            None => vec![pkg.name().to_string()],
        };

        for name in &order {
            let (dep_ref, dep_force) = if name == pkg.name() {
                (pkg.clone(), force)
            } else {
                (PackageRef::unpinned(name), false)
            };

            match self.build_package(db, &dep_ref, dep_force).await? {
                BuildOutcome::Failed(version) => {
                    // A failed dependency dooms the dependent; there is no
                    // point continuing down the order.
                    return Ok(BuildOutcome::Failed(version));
                }
                outcome if name == pkg.name() => return Ok(outcome),
                _ => {}
            }
        }

        Ok(BuildOutcome::UpToDate)
    }

    fn plan_and_run(
        &self,
        db: &mut DatabaseConnection,
        pkg: &PackageRef,
        force: bool,
    ) -> Result<PlanOutcome> {
        let snapshot = db.ledger_snapshot()?;
        let version = self.planner.next_version(db, pkg, &snapshot)?;

        if !force && !self.planner.needs_build(db, pkg, &version, &snapshot)? {
            return Ok(PlanOutcome::UpToDate);
        }

        let output = self.driver.build(pkg, &version)?;

        db.record_build(&BuildRecord::new(
            pkg.name(),
            &self.config.system,
            &version,
            snapshot.schema_version,
            &self.config.scm_revision,
            output.success,
            &output.log,
        ))?;

        Ok(PlanOutcome::Ran { version, output })
    }

    async fn publish(&self, debs: &[PathBuf]) -> Result<()> {
        for deb in debs {
            let package = deb
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('_').next())
                .unwrap_or_default()
                .to_string();

            let version = deb
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('_').nth(1))
                .and_then(|v| CranDebVersion::parse(v).ok());

            for repository in &self.repositories {
                if let Some(version) = &version {
                    if repository.has_version(&package, version).await? {
                        continue;
                    }
                }

                repository.publish(deb).await?;
            }
        }

        Ok(())
    }

    fn report_blocked(&self, pkg: &PackageRef) {
        let index = match &self.index {
            Some(index) => index,
            None => return,
        };

        match blocked_by_failure(index, pkg.name(), &self.base_package_set()) {
            Ok(blocked) if !blocked.is_empty() => {
                log::error!(
                    "failure of {} means these packages will fail: {}",
                    pkg.name(),
                    blocked.join(", ")
                );
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!(
                    "could not compute packages blocked by {}: {}",
                    pkg.name(),
                    err
                );
            }
        }
    }

    fn base_package_set(&self) -> HashSet<String> {
        self.config.base_packages.iter().cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        std::{cell::RefCell, rc::Rc, str::FromStr},
    };

    /// Driver standing in for the external toolchain.
    struct ScriptedDriver {
        succeed: bool,
        built: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedDriver {
        fn new(succeed: bool) -> (Box<Self>, Rc<RefCell<Vec<String>>>) {
            let built = Rc::new(RefCell::new(vec![]));

            (
                Box::new(Self {
                    succeed,
                    built: built.clone(),
                }),
                built,
            )
        }
    }

    impl BuildDriver for ScriptedDriver {
        fn build(&self, pkg: &PackageRef, version: &CranDebVersion) -> Result<BuildOutput> {
            self.built
                .borrow_mut()
                .push(format!("{} {}", pkg.name(), version));

            Ok(BuildOutput {
                success: self.succeed,
                log: "scripted".to_string(),
                debs: vec![],
            })
        }
    }

    fn config() -> Config {
        Config {
            results_dir: PathBuf::from("/nonexistent/results"),
            ..Config::default()
        }
    }

    fn db_with_package(name: &str, version: &str) -> DatabaseConnection {
        let mut db = DatabaseConnection::new_memory().expect("database should open");

        let doc = format!("Package: {}\nVersion: {}\n", name, version);
        let index = PackageIndex::parse_reader(doc.as_bytes()).expect("index should parse");
        db.update_package_versions(&index)
            .expect("index should apply");

        db
    }

    #[tokio::test]
    async fn successful_build_is_recorded() -> Result<()> {
        let config = config();
        let mut db = db_with_package("rjson", "0.2.20");

        let (driver, _built) = ScriptedDriver::new(true);
        let orchestrator = BuildOrchestrator::new(&config, driver, vec![], None);

        let pkg = PackageRef::from_str("rjson")?;
        let outcome = orchestrator.build_package(&mut db, &pkg, false).await?;

        assert!(matches!(outcome, BuildOutcome::Built(_)));

        let record = db
            .latest_build("rjson", &config.system)?
            .expect("build should be recorded");
        assert!(record.success);
        assert_eq!(record.r_version, "0.2.20");
        assert_eq!(record.deb_revision, 1);

        Ok(())
    }

    #[tokio::test]
    async fn failed_build_is_recorded_as_failure() -> Result<()> {
        let config = config();
        let mut db = db_with_package("rjson", "0.2.20");

        let (driver, _built) = ScriptedDriver::new(false);
        let orchestrator = BuildOrchestrator::new(&config, driver, vec![], None);

        let pkg = PackageRef::from_str("rjson")?;
        let outcome = orchestrator.build_package(&mut db, &pkg, false).await?;

        assert!(matches!(outcome, BuildOutcome::Failed(_)));

        let record = db
            .latest_build("rjson", &config.system)?
            .expect("attempt should be recorded");
        assert!(!record.success);

        Ok(())
    }

    #[tokio::test]
    async fn blacklisted_package_is_skipped() -> Result<()> {
        let config = config();
        let mut db = db_with_package("rgl", "0.100.0");
        db.blacklist_package("rgl", "requires OpenGL at build time")?;

        let (driver, built) = ScriptedDriver::new(true);
        let orchestrator = BuildOrchestrator::new(&config, driver, vec![], None);

        let pkg = PackageRef::from_str("rgl")?;
        let outcome = orchestrator.build_package(&mut db, &pkg, false).await?;

        assert!(matches!(outcome, BuildOutcome::Blacklisted));
        assert!(built.borrow().is_empty());
        assert!(db.latest_build("rgl", &config.system)?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn epoch_pin_is_scoped_to_the_build() -> Result<()> {
        let config = config();
        let mut db = db_with_package("newpkg", "1.0-0");

        let (driver, _built) = ScriptedDriver::new(true);
        let orchestrator = BuildOrchestrator::new(&config, driver, vec![], None);

        let pkg = PackageRef::from_str("newpkg=2:1.0-0")?;
        orchestrator.build_package(&mut db, &pkg, false).await?;

        // The recorded build observed the pinned epoch.
        let record = db
            .latest_build("newpkg", &config.system)?
            .expect("build should be recorded");
        assert_eq!(record.deb_epoch, 2);

        // The global ledger reverted once the scope ended.
        assert_eq!(db.current_base_epoch()?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn dependencies_build_before_dependent() -> Result<()> {
        let config = config();

        let mut db = DatabaseConnection::new_memory()?;
        let index = PackageIndex::parse_reader(
            "Package: scales\nVersion: 1.1.1\n\nPackage: ggplot2\nVersion: 3.3.5\nImports: scales\n"
                .as_bytes(),
        )
        .expect("index should parse");
        db.update_package_versions(&index)?;

        let (driver, built) = ScriptedDriver::new(true);
        let orchestrator = BuildOrchestrator::new(&config, driver, vec![], Some(index));

        let pkg = PackageRef::from_str("ggplot2")?;
        let outcome = orchestrator
            .build_with_dependencies(&mut db, &pkg, false)
            .await?;

        assert!(matches!(outcome, BuildOutcome::Built(_)));

        assert_eq!(
            *built.borrow(),
            vec!["scales 1.1.1-1cran1R4.0", "ggplot2 3.3.5-1cran1R4.0"]
        );

        assert!(db.latest_build("scales", &config.system)?.is_some());
        assert!(db.latest_build("ggplot2", &config.system)?.is_some());

        Ok(())
    }
}
