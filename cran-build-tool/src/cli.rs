// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        build::{BuildOrchestrator, BuildOutcome, CommandBuildDriver},
        config::Config,
        db::DatabaseConnection,
        epoch::with_epoch,
        error::{Result, ToolError},
        planner::VersionPlanner,
        repo::{HttpPackageRepository, LocalRepository, PackageRepository},
    },
    clap::{Arg, ArgMatches, Command},
    cran_packaging::{
        index::PackageIndex,
        naming::{pkgname_as_debian, repourl_as_debian, DebianNameFlavor},
        package_ref::PackageRef,
    },
    std::{io::BufReader, path::Path, str::FromStr},
};

const ABOUT: &str = "\
# About

`cbt` builds Debian packages from CRAN/Bioconductor R source packages and
publishes them to Debian repositories.

Build state lives in a local SQLite database: one row per build attempt,
plus a snapshot of what upstream currently advertises and a ledger of
packaging rule revisions. Version numbers for produced packages are derived
from that state so they increase monotonically across rebuilds and uploads
are never rejected for version reuse.
";

const BUILD_ABOUT: &str = "\
Build one or more packages and record the outcome.

For each named package this computes the next Debian version, checks whether
a build is actually needed (new upstream version, new epoch, new packaging
rule revision, or a missing artifact), drives the build toolchain, publishes
the produced .deb files, and appends a build record.

Packages may pin a version or epoch:

* name            build the current upstream version
* name=1.2-3      build upstream version 1.2-3
* name=2:1.2-3    additionally force Debian epoch 2 for the build's duration

Unless --no-deps is given, the package's dependency closure is built first,
dependencies before dependents.
";

const UPDATE_INDEX_ABOUT: &str = "\
Refresh the database's snapshot of available packages.

Reads one or more PACKAGES index documents (the control-file style listings
published by CRAN-style repositories) and replaces the packages table with
their contents. Earlier files take precedence when a package appears in
several. Build history for packages that disappeared upstream is pruned.
";

pub async fn run() -> Result<()> {
    let app = Command::new("CRAN Build Tool")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Build Debian packages from CRAN sources")
        .long_about(ABOUT)
        .arg_required_else_help(true);

    let app = app.arg(
        Arg::new("config")
            .long("--config")
            .takes_value(true)
            .global(true)
            .help("Path to YAML configuration file"),
    );

    let app = app.arg(
        Arg::new("db_path")
            .long("--db")
            .takes_value(true)
            .global(true)
            .help("Path to SQLite database to use (overrides configuration)"),
    );

    let app = app.subcommand(
        Command::new("build")
            .about("Build packages and record the outcomes")
            .long_about(BUILD_ABOUT)
            .arg(
                Arg::new("force")
                    .long("--force")
                    .help("Build even if the package appears up to date"),
            )
            .arg(
                Arg::new("no-deps")
                    .long("--no-deps")
                    .help("Do not build the dependency closure first"),
            )
            .arg(
                Arg::new("package")
                    .required(true)
                    .multiple_values(true)
                    .help("Packages to build, e.g. ggplot2 or mvtnorm=2:1.0-8"),
            ),
    );

    let app = app.subcommand(
        Command::new("next-version")
            .about("Print the version the next build of each package would be stamped with")
            .arg(
                Arg::new("package")
                    .required(true)
                    .multiple_values(true)
                    .help("Packages to plan"),
            ),
    );

    let app = app.subcommand(
        Command::new("needs-build")
            .about("Print whether a package needs to be rebuilt")
            .arg(Arg::new("package").required(true).help("Package to check")),
    );

    let app = app.subcommand(
        Command::new("update-index")
            .about("Refresh the snapshot of available upstream packages")
            .long_about(UPDATE_INDEX_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .multiple_values(true)
                    .help("PACKAGES index documents, highest preference first"),
            ),
    );

    let app = app.subcommand(
        Command::new("remove")
            .about("Remove a package's binaries from the configured repositories")
            .arg(Arg::new("package").required(true).help("R package to remove")),
    );

    let app = app.subcommand(
        Command::new("outdated").about("Print packages whose latest build is stale"),
    );

    let app = app.subcommand(
        Command::new("history")
            .about("Print all recorded build attempts for a package")
            .arg(Arg::new("package").required(true).help("Package to inspect")),
    );

    let app = app.subcommand(
        Command::new("bump")
            .about("Bump the packaging rule revision, invalidating all prior builds"),
    );

    let app = app.subcommand(
        Command::new("bump-epoch")
            .about("Bump the packaging rule revision and the base epoch together"),
    );

    let app = app.subcommand(
        Command::new("blacklist")
            .about("Exclude a package from building")
            .arg(Arg::new("package").required(true).help("Package to exclude"))
            .arg(
                Arg::new("explanation")
                    .required(true)
                    .help("Why the package cannot be built"),
            ),
    );

    let app = app.subcommand(Command::new("blacklisted").about("Print excluded packages"));

    let matches = app.get_matches();

    let config = load_config(&matches)?;
    let mut db = DatabaseConnection::new_path(&config.database_path)?;

    match matches.subcommand() {
        Some(("build", args)) => command_build(&config, &mut db, args).await,
        Some(("next-version", args)) => command_next_version(&config, &mut db, args),
        Some(("needs-build", args)) => command_needs_build(&config, &mut db, args),
        Some(("update-index", args)) => command_update_index(&mut db, args),
        Some(("remove", args)) => command_remove(&config, args).await,
        Some(("outdated", _)) => command_outdated(&config, &db),
        Some(("history", args)) => command_history(&config, &db, args),
        Some(("bump", _)) => db.bump(),
        Some(("bump-epoch", _)) => db.bump_epoch(),
        Some(("blacklist", args)) => command_blacklist(&mut db, args),
        Some(("blacklisted", _)) => command_blacklisted(&db),
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => Ok(()),
    }
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_yaml_path(path)?,
        None => Config::default(),
    };

    if let Some(path) = matches.value_of("db_path") {
        config.database_path = path.into();
    }

    Ok(config)
}

fn load_index(path: &Path) -> Result<PackageIndex> {
    let f = std::fs::File::open(path)?;

    Ok(PackageIndex::parse_reader(BufReader::new(f))?)
}

async fn command_build(
    config: &Config,
    db: &mut DatabaseConnection,
    args: &ArgMatches,
) -> Result<()> {
    let force = args.is_present("force");
    let no_deps = args.is_present("no-deps");

    let index = match &config.index_path {
        Some(path) => Some(load_index(path)?),
        None => None,
    };

    let mut repositories: Vec<Box<dyn PackageRepository>> = vec![];

    if let Some(url) = &config.remote_repository_url {
        repositories.push(Box::new(HttpPackageRepository::new(
            url.as_str(),
            &config.repository_codename,
        )?));
    }

    if let Some(root) = &config.local_repository_root {
        repositories.push(Box::new(LocalRepository::new(
            root,
            &config.local_repository_distribution,
        )));
    }

    let orchestrator = BuildOrchestrator::new(
        config,
        Box::new(CommandBuildDriver::new(config)),
        repositories,
        index,
    );

    let mut failures = 0;

    for name in args.values_of("package").unwrap_or_default() {
        let pkg = match PackageRef::from_str(name) {
            Ok(pkg) => pkg,
            Err(err) => {
                log::error!("skipping {}: {}", name, err);
                failures += 1;
                continue;
            }
        };

        let outcome = if no_deps {
            orchestrator.build_package(db, &pkg, force).await
        } else {
            orchestrator.build_with_dependencies(db, &pkg, force).await
        };

        match outcome {
            Ok(BuildOutcome::Built(version)) => {
                println!("{} {} built", pkg.name(), version);
            }
            Ok(BuildOutcome::UpToDate) => {
                println!("{} up to date", pkg.name());
            }
            Ok(BuildOutcome::Blacklisted) => {
                println!("{} blacklisted", pkg.name());
            }
            Ok(BuildOutcome::Failed(version)) => {
                println!("{} {} FAILED", pkg.name(), version);
                failures += 1;
            }
            // Ledger corruption is not recoverable by moving on to the next
            // package.
            Err(err @ ToolError::EpochLedgerInconsistent { .. }) => return Err(err),
            Err(err) => {
                log::error!("failed to build {}: {}", pkg.name(), err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        Err(ToolError::BuildsFailed(failures))
    } else {
        Ok(())
    }
}

fn command_next_version(
    config: &Config,
    db: &mut DatabaseConnection,
    args: &ArgMatches,
) -> Result<()> {
    let planner = VersionPlanner::new(config);

    for name in args.values_of("package").unwrap_or_default() {
        let pkg = PackageRef::from_str(name)?;

        let version = with_epoch(db, &pkg, |db| {
            let snapshot = db.ledger_snapshot()?;

            planner.next_version(db, &pkg, &snapshot)
        })?;

        println!("{} {}", pkg.name(), version);
    }

    Ok(())
}

fn command_needs_build(
    config: &Config,
    db: &mut DatabaseConnection,
    args: &ArgMatches,
) -> Result<()> {
    let planner = VersionPlanner::new(config);

    let name = args.value_of("package").expect("package argument is required");
    let pkg = PackageRef::from_str(name)?;

    let needed = with_epoch(db, &pkg, |db| {
        let snapshot = db.ledger_snapshot()?;
        let version = planner.next_version(db, &pkg, &snapshot)?;

        planner.needs_build(db, &pkg, &version, &snapshot)
    })?;

    println!("{}", needed);

    Ok(())
}

fn command_update_index(db: &mut DatabaseConnection, args: &ArgMatches) -> Result<()> {
    let mut index = PackageIndex::default();

    for path in args.values_of("path").unwrap_or_default() {
        let f = std::fs::File::open(path)?;
        index.extend_from_reader(BufReader::new(f))?;
    }

    let pruned = db.update_package_versions(&index)?;

    log::info!(
        "now tracking {} packages; pruned {} build records",
        index.len(),
        pruned
    );

    Ok(())
}

async fn command_remove(config: &Config, args: &ArgMatches) -> Result<()> {
    let name = args.value_of("package").expect("package argument is required");

    let repo_tag = match &config.index_path {
        Some(path) => load_index(path)?
            .get(name)
            .and_then(|entry| entry.repository.as_deref().map(repourl_as_debian))
            .transpose()?,
        None => None,
    };

    let debname = pkgname_as_debian(name, repo_tag, DebianNameFlavor::Binary);

    let mut repositories: Vec<Box<dyn PackageRepository>> = vec![];

    if let Some(url) = &config.remote_repository_url {
        repositories.push(Box::new(HttpPackageRepository::new(
            url.as_str(),
            &config.repository_codename,
        )?));
    }

    if let Some(root) = &config.local_repository_root {
        repositories.push(Box::new(LocalRepository::new(
            root,
            &config.local_repository_distribution,
        )));
    }

    for repository in &repositories {
        repository.remove(&debname).await?;
        repository.remove(&format!("{}-dbgsym", debname)).await?;
    }

    log::info!("removed {} from {} repositories", debname, repositories.len());

    Ok(())
}

fn command_outdated(config: &Config, db: &DatabaseConnection) -> Result<()> {
    for package in db.outdated_packages(&config.system)? {
        println!("{}", package);
    }

    Ok(())
}

fn command_history(config: &Config, db: &DatabaseConnection, args: &ArgMatches) -> Result<()> {
    let name = args.value_of("package").expect("package argument is required");

    for record in db.package_builds(name, &config.system)? {
        println!(
            "{} {} {} {}",
            record.timestamp,
            record.version()?,
            if record.success { "ok" } else { "failed" },
            record.scm_revision,
        );
    }

    Ok(())
}

fn command_blacklist(db: &mut DatabaseConnection, args: &ArgMatches) -> Result<()> {
    let package = args.value_of("package").expect("package argument is required");
    let explanation = args
        .value_of("explanation")
        .expect("explanation argument is required");

    db.blacklist_package(package, explanation)
}

fn command_blacklisted(db: &DatabaseConnection) -> Result<()> {
    for package in db.blacklisted_packages()? {
        println!("{}", package);
    }

    Ok(())
}
