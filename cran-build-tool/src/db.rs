// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build state persistence.

A single SQLite database holds everything the pipeline knows about past
builds: the append-only `builds` history, the `packages` snapshot of what
upstream currently advertises, the `database_versions` ledger of packaging
rule revisions and their base epochs, and the blacklist.

The `builds` row shape is a durable contract: reporting and dashboard tooling
reads it directly, so columns must not change shape without a migration.
*/

use {
    crate::error::{Result, ToolError},
    chrono::{Local, NaiveDateTime},
    cran_packaging::{index::PackageIndex, version::CranDebVersion},
    indoc::indoc,
    rusqlite::{params, Connection, Row},
    std::{collections::HashSet, path::Path},
};

const SCHEMA: &[&str] = &[
    indoc! {"
        CREATE TABLE database_versions (
            version INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            version_date INTEGER NOT NULL,
            base_epoch INTEGER NOT NULL
        )"},
    indoc! {"
        CREATE TABLE packages (
            package TEXT PRIMARY KEY NOT NULL,
            latest_r_version TEXT
        )"},
    indoc! {"
        CREATE TABLE builds (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            system TEXT NOT NULL,
            package TEXT NOT NULL,
            r_version TEXT NOT NULL,
            deb_epoch INTEGER NOT NULL,
            deb_revision INTEGER NOT NULL,
            db_version INTEGER NOT NULL,
            date_stamp TEXT NOT NULL,
            time_stamp TEXT NOT NULL,
            scm_revision TEXT NOT NULL,
            success INTEGER NOT NULL,
            log TEXT,
            UNIQUE(package, system, r_version, deb_epoch, deb_revision, db_version)
        )"},
    indoc! {"
        CREATE TABLE blacklist_packages (
            package TEXT PRIMARY KEY NOT NULL,
            nonfree INTEGER NOT NULL DEFAULT 0,
            obsolete INTEGER NOT NULL DEFAULT 0,
            broken_dependency INTEGER NOT NULL DEFAULT 0,
            unsatisfied_dependency INTEGER NOT NULL DEFAULT 0,
            breaks_tooling INTEGER NOT NULL DEFAULT 0,
            other INTEGER NOT NULL DEFAULT 0,
            explanation TEXT NOT NULL
        )"},
    "PRAGMA user_version=1",
];

/// Logs are capped so a pathological build cannot bloat the database.
const MAX_LOG_LEN: usize = 10240;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.6f";

/// One build attempt, successful or not.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildRecord {
    pub package: String,
    pub system: String,
    pub r_version: String,
    pub deb_epoch: u32,
    pub deb_revision: u32,
    pub db_version: u32,
    pub timestamp: NaiveDateTime,
    pub scm_revision: String,
    pub success: bool,
    pub log: String,
}

impl BuildRecord {
    /// Construct a record for a build attempt that just concluded.
    pub fn new(
        package: impl ToString,
        system: impl ToString,
        version: &CranDebVersion,
        db_version: u32,
        scm_revision: impl ToString,
        success: bool,
        log: impl ToString,
    ) -> Self {
        Self {
            package: package.to_string(),
            system: system.to_string(),
            r_version: version.upstream_version().to_string(),
            deb_epoch: version.epoch(),
            deb_revision: version.revision(),
            db_version,
            timestamp: Local::now().naive_local(),
            scm_revision: scm_revision.to_string(),
            success,
            log: log.to_string(),
        }
    }

    /// The Debian version this attempt was stamped with (no runtime tag).
    pub fn version(&self) -> Result<CranDebVersion> {
        Ok(CranDebVersion::new(
            &self.r_version,
            self.deb_revision,
            self.deb_epoch,
        )?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let date_stamp: String = row.get(0)?;
        let time_stamp: String = row.get(1)?;

        let timestamp = NaiveDateTime::parse_from_str(
            &format!("{} {}", date_stamp, time_stamp),
            "%Y-%m-%d %H:%M:%S%.f",
        )
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            package: row.get(2)?,
            system: row.get(3)?,
            r_version: row.get(4)?,
            deb_epoch: row.get(5)?,
            deb_revision: row.get(6)?,
            db_version: row.get(7)?,
            timestamp,
            scm_revision: row.get(8)?,
            success: row.get::<_, i64>(9)? != 0,
            log: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        })
    }
}

const BUILD_COLUMNS: &str = "date_stamp, time_stamp, package, system, r_version, deb_epoch, \
                             deb_revision, db_version, scm_revision, success, log";

/// The ledger state a planning decision is made against.
///
/// Captured once and passed explicitly into planner calls so decisions are
/// reproducible and testable without shared mutable state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LedgerSnapshot {
    /// Current packaging rule set revision.
    pub schema_version: u32,

    /// Base epoch stamped onto first-time builds.
    pub base_epoch: u32,
}

/// Interface the version planner uses to consult build history.
///
/// [DatabaseConnection] is the production implementation; tests may use an
/// in-memory database.
pub trait BuildRecordStore {
    /// The most recent build attempt for a (package, system) pair.
    fn latest_build(&self, package: &str, system: &str) -> Result<Option<BuildRecord>>;

    /// The version string of the most recent build attempt, if any.
    fn latest_build_version(&self, package: &str, system: &str)
        -> Result<Option<CranDebVersion>>;

    /// The latest upstream version advertised for a package, if known.
    fn latest_upstream_version(&self, package: &str) -> Result<Option<String>>;

    /// Append a build attempt. Re-recording an identical natural key
    /// (package, system, version, epoch, revision, schema version) is a no-op.
    fn record_build(&mut self, record: &BuildRecord) -> Result<()>;

    /// Drop build history for packages not in `keep`. Returns rows deleted.
    fn prune_builds(&mut self, keep: &HashSet<String>) -> Result<usize>;
}

/// A connection to the SQLite database holding build state.
pub struct DatabaseConnection {
    conn: Connection,
}

impl DatabaseConnection {
    /// Open a new connection to a SQLite database in memory.
    pub fn new_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let mut slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    /// Open a new connection to a SQLite database in a filesystem path.
    pub fn new_path(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        let mut slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        let user_version: usize = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        match user_version {
            0 => {
                let txn = self.conn.transaction()?;

                for statement in SCHEMA {
                    txn.execute_batch(statement)?;
                }

                txn.commit()?;
            }
            1 => {}
            _ => {
                return Err(ToolError::DatabaseCorrupt(user_version));
            }
        }

        // The ledger always has a current entry; revision 1, epoch 0 is the
        // state of a fresh deployment.
        let entries: u32 =
            self.conn
                .query_row("SELECT COUNT(*) FROM database_versions", [], |row| {
                    row.get(0)
                })?;

        if entries == 0 {
            self.append_schema_version(1, 0)?;
        }

        Ok(())
    }

    /// The current packaging rule set revision.
    pub fn current_schema_version(&self) -> Result<u32> {
        Ok(self
            .conn
            .query_row("SELECT max(version) FROM database_versions", [], |row| {
                row.get(0)
            })?)
    }

    /// Base epoch of the current ledger entry.
    pub fn current_base_epoch(&self) -> Result<u32> {
        Ok(self.conn.query_row(
            "SELECT base_epoch FROM database_versions ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )?)
    }

    /// Capture the ledger state for a round of planning decisions.
    pub fn ledger_snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            schema_version: self.current_schema_version()?,
            base_epoch: self.current_base_epoch()?,
        })
    }

    /// Append a ledger entry with an explicit revision and base epoch.
    pub fn append_schema_version(&mut self, version: u32, base_epoch: u32) -> Result<()> {
        let today: i64 = Local::now()
            .format("%Y%m%d")
            .to_string()
            .parse()
            .expect("formatted date should parse as integer");

        self.conn.execute(
            "INSERT INTO database_versions (version, version_date, base_epoch) VALUES (?, ?, ?)",
            params![version, today, base_epoch],
        )?;

        Ok(())
    }

    /// Bump the schema version, invalidating all prior builds.
    pub fn bump(&mut self) -> Result<()> {
        let version = self.current_schema_version()?;
        let epoch = self.current_base_epoch()?;

        self.append_schema_version(version + 1, epoch)
    }

    /// Bump the schema version and the base epoch together.
    pub fn bump_epoch(&mut self) -> Result<()> {
        let version = self.current_schema_version()?;
        let epoch = self.current_base_epoch()?;

        self.append_schema_version(version + 1, epoch + 1)
    }

    /// Replace the `packages` snapshot with the given index and prune build
    /// history for packages no longer advertised upstream.
    pub fn update_package_versions(&mut self, index: &PackageIndex) -> Result<usize> {
        let txn = self.conn.transaction()?;

        txn.execute("DELETE FROM packages", [])?;

        {
            let mut statement = txn.prepare(
                "INSERT OR REPLACE INTO packages (package, latest_r_version) VALUES (?, ?)",
            )?;

            for entry in index.entries() {
                statement.execute(params![entry.name, entry.version])?;
            }
        }

        let pruned = txn.execute(
            "DELETE FROM builds WHERE package NOT IN (SELECT package FROM packages)",
            [],
        )?;

        txn.commit()?;

        Ok(pruned)
    }

    /// Packages whose latest build predates the current upstream version,
    /// schema version, or base epoch, or that have never been built.
    pub fn outdated_packages(&self, system: &str) -> Result<Vec<String>> {
        let mut statement = self.conn.prepare_cached(indoc! {"
            SELECT packages.package FROM packages
            LEFT OUTER JOIN (
                SELECT * FROM builds
                WHERE system = ?1
                AND id IN (SELECT max(id) FROM builds WHERE system = ?1 GROUP BY package)
            ) AS build
            ON build.package = packages.package
            WHERE build.package IS NULL
            OR build.db_version < (SELECT max(version) FROM database_versions)
            OR build.deb_epoch < (SELECT base_epoch FROM database_versions
                                  ORDER BY version DESC LIMIT 1)
            OR build.r_version != packages.latest_r_version
            ORDER BY packages.package ASC
        "})?;

        let res = statement.query_map(params![system], |row| row.get::<_, String>(0))?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All build attempts for a (package, system) pair, oldest first.
    pub fn package_builds(&self, package: &str, system: &str) -> Result<Vec<BuildRecord>> {
        let mut statement = self.conn.prepare_cached(&format!(
            "SELECT {} FROM builds WHERE package = ? AND system = ? ORDER BY id ASC",
            BUILD_COLUMNS
        ))?;

        let res = statement.query_map(params![package, system], BuildRecord::from_row)?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The epoch stored with the most recent build of (package, upstream
    /// version), if such a build exists.
    pub fn build_epoch(&self, package: &str, r_version: &str) -> Result<Option<u32>> {
        let mut statement = self.conn.prepare_cached(
            "SELECT deb_epoch FROM builds WHERE package = ? AND r_version = ? \
             ORDER BY id DESC LIMIT 1",
        )?;

        let mut rows = statement.query(params![package, r_version])?;

        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Rewrite the stored epoch for every build of (package, upstream
    /// version).
    pub fn set_build_epoch(&mut self, package: &str, r_version: &str, epoch: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE builds SET deb_epoch = ? WHERE package = ? AND r_version = ?",
            params![epoch, package, r_version],
        )?;

        Ok(())
    }

    /// Names of blacklisted packages.
    pub fn blacklisted_packages(&self) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT package FROM blacklist_packages ORDER BY package ASC")?;

        let res = statement.query_map([], |row| row.get::<_, String>(0))?;

        Ok(res.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether a package is blacklisted.
    pub fn is_blacklisted(&self, package: &str) -> Result<bool> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM blacklist_packages WHERE package = ?",
            params![package],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// Blacklist a package with an explanation for the record.
    pub fn blacklist_package(&mut self, package: &str, explanation: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blacklist_packages (package, other, explanation) \
             VALUES (?, 1, ?)",
            params![package, explanation],
        )?;

        Ok(())
    }
}

impl BuildRecordStore for DatabaseConnection {
    fn latest_build(&self, package: &str, system: &str) -> Result<Option<BuildRecord>> {
        let mut statement = self.conn.prepare_cached(&format!(
            "SELECT {} FROM builds WHERE package = ? AND system = ? ORDER BY id DESC LIMIT 1",
            BUILD_COLUMNS
        ))?;

        let mut rows = statement.query(params![package, system])?;

        match rows.next()? {
            Some(row) => Ok(Some(BuildRecord::from_row(row)?)),
            None => Ok(None),
        }
    }

    fn latest_build_version(
        &self,
        package: &str,
        system: &str,
    ) -> Result<Option<CranDebVersion>> {
        match self.latest_build(package, system)? {
            Some(build) => Ok(Some(build.version()?)),
            None => Ok(None),
        }
    }

    fn latest_upstream_version(&self, package: &str) -> Result<Option<String>> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT latest_r_version FROM packages WHERE package = ?")?;

        let mut rows = statement.query(params![package])?;

        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    fn record_build(&mut self, record: &BuildRecord) -> Result<()> {
        // Keep the tail of oversized logs; the interesting part of a failed
        // build is the end.
        let log = if record.log.len() > MAX_LOG_LEN {
            let mut start = record.log.len() - MAX_LOG_LEN;
            while !record.log.is_char_boundary(start) {
                start += 1;
            }

            &record.log[start..]
        } else {
            &record.log
        };

        self.conn.execute(
            indoc! {"
                INSERT OR IGNORE INTO builds
                (package, system, r_version, deb_epoch, deb_revision, db_version,
                 date_stamp, time_stamp, scm_revision, success, log)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "},
            params![
                record.package,
                record.system,
                record.r_version,
                record.deb_epoch,
                record.deb_revision,
                record.db_version,
                record.timestamp.format(DATE_FORMAT).to_string(),
                record.timestamp.format(TIME_FORMAT).to_string(),
                record.scm_revision,
                record.success as i64,
                log,
            ],
        )?;

        Ok(())
    }

    fn prune_builds(&mut self, keep: &HashSet<String>) -> Result<usize> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT DISTINCT package FROM builds")?;

        let known = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        drop(statement);

        let mut pruned = 0;

        for package in known {
            if !keep.contains(&package) {
                pruned += self
                    .conn
                    .execute("DELETE FROM builds WHERE package = ?", params![package])?;
            }
        }

        Ok(pruned)
    }
}
