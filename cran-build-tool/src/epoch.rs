// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Epoch reconciliation.

An operator can pin a package to an explicit Debian epoch
(`name=epoch:version`). The pin has to be reconciled against two independent
records: the epoch stored with that package's own build history, and the
global base epoch carried by the schema version ledger. [ensure_epoch]
performs the reconciliation; [with_epoch] scopes it to a single planning or
build operation and restores the prior state on every exit path, so a pin can
never leak into subsequent version computations.

This is a cooperative single-writer protocol. Concurrent callers mutating the
same package's epoch are not supported.
*/

use {
    crate::{
        db::DatabaseConnection,
        error::{Result, ToolError},
    },
    cran_packaging::package_ref::PackageRef,
};

/// Reconcile a package's requested epoch with stored state.
///
/// If the package has a build record at the pinned upstream version, that
/// record's epoch is rewritten in place. Otherwise the request is treated as
/// a global change and a new ledger entry carrying the requested base epoch
/// is appended. Either way the previous value is returned so the caller can
/// restore it; `None` means stored state already agreed and nothing was
/// written.
pub fn ensure_epoch(
    db: &mut DatabaseConnection,
    pkg: &PackageRef,
    requested: u32,
) -> Result<Option<u32>> {
    log::debug!("ensuring epoch {} for {}", requested, pkg.name());

    if let Some(r_version) = pkg.pinned_version() {
        if let Some(previous) = db.build_epoch(pkg.name(), r_version)? {
            if previous == requested {
                return Ok(None);
            }

            db.set_build_epoch(pkg.name(), r_version, requested)?;

            return Ok(Some(previous));
        }
    }

    // No per-package record matches, so this is a global epoch change.
    let previous = db.current_base_epoch()?;
    if previous == requested {
        return Ok(None);
    }

    let version = db.current_schema_version()?;
    db.append_schema_version(version + 1, requested)?;

    // Re-read what planning decisions will now observe. Anything other than
    // the just-written value means the ledger cannot be trusted.
    let actual = db.current_base_epoch()?;
    if actual != requested {
        return Err(ToolError::EpochLedgerInconsistent {
            expected: requested,
            actual,
        });
    }

    Ok(Some(previous))
}

/// Run `body` with the package's pinned epoch applied, restoring the previous
/// epoch afterwards.
///
/// The restore runs whether `body` succeeds or fails. A restore failure after
/// a successful body is reported as the error; a restore failure after a
/// failed body is logged and the body's error wins.
pub fn with_epoch<T>(
    db: &mut DatabaseConnection,
    pkg: &PackageRef,
    body: impl FnOnce(&mut DatabaseConnection) -> Result<T>,
) -> Result<T> {
    let previous = match pkg.pinned_epoch() {
        Some(epoch) => ensure_epoch(db, pkg, epoch)?,
        None => None,
    };

    let res = body(db);

    if let Some(previous) = previous {
        if let Err(restore_err) = ensure_epoch(db, pkg, previous) {
            if res.is_ok() {
                return Err(restore_err);
            }

            log::error!(
                "failed to restore epoch {} for {}: {}",
                previous,
                pkg.name(),
                restore_err
            );
        }
    }

    res
}
