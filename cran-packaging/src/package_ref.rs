// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package references with optional version and epoch pins.

Operators name packages to build with a small grammar:

* `name` builds whatever the upstream index says is current.
* `name=version` pins the upstream version, e.g. `mvtnorm=1.0-8`.
* `name=epoch:version` additionally pins the Debian epoch, e.g.
  `mvtnorm=2:1.0-8`.

A pinned epoch of 0 is meaningless (0 is the absence of an epoch) and
normalizes to no pin.
*/

use {
    crate::error::{CranPackagingError, Result},
    std::{
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A reference to an R package, optionally pinned to a version and epoch.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageRef {
    name: String,
    pinned_version: Option<String>,
    pinned_epoch: Option<u32>,
}

impl PackageRef {
    /// Construct a reference with no pins.
    pub fn unpinned(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            pinned_version: None,
            pinned_epoch: None,
        }
    }

    /// Construct a reference pinned to an upstream version.
    pub fn pinned(name: impl ToString, version: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            pinned_version: Some(version.to_string()),
            pinned_epoch: None,
        }
    }

    /// The R package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pinned upstream version, if any.
    pub fn pinned_version(&self) -> Option<&str> {
        self.pinned_version.as_deref()
    }

    /// The pinned Debian epoch, if any. Never `Some(0)`.
    pub fn pinned_epoch(&self) -> Option<u32> {
        self.pinned_epoch
    }
}

impl FromStr for PackageRef {
    type Err = CranPackagingError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, pin) = match s.split_once('=') {
            Some((name, pin)) => (name, Some(pin)),
            None => (s, None),
        };

        if name.is_empty() {
            return Err(CranPackagingError::PackageRefInvalid(s.to_string()));
        }

        let (pinned_epoch, pinned_version) = match pin {
            None => (None, None),
            Some(pin) => {
                // `name=version` pins an exact version; relational operators
                // belong to dependency expressions, not references.
                if pin.is_empty() || pin.chars().any(|c| matches!(c, '<' | '>' | '=')) {
                    return Err(CranPackagingError::PackageRefConstraint(s.to_string()));
                }

                match pin.split_once(':') {
                    Some((epoch, version)) => {
                        if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                            return Err(CranPackagingError::EpochNonNumeric(s.to_string()));
                        }

                        if version.is_empty() {
                            return Err(CranPackagingError::PackageRefInvalid(s.to_string()));
                        }

                        let epoch = u32::from_str(epoch)?;

                        (
                            if epoch == 0 { None } else { Some(epoch) },
                            Some(version.to_string()),
                        )
                    }
                    None => (None, Some(pin.to_string())),
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            pinned_version,
            pinned_epoch,
        })
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;

        if let Some(version) = &self.pinned_version {
            write!(f, "=")?;

            if let Some(epoch) = self.pinned_epoch {
                write!(f, "{}:", epoch)?;
            }

            write!(f, "{}", version)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_name() -> Result<()> {
        let r = PackageRef::from_str("ggplot2")?;
        assert_eq!(r.name(), "ggplot2");
        assert_eq!(r.pinned_version(), None);
        assert_eq!(r.pinned_epoch(), None);

        Ok(())
    }

    #[test]
    fn pinned_version() -> Result<()> {
        let r = PackageRef::from_str("mvtnorm=1.0-8")?;
        assert_eq!(r.name(), "mvtnorm");
        assert_eq!(r.pinned_version(), Some("1.0-8"));
        assert_eq!(r.pinned_epoch(), None);

        Ok(())
    }

    #[test]
    fn pinned_epoch_and_version() -> Result<()> {
        let r = PackageRef::from_str("mvtnorm=2:1.0-8")?;
        assert_eq!(r.name(), "mvtnorm");
        assert_eq!(r.pinned_version(), Some("1.0-8"));
        assert_eq!(r.pinned_epoch(), Some(2));

        Ok(())
    }

    #[test]
    fn zero_epoch_normalizes_to_none() -> Result<()> {
        let r = PackageRef::from_str("mvtnorm=0:1.0-8")?;
        assert_eq!(r.pinned_version(), Some("1.0-8"));
        assert_eq!(r.pinned_epoch(), None);

        Ok(())
    }

    #[test]
    fn rejects_relational_operators() {
        assert!(matches!(
            PackageRef::from_str("foo=>1.0"),
            Err(CranPackagingError::PackageRefConstraint(_))
        ));
        assert!(matches!(
            PackageRef::from_str("foo=1.0=2.0"),
            Err(CranPackagingError::PackageRefConstraint(_))
        ));
    }

    #[test]
    fn rejects_empty_components() {
        assert!(PackageRef::from_str("=1.0").is_err());
        assert!(PackageRef::from_str("foo=").is_err());
        assert!(PackageRef::from_str("foo=2:").is_err());
        assert!(PackageRef::from_str("foo=x:1.0").is_err());
    }

    #[test]
    fn display_round_trips() -> Result<()> {
        for s in ["ggplot2", "mvtnorm=1.0-8", "mvtnorm=2:1.0-8"] {
            assert_eq!(PackageRef::from_str(s)?.to_string(), s);
        }

        Ok(())
    }
}
