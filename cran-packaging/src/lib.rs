// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CRAN to Debian packaging primitives.

This crate defines pure Rust implementations of the primitives needed to turn
CRAN/Bioconductor R source packages into Debian packages: version strings,
package references, package naming, upstream index parsing, and dependency
walking. There is no I/O beyond reading index documents from a caller-supplied
reader; build orchestration and persistence live in consuming tools.

# A Tour of Functionality

The [version] module implements the composite version scheme used for
generated packages (`[epoch:]upstream-1cran<revision>[R<major.minor>]`).
[version::CranDebVersion] is the main type: it parses, renders, and orders
version strings and enforces the grammar R upstream versions must satisfy to
be expressible as Debian versions.

The [package_ref] module defines [package_ref::PackageRef], the typed form of
the `name`, `name=version`, and `name=epoch:version` references operators use
to request builds and pin versions or epochs.

The [index] module reads `PACKAGES` documents published by CRAN-style
repositories (Debian control field syntax) into a [index::PackageIndex]
snapshot of the available packages and their metadata.

The [dependency] module parses R dependency fields (`gtable (>= 0.1.1)`) and
computes the build order for a single package's transitive closure, plus the
reverse closure used to report what a failed build blocks.

The [naming] module maps R package names onto Debian source and binary
package names (`r-cran-ggplot2` and friends).
*/

pub mod dependency;
pub mod error;
pub mod index;
pub mod naming;
pub mod package_ref;
pub mod version;
