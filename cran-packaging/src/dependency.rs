// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! R package dependency parsing and ordering.

R packages declare relationships in `Depends`, `Imports` and `LinkingTo`
fields using entries like `gtable (>= 0.1.1)`. This module parses those
fields and computes the build order for a single package's transitive
dependency closure. General dependency-graph resolution is out of scope;
the only consumer is a build pipeline that needs "everything `pkg` needs,
dependencies first".
*/

use {
    crate::{
        error::{CranPackagingError, Result},
        index::{IndexEntry, PackageIndex},
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::{HashSet, VecDeque},
};

/// One entry in an R dependency field.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RDependency {
    /// Name of the required package (`R` refers to the interpreter itself).
    pub name: String,

    /// Version constraint, e.g. `>= 0.1.1`, if stated.
    pub constraint: Option<String>,
}

/// Dependency fields consulted when walking the graph.
///
/// `Suggests` is deliberately absent: suggested packages are not needed to
/// build or install.
pub const DEPEND_FIELDS: &[DependField] =
    &[DependField::Depends, DependField::Imports, DependField::LinkingTo];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DependField {
    Depends,
    Imports,
    LinkingTo,
    Suggests,
}

impl DependField {
    fn get<'a>(&self, entry: &'a IndexEntry) -> Option<&'a str> {
        match self {
            Self::Depends => entry.depends.as_deref(),
            Self::Imports => entry.imports.as_deref(),
            Self::LinkingTo => entry.linking_to.as_deref(),
            Self::Suggests => entry.suggests.as_deref(),
        }
    }
}

static DEPENDENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^ ()]+) ?(?:\( ?([<=>!]+ ?[0-9.-]+) ?\))?$").expect("regex should compile"));

/// Parse a single dependency entry, e.g. `gtable (>= 0.1.1)`.
pub fn parse_dependency(dep: &str) -> Result<RDependency> {
    let dep = dep.trim();

    // Comments and empty parentheses occasionally appear in the wild;
    // anything parenthesized that is not a version constraint is dropped.
    let dep = dep
        .split_once('(')
        .filter(|(_, rest)| {
            !rest
                .trim_start()
                .starts_with(|c| matches!(c, '<' | '=' | '>' | '!'))
        })
        .map(|(head, _)| head.trim())
        .unwrap_or(dep);

    let caps = DEPENDENCY_RE
        .captures(dep)
        .ok_or_else(|| CranPackagingError::DependencyParse(dep.to_string()))?;

    Ok(RDependency {
        name: caps
            .get(1)
            .expect("capture group 1 is not optional")
            .as_str()
            .to_string(),
        constraint: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

/// Parse a comma-separated dependency field.
pub fn parse_dependency_field(field: &str) -> Result<Vec<RDependency>> {
    field
        .split(',')
        .map(|dep| dep.trim())
        .filter(|dep| !dep.is_empty())
        .map(parse_dependency)
        .collect()
}

/// Immediate dependencies of one package per the index.
///
/// The interpreter (`R`) and packages shipping with it are not R packages to
/// build, so they are filtered out. Packages absent from the index depend on
/// nothing.
pub fn dependencies_of(
    index: &PackageIndex,
    name: &str,
    base_packages: &HashSet<String>,
) -> Result<Vec<RDependency>> {
    if name == "R" || base_packages.contains(name) {
        return Ok(vec![]);
    }

    let entry = match index.get(name) {
        Some(entry) => entry,
        None => return Ok(vec![]),
    };

    let mut deps = Vec::new();

    for field in DEPEND_FIELDS {
        if let Some(value) = field.get(entry) {
            for dep in parse_dependency_field(value)? {
                if dep.name != "R" && !base_packages.contains(&dep.name) {
                    deps.push(dep);
                }
            }
        }
    }

    Ok(deps)
}

/// Packages whose dependency fields name `name` directly.
pub fn dependents_of(
    index: &PackageIndex,
    name: &str,
    base_packages: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut dependents = Vec::new();

    for entry in index.entries() {
        for dep in dependencies_of(index, &entry.name, base_packages)? {
            if dep.name == name {
                dependents.push(entry.name.clone());
                break;
            }
        }
    }

    Ok(dependents)
}

/// The transitive dependency closure of one package, in build order.
///
/// The returned list ends with the requested package itself; everything a
/// package needs appears before it. Duplicate discoveries keep their first
/// (shallowest) position, and already-visited packages are not re-expanded,
/// which also terminates the walk on cyclic metadata.
pub fn dependency_build_order(
    index: &PackageIndex,
    name: &str,
    base_packages: &HashSet<String>,
) -> Result<Vec<String>> {
    walk_closure(index, name, base_packages, |index, name, base| {
        Ok(dependencies_of(index, name, base)?
            .into_iter()
            .map(|dep| dep.name)
            .collect())
    })
}

/// The transitive reverse closure: every package whose build is blocked when
/// `name` fails.
pub fn blocked_by_failure(
    index: &PackageIndex,
    name: &str,
    base_packages: &HashSet<String>,
) -> Result<Vec<String>> {
    let closure = walk_closure(index, name, base_packages, dependents_of)?;

    // The failed package is not blocked by itself.
    Ok(closure.into_iter().filter(|p| p != name).collect())
}

fn walk_closure(
    index: &PackageIndex,
    name: &str,
    base_packages: &HashSet<String>,
    neighbors: impl Fn(&PackageIndex, &str, &HashSet<String>) -> Result<Vec<String>>,
) -> Result<Vec<String>> {
    let mut fringe = VecDeque::from([name.to_string()]);
    let mut visited = HashSet::new();
    let mut closure = Vec::new();

    while let Some(top) = fringe.pop_front() {
        if top == "R" || base_packages.contains(&top) || !visited.insert(top.clone()) {
            continue;
        }

        fringe.extend(neighbors(index, &top, base_packages)?);
        closure.push(top);
    }

    closure.reverse();

    Ok(closure)
}
