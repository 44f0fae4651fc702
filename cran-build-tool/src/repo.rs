// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package repository clients.

Built packages are published twice: to a remote repository service speaking a
small HTTP API (JSON listing, multipart upload, removal by name) and to a
local apt repository managed with `reprepro`. Both are modeled by the
[PackageRepository] trait so orchestration code does not care which one it is
talking to.

Version presence checks compare on `(epoch, upstream, revision)`: listed
versions may carry an R interpreter tag and a `~<distribution>` suffix that
are not part of the version's ordering identity.
*/

use {
    crate::error::{Result, ToolError},
    async_trait::async_trait,
    cran_packaging::version::CranDebVersion,
    reqwest::{multipart, Client, IntoUrl, Url},
    serde::Deserialize,
    std::path::{Path, PathBuf},
    tokio::process::Command,
};

/// The identity of a published version for presence comparisons.
fn version_key(s: &str) -> Option<(u32, String, u32)> {
    let s = s.split('~').next().unwrap_or(s);

    CranDebVersion::parse(s)
        .ok()
        .map(|v| (v.epoch(), v.upstream_version().to_string(), v.revision()))
}

/// A repository that Debian packages can be published to and queried from.
#[async_trait]
pub trait PackageRepository: Sync {
    /// Version strings the repository advertises for a package name.
    async fn versions(&self, package: &str) -> Result<Vec<String>>;

    /// Publish a `.deb` file.
    async fn publish(&self, deb: &Path) -> Result<()>;

    /// Remove all versions of a package.
    async fn remove(&self, package: &str) -> Result<()>;

    /// Whether the repository already has this exact version of a package.
    async fn has_version(&self, package: &str, version: &CranDebVersion) -> Result<bool> {
        let wanted = version_key(&version.to_string());

        for listed in self.versions(package).await? {
            match version_key(&listed) {
                Some(key) if Some(&key) == wanted.as_ref() => return Ok(true),
                Some(_) => {}
                None => {
                    log::warn!(
                        "ignoring unparseable version {} listed for {}",
                        listed,
                        package
                    );
                }
            }
        }

        Ok(false)
    }
}

#[derive(Debug, Deserialize)]
struct ListedPackage {
    name: String,
    versions: Vec<String>,
}

/// Client for the remote package repository service.
#[derive(Debug)]
pub struct HttpPackageRepository {
    client: Client,
    root_url: Url,
    codename: String,
}

impl HttpPackageRepository {
    /// Construct an instance bound to the service base URL and a codename.
    pub fn new(url: impl IntoUrl, codename: impl ToString) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Trailing slashes are significant to Url::join().
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self {
            client: Client::default(),
            root_url,
            codename: codename.to_string(),
        })
    }

    async fn listing(&self) -> Result<Vec<ListedPackage>> {
        let url = self.root_url.join(&format!("list/{}", self.codename))?;

        let res = self.client.get(url).send().await?.error_for_status()?;

        Ok(res.json().await?)
    }
}

#[async_trait]
impl PackageRepository for HttpPackageRepository {
    async fn versions(&self, package: &str) -> Result<Vec<String>> {
        Ok(self
            .listing()
            .await?
            .into_iter()
            .filter(|listed| listed.name == package)
            .flat_map(|listed| listed.versions)
            .collect())
    }

    async fn publish(&self, deb: &Path) -> Result<()> {
        let url = self.root_url.join(&format!("add/{}", self.codename))?;

        let filename = deb
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "package.deb".to_string());

        log::info!("uploading {} to {}", filename, url);

        let content = tokio::fs::read(deb).await?;
        let form = multipart::Form::new()
            .part("deb-file", multipart::Part::bytes(content).file_name(filename.clone()));

        let res = self.client.post(url).multipart(form).send().await?;

        if !res.status().is_success() {
            return Err(ToolError::RepositoryRejected(
                filename,
                format!("upload returned status {}", res.status()),
            ));
        }

        Ok(())
    }

    async fn remove(&self, package: &str) -> Result<()> {
        let url = self
            .root_url
            .join(&format!("remove/{}/{}", self.codename, package))?;

        let res = self.client.get(url).send().await?;

        if !res.status().is_success() {
            return Err(ToolError::RepositoryRejected(
                package.to_string(),
                format!("removal returned status {}", res.status()),
            ));
        }

        Ok(())
    }
}

/// Parse one line of `reprepro list` output,
/// e.g. `rbuilders|main|amd64: r-cran-withr 2.1.2-1cran2`.
fn parse_list_line(line: &str) -> Option<(&str, &str)> {
    let (_, rest) = line.split_once(": ")?;

    rest.trim().split_once(' ')
}

/// A local apt repository managed via `reprepro`.
#[derive(Debug)]
pub struct LocalRepository {
    root: PathBuf,
    distribution: String,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>, distribution: impl ToString) -> Self {
        Self {
            root: root.into(),
            distribution: distribution.to_string(),
        }
    }

    async fn reprepro(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("reprepro")
            .current_dir(&self.root)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ToolError::CommandFailed(
                format!("reprepro {}", args.join(" ")),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl PackageRepository for LocalRepository {
    async fn versions(&self, package: &str) -> Result<Vec<String>> {
        let stdout = self
            .reprepro(&["-b", ".", "-T", "deb", "list", &self.distribution])
            .await?;

        Ok(stdout
            .lines()
            .filter_map(parse_list_line)
            .filter(|(name, _)| *name == package)
            .map(|(_, version)| version.to_string())
            .collect())
    }

    async fn publish(&self, deb: &Path) -> Result<()> {
        log::info!("adding {} to {}", deb.display(), self.root.display());

        self.reprepro(&[
            "--ignore=wrongdistribution",
            "--ignore=missingfile",
            "-b",
            ".",
            "includedeb",
            &self.distribution,
            &deb.to_string_lossy(),
        ])
        .await?;

        Ok(())
    }

    async fn remove(&self, package: &str) -> Result<()> {
        self.reprepro(&["-b", ".", "remove", &self.distribution, package])
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_keys_ignore_tag_and_distribution() {
        assert_eq!(
            version_key("2.1.2-1cran2R4.0~buster"),
            Some((0, "2.1.2".to_string(), 2))
        );
        assert_eq!(
            version_key("2.1.2-1cran2"),
            Some((0, "2.1.2".to_string(), 2))
        );
        assert_eq!(
            version_key("1:0.20-41-1cran1R4.0"),
            Some((1, "0.20-41".to_string(), 1))
        );
        assert_eq!(version_key("not-a-version"), None);
    }

    #[test]
    fn list_lines_parse() {
        assert_eq!(
            parse_list_line("rbuilders|main|amd64: r-cran-withr 2.1.2-1cran2"),
            Some(("r-cran-withr", "2.1.2-1cran2"))
        );
        assert_eq!(parse_list_line("garbage"), None);
    }

    #[tokio::test]
    async fn has_version_compares_on_key() -> Result<()> {
        struct Fixed;

        #[async_trait]
        impl PackageRepository for Fixed {
            async fn versions(&self, _package: &str) -> Result<Vec<String>> {
                Ok(vec![
                    "2.1.2-1cran2R4.0~buster".to_string(),
                    "mystery".to_string(),
                ])
            }

            async fn publish(&self, _deb: &Path) -> Result<()> {
                unimplemented!()
            }

            async fn remove(&self, _package: &str) -> Result<()> {
                unimplemented!()
            }
        }

        let present = CranDebVersion::parse("2.1.2-1cran2")?;
        let absent = CranDebVersion::parse("2.1.2-1cran3")?;

        assert!(Fixed.has_version("r-cran-withr", &present).await?);
        assert!(!Fixed.has_version("r-cran-withr", &absent).await?);

        Ok(())
    }
}
