//! Release artifact download and extraction

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fetches release archives into the pass's local work dir
///
/// `file://` URLs are copied, `http(s)://` URLs downloaded. The download is
/// a blocking call, which is fine on the single sequential worker a pass
/// runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseFetcher;

impl ReleaseFetcher {
    /// Create a new fetcher
    pub fn new() -> Self {
        Self
    }

    /// The file name a URL's path points at
    pub fn url_file_name(url: &str) -> Option<String> {
        let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        let path = without_scheme
            .split(['?', '#'])
            .next()
            .unwrap_or(without_scheme);
        let name = path.rsplit('/').next().unwrap_or("");
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// Fetch the archive, returning its local path
    ///
    /// The target file name comes from the URL, falling back to the
    /// conventional release archive name for the declared version.
    pub async fn fetch(&self, url: &str, version: &str, work_dir: &Path) -> Result<PathBuf> {
        let file_name = Self::url_file_name(url)
            .unwrap_or_else(|| format!("spire-{version}-linux-x86_64-glibc.tar.gz"));
        let target = work_dir.join(file_name);

        if let Some(src) = url.strip_prefix("file://") {
            debug!(src, target = %target.display(), "copying release archive");
            std::fs::copy(src, &target).map_err(|e| {
                Error::Artifact(format!("failed to copy release archive from {src}: {e}"))
            })?;
        } else if url.starts_with("http://") || url.starts_with("https://") {
            info!(url, "downloading release archive");
            let response = reqwest::blocking::get(url)
                .map_err(|e| Error::Artifact(format!("failed to download {url}: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::Artifact(format!(
                    "failed to download {url}: status {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .map_err(|e| Error::Artifact(format!("failed to read {url}: {e}")))?;
            std::fs::write(&target, &bytes)?;
        } else {
            return Err(Error::Artifact(format!("unsupported download url: {url}")));
        }
        Ok(target)
    }
}

/// Extract the single archive member whose path ends with `member_suffix`
///
/// Zero or multiple matches is fatal, carrying the full archive listing.
/// The member is unpacked next to the archive, preserving its relative
/// path, and the extracted file's path is returned.
pub fn extract_member(archive_path: &Path, member_suffix: &str) -> Result<PathBuf> {
    let list = |path: &Path| -> Result<Vec<String>> {
        let file = std::fs::File::open(path)?;
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut names = Vec::new();
        for entry in archive
            .entries()
            .map_err(|e| Error::Artifact(format!("unreadable archive {}: {e}", path.display())))?
        {
            let entry = entry
                .map_err(|e| Error::Artifact(format!("bad archive entry: {e}")))?;
            names.push(entry.path().map_or_else(
                |_| String::from("<non-utf8 path>"),
                |p| p.display().to_string(),
            ));
        }
        Ok(names)
    };

    let names = list(archive_path)?;
    let matching: Vec<&String> = names
        .iter()
        .filter(|name| name.ends_with(member_suffix))
        .collect();
    if matching.len() != 1 {
        return Err(Error::Artifact(format!(
            "could not find exactly one {member_suffix} member in {}: \
             matches={matching:?} content={names:?}",
            archive_path.display()
        )));
    }
    let member_name = matching[0].clone();

    let target_dir = archive_path
        .parent()
        .ok_or_else(|| Error::Artifact("archive path has no parent".to_string()))?;
    let target = spire_model::dirs::normalize_path(&target_dir.join(&member_name));
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    for entry in archive
        .entries()
        .map_err(|e| Error::Artifact(format!("unreadable archive: {e}")))?
    {
        let mut entry = entry.map_err(|e| Error::Artifact(format!("bad archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| Error::Artifact(format!("bad member path: {e}")))?
            .display()
            .to_string();
        if path == member_name {
            entry
                .unpack(&target)
                .map_err(|e| Error::Artifact(format!("failed to unpack {member_name}: {e}")))?;
            debug!(member = member_name, target = %target.display(), "extracted archive member");
            return Ok(target);
        }
    }
    Err(Error::Artifact(format!(
        "member {member_name} vanished from {}",
        archive_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            ReleaseFetcher::url_file_name(
                "https://github.com/spiffe/spire/releases/download/v0.10.0/spire-0.10.0-linux-x86_64-glibc.tar.gz"
            )
            .as_deref(),
            Some("spire-0.10.0-linux-x86_64-glibc.tar.gz")
        );
        assert_eq!(
            ReleaseFetcher::url_file_name("file:///tmp/spire.tar.gz?x=1").as_deref(),
            Some("spire.tar.gz")
        );
        assert_eq!(ReleaseFetcher::url_file_name("https://example.org/"), None);
    }

    fn build_archive(dir: &Path, members: &[(&str, &[u8])]) -> PathBuf {
        let archive_path = dir.join("spire-1.0.0-linux-x86_64-glibc.tar.gz");
        let file = std::fs::File::create(&archive_path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
        archive_path
    }

    #[test]
    fn test_extract_single_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            &[
                ("./spire-1.0.0/bin/spire-agent", b"agent-binary".as_slice()),
                ("./spire-1.0.0/bin/spire-server", b"server-binary".as_slice()),
            ],
        );
        let extracted = extract_member(&archive, "/bin/spire-agent").unwrap();
        assert_eq!(std::fs::read(&extracted).unwrap(), b"agent-binary");
        assert!(extracted.ends_with("spire-1.0.0/bin/spire-agent"));
    }

    #[test]
    fn test_extract_rejects_missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("./README.md", b"hi".as_slice())]);
        let err = extract_member(&archive, "/bin/spire-agent").unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
        assert!(err.to_string().contains("README.md"));
    }

    #[smol_potat::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("release.tar.gz");
        std::fs::write(&src, b"archive-bytes").unwrap();
        let work = tempfile::tempdir().unwrap();

        let fetcher = ReleaseFetcher::new();
        let url = format!("file://{}", src.display());
        let fetched = fetcher.fetch(&url, "1.0.0", work.path()).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"archive-bytes");
        assert!(fetched.ends_with("release.tar.gz"));
    }

    #[smol_potat::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let work = tempfile::tempdir().unwrap();
        let err = ReleaseFetcher::new()
            .fetch("ftp://example.org/spire.tar.gz", "1.0.0", work.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
    }
}
