//! Artifact layouts and coordinates
//!
//! A layout maps relative artifact paths to layout-specific coordinates and
//! classifies metadata and checksum files. The canonical string form of
//! `ArtifactCoordinates` is the de-duplication key used when aggregating
//! results across group members.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Repository layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `groupId/as/dirs/artifactId/version/artifactId-version[-classifier].ext`
    #[default]
    Maven2,

    /// `[@scope/]name/version/name-version.tgz`
    Npm,

    /// `Id/Version/Id.Version.nupkg`
    NuGet,

    /// Opaque paths, the path is the identity
    Raw,
}

/// Checksum sidecar algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 2] = [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha1];

    /// File extension of the sidecar (without dot)
    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
        }
    }

    /// Split a checksum path into the artifact base path and algorithm
    pub fn split(path: &str) -> Option<(&str, ChecksumAlgorithm)> {
        Self::ALL.into_iter().find_map(|alg| {
            path.strip_suffix(alg.extension())
                .and_then(|rest| rest.strip_suffix('.'))
                .filter(|base| !base.is_empty() && !base.ends_with('/'))
                .map(|base| (base, alg))
        })
    }

    /// Sidecar path for an artifact path
    pub fn sidecar(&self, path: &str) -> String {
        format!("{}.{}", path, self.extension())
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => f.write_str("MD5"),
            ChecksumAlgorithm::Sha1 => f.write_str("SHA-1"),
        }
    }
}

/// Layout-specific artifact identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactCoordinates {
    Maven {
        group_id: String,
        artifact_id: String,
        version: String,
        classifier: Option<String>,
        extension: String,
    },
    Npm {
        scope: Option<String>,
        name: String,
        version: String,
        extension: String,
    },
    NuGet {
        id: String,
        version: String,
        extension: String,
    },
    Raw {
        path: String,
    },
}

impl ArtifactCoordinates {
    /// Version component, if the layout has one
    pub fn version(&self) -> Option<&str> {
        match self {
            ArtifactCoordinates::Maven { version, .. }
            | ArtifactCoordinates::Npm { version, .. }
            | ArtifactCoordinates::NuGet { version, .. } => Some(version),
            ArtifactCoordinates::Raw { .. } => None,
        }
    }
}

impl fmt::Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactCoordinates::Maven {
                group_id,
                artifact_id,
                version,
                classifier,
                extension,
            } => match classifier {
                Some(classifier) => write!(
                    f,
                    "{}:{}:{}:{}:{}",
                    group_id, artifact_id, version, classifier, extension
                ),
                None => write!(f, "{}:{}:{}:{}", group_id, artifact_id, version, extension),
            },
            ArtifactCoordinates::Npm {
                scope,
                name,
                version,
                extension,
            } => match scope {
                Some(scope) => write!(f, "@{}/{}@{}:{}", scope, name, version, extension),
                None => write!(f, "{}@{}:{}", name, version, extension),
            },
            ArtifactCoordinates::NuGet {
                id,
                version,
                extension,
            } => write!(f, "{}:{}:{}", id, version, extension),
            ArtifactCoordinates::Raw { path } => f.write_str(path),
        }
    }
}

impl Layout {
    /// Layout alias as used in configuration
    pub fn alias(&self) -> &'static str {
        match self {
            Layout::Maven2 => "maven2",
            Layout::Npm => "npm",
            Layout::NuGet => "nuget",
            Layout::Raw => "raw",
        }
    }

    /// Whether the path is a checksum sidecar
    pub fn is_checksum(&self, path: &str) -> bool {
        ChecksumAlgorithm::split(path).is_some()
    }

    /// Whether the path is a layout metadata file
    pub fn is_metadata(&self, path: &str) -> bool {
        let name = file_name(path);
        match self {
            Layout::Maven2 => name == "maven-metadata.xml",
            Layout::Npm => name == "package.json",
            Layout::NuGet => name.ends_with(".nuspec"),
            Layout::Raw => false,
        }
    }

    /// Whether the path belongs to a snapshot / prerelease version
    pub fn is_snapshot(&self, path: &str) -> bool {
        match self {
            Layout::Maven2 => path.split('/').any(|segment| segment.ends_with("-SNAPSHOT")),
            Layout::Npm => match self.coordinates(path) {
                Some(ArtifactCoordinates::Npm { version, .. }) => semver::Version::parse(&version)
                    .map(|v| !v.pre.is_empty())
                    .unwrap_or(false),
                _ => false,
            },
            Layout::NuGet => match self.coordinates(path) {
                Some(ArtifactCoordinates::NuGet { version, .. }) => version.contains('-'),
                _ => false,
            },
            Layout::Raw => false,
        }
    }

    /// Parse artifact coordinates from a relative path
    ///
    /// Returns `None` for checksum files, metadata files and paths that do
    /// not follow the layout.
    pub fn coordinates(&self, path: &str) -> Option<ArtifactCoordinates> {
        if path.is_empty() || self.is_checksum(path) || self.is_metadata(path) {
            return None;
        }

        match self {
            Layout::Maven2 => maven_coordinates(path),
            Layout::Npm => npm_coordinates(path),
            Layout::NuGet => nuget_coordinates(path),
            Layout::Raw => Some(ArtifactCoordinates::Raw {
                path: path.to_string(),
            }),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn maven_coordinates(path: &str) -> Option<ArtifactCoordinates> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 4 {
        return None;
    }

    let n = segments.len();
    let file = segments[n - 1];
    let version_dir = segments[n - 2];
    let artifact_id = segments[n - 3];
    let group_id = segments[..n - 3].join(".");

    let rest = file.strip_prefix(artifact_id)?.strip_prefix('-')?;
    let version_len = match version_dir.strip_suffix("-SNAPSHOT") {
        Some(base) => snapshot_version_len(rest, base, version_dir)?,
        None if rest.starts_with(version_dir) => version_dir.len(),
        None => return None,
    };
    let version = &rest[..version_len];
    let tail = &rest[version_len..];

    let (classifier, extension) = if let Some(tail) = tail.strip_prefix('-') {
        let (classifier, extension) = tail.split_once('.')?;
        (Some(classifier.to_string()), extension)
    } else {
        (None, tail.strip_prefix('.')?)
    };

    if extension.is_empty() || classifier.as_deref() == Some("") {
        return None;
    }

    Some(ArtifactCoordinates::Maven {
        group_id,
        artifact_id: artifact_id.to_string(),
        version: version.to_string(),
        classifier,
        extension: extension.to_string(),
    })
}

/// Length of the snapshot version at the start of `rest`
///
/// Accepts both `1.0-SNAPSHOT` and timestamped `1.0-20240101.120000-3`.
fn snapshot_version_len(rest: &str, base: &str, version_dir: &str) -> Option<usize> {
    if rest.starts_with(version_dir) {
        return Some(version_dir.len());
    }

    let stamp = rest.strip_prefix(base)?.strip_prefix('-')?;
    let bytes = stamp.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        bytes.len() >= range.end && bytes[range].iter().all(u8::is_ascii_digit)
    };
    if !(digits(0..8) && bytes.get(8) == Some(&b'.') && digits(9..15) && bytes.get(15) == Some(&b'-'))
    {
        return None;
    }

    let build = bytes[16..].iter().take_while(|b| b.is_ascii_digit()).count();
    if build == 0 {
        return None;
    }
    Some(base.len() + 1 + 16 + build)
}

fn npm_coordinates(path: &str) -> Option<ArtifactCoordinates> {
    let segments: Vec<&str> = path.split('/').collect();
    let (scope, rest) = match segments.first() {
        Some(first) if first.starts_with('@') => (Some(first[1..].to_string()), &segments[1..]),
        Some(_) => (None, &segments[..]),
        None => return None,
    };

    let [name, version, file] = rest else {
        return None;
    };
    semver::Version::parse(version).ok()?;

    let extension = file
        .strip_prefix(name)?
        .strip_prefix('-')?
        .strip_prefix(version)?
        .strip_prefix('.')?;
    if extension.is_empty() || scope.as_deref() == Some("") {
        return None;
    }

    Some(ArtifactCoordinates::Npm {
        scope,
        name: name.to_string(),
        version: version.to_string(),
        extension: extension.to_string(),
    })
}

fn nuget_coordinates(path: &str) -> Option<ArtifactCoordinates> {
    let segments: Vec<&str> = path.split('/').collect();
    let [id, version, file] = segments.as_slice() else {
        return None;
    };

    let extension = file
        .strip_prefix(id)?
        .strip_prefix('.')?
        .strip_prefix(version)?
        .strip_prefix('.')?;
    if extension.is_empty() {
        return None;
    }

    Some(ArtifactCoordinates::NuGet {
        id: id.to_string(),
        version: version.to_string(),
        extension: extension.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maven_coordinates() {
        let coords = Layout::Maven2
            .coordinates("com/artifacts/in/releases/foo/1.2.3/foo-1.2.3.jar")
            .unwrap();
        assert_eq!(
            coords,
            ArtifactCoordinates::Maven {
                group_id: "com.artifacts.in.releases".to_string(),
                artifact_id: "foo".to_string(),
                version: "1.2.3".to_string(),
                classifier: None,
                extension: "jar".to_string(),
            }
        );
        assert_eq!(coords.to_string(), "com.artifacts.in.releases:foo:1.2.3:jar");

        let sources = Layout::Maven2
            .coordinates("org/foo/bar/1.0/bar-1.0-sources.jar")
            .unwrap();
        assert_eq!(sources.to_string(), "org.foo:bar:1.0:sources:jar");

        let tarball = Layout::Maven2
            .coordinates("org/foo/bar/1.0/bar-1.0.tar.gz")
            .unwrap();
        assert_eq!(tarball.to_string(), "org.foo:bar:1.0:tar.gz");
    }

    #[test]
    fn test_maven_snapshot_coordinates() {
        let plain = Layout::Maven2
            .coordinates("org/foo/bar/1.0-SNAPSHOT/bar-1.0-SNAPSHOT.jar")
            .unwrap();
        assert_eq!(plain.version(), Some("1.0-SNAPSHOT"));

        let stamped = Layout::Maven2
            .coordinates("org/foo/bar/1.0-SNAPSHOT/bar-1.0-20240101.120000-3-tests.jar")
            .unwrap();
        assert_eq!(stamped.to_string(), "org.foo:bar:1.0-20240101.120000-3:tests:jar");

        assert!(Layout::Maven2.is_snapshot("org/foo/bar/1.0-SNAPSHOT/bar-1.0-SNAPSHOT.jar"));
        assert!(!Layout::Maven2.is_snapshot("org/foo/bar/1.0/bar-1.0.jar"));
    }

    #[test]
    fn test_maven_rejects_non_artifacts() {
        assert!(Layout::Maven2.coordinates("org/foo/bar/1.0/bar-1.0.jar.sha1").is_none());
        assert!(Layout::Maven2.coordinates("org/foo/bar/maven-metadata.xml").is_none());
        assert!(Layout::Maven2.coordinates("org/foo/bar/1.0/other-1.0.jar").is_none());
        assert!(Layout::Maven2.coordinates("bar/1.0/bar-1.0.jar").is_none());
    }

    #[test]
    fn test_npm_coordinates() {
        let scoped = Layout::Npm
            .coordinates("@types/node/18.0.0/node-18.0.0.tgz")
            .unwrap();
        assert_eq!(scoped.to_string(), "@types/node@18.0.0:tgz");

        let plain = Layout::Npm.coordinates("lodash/4.17.21/lodash-4.17.21.tgz").unwrap();
        assert_eq!(plain.version(), Some("4.17.21"));

        assert!(Layout::Npm.coordinates("lodash/latest/lodash-latest.tgz").is_none());
        assert!(Layout::Npm.is_metadata("lodash/package.json"));
        assert!(Layout::Npm.is_snapshot("react/19.0.0-rc.1/react-19.0.0-rc.1.tgz"));
    }

    #[test]
    fn test_nuget_coordinates() {
        let coords = Layout::NuGet
            .coordinates("Newtonsoft.Json/13.0.1/Newtonsoft.Json.13.0.1.nupkg")
            .unwrap();
        assert_eq!(coords.to_string(), "Newtonsoft.Json:13.0.1:nupkg");
        assert!(Layout::NuGet.is_metadata("Newtonsoft.Json/13.0.1/Newtonsoft.Json.nuspec"));
        assert!(Layout::NuGet.is_snapshot("Foo/1.0.0-beta/Foo.1.0.0-beta.nupkg"));
    }

    #[test]
    fn test_checksum_split() {
        assert_eq!(
            ChecksumAlgorithm::split("a/b/c.jar.sha1"),
            Some(("a/b/c.jar", ChecksumAlgorithm::Sha1))
        );
        assert_eq!(
            ChecksumAlgorithm::split("a/b/c.jar.md5"),
            Some(("a/b/c.jar", ChecksumAlgorithm::Md5))
        );
        assert_eq!(ChecksumAlgorithm::split("a/b/c.jar"), None);
        assert_eq!(ChecksumAlgorithm::split("a/.sha1"), None);
        assert_eq!(ChecksumAlgorithm::Md5.sidecar("a/b.jar"), "a/b.jar.md5");
    }
}
