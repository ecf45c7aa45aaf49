//! Package identity and archive inspection.
//!
//! A content package is a zip archive carrying its identity in
//! `META-INF/vault/properties.xml`, a Java properties file in XML form:
//!
//! ```text
//! <properties>
//!   <entry key="group">my_packages</entry>
//!   <entry key="name">site-content</entry>
//!   <entry key="version">1.0.2</entry>
//! </properties>
//! ```

use crate::config::PackmgrConfig;
use crate::{PackmgrError, Result};
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

const PROPERTIES_ENTRY: &str = "META-INF/vault/properties.xml";

/// Identity of a package: group, name, and optional version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackId {
    group: String,
    name: String,
    version: Option<String>,
}

impl PackId {
    /// Create a package identifier. The name must be non-empty and no part may
    /// contain a `/` outside the group.
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: Option<impl Into<String>>,
    ) -> Result<Self> {
        let group = group.into().trim_matches('/').to_string();
        let name = name.into();
        let version = version.map(Into::into).filter(|v: &String| !v.is_empty());

        if name.trim().is_empty() {
            return Err(PackmgrError::invalid_argument("name", "package name is empty"));
        }
        if name.contains('/') {
            return Err(PackmgrError::invalid_argument(
                "name",
                format!("package name {:?} contains '/'", name),
            ));
        }
        if let Some(version) = &version {
            if version.contains('/') {
                return Err(PackmgrError::invalid_argument(
                    "version",
                    format!("package version {:?} contains '/'", version),
                ));
            }
        }

        Ok(Self {
            group,
            name,
            version,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Repository path the server stores this package under, without extension.
    pub fn installation_path(&self) -> String {
        let mut path = String::from(PackmgrConfig::PACKAGE_ROOT);
        if !self.group.is_empty() {
            path.push('/');
            path.push_str(&self.group);
        }
        path.push('/');
        path.push_str(&self.name);
        if let Some(version) = &self.version {
            path.push('-');
            path.push_str(version);
        }
        path
    }

    /// Installation path with the archive extension, as used in service URLs.
    pub fn archive_path(&self) -> String {
        format!(
            "{}{}",
            self.installation_path(),
            PackmgrConfig::PACKAGE_EXTENSION
        )
    }
}

impl std::fmt::Display for PackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.group,
            self.name,
            self.version.as_deref().unwrap_or("")
        )
    }
}

fn entry_regex() -> &'static Regex {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY.get_or_init(|| {
        Regex::new(r#"<entry\s+key\s*=\s*["']([^"']+)["']\s*>([^<]*)</entry>"#)
            .expect("entry pattern is valid")
    })
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extract a `PackId` from the contents of a `properties.xml`.
///
/// Returns `None` when the document has no usable `name` entry.
pub fn parse_properties(xml: &str) -> Option<PackId> {
    let mut group = String::new();
    let mut name = None;
    let mut version = None;

    for captures in entry_regex().captures_iter(xml) {
        let value = unescape_xml(captures[2].trim());
        match &captures[1] {
            "group" => group = value,
            "name" => name = Some(value),
            "version" => version = Some(value),
            _ => {}
        }
    }

    PackId::new(group, name?, version).ok()
}

/// Identify a package archive from its metadata.
///
/// Returns `Ok(None)` for a readable zip that is not a package. A file that
/// can't be read is an `Io` error, and a file that isn't a zip is an
/// `InvalidPackage` error.
pub fn identify(path: &Path) -> Result<Option<PackId>> {
    let file = std::fs::File::open(path).map_err(|e| PackmgrError::io_with_path(e, path))?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| match e {
        zip::result::ZipError::Io(io) => PackmgrError::io_with_path(io, path),
        other => PackmgrError::InvalidPackage {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })?;

    let mut entry = match archive.by_name(PROPERTIES_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            debug!("{} has no {}", path.display(), PROPERTIES_ENTRY);
            return Ok(None);
        }
        Err(e) => {
            return Err(PackmgrError::InvalidPackage {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| PackmgrError::io_with_path(e, path))?;

    let id = parse_properties(&xml);
    debug!("Identified {} as {:?}", path.display(), id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(dir: &TempDir, file_name: &str, entries: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.path().join(file_name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    const PROPERTIES: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="no"?>
<!DOCTYPE properties SYSTEM "http://java.sun.com/dtd/properties.dtd">
<properties>
<comment>FileVault Package Properties</comment>
<entry key="description">Site content &amp; config</entry>
<entry key="group">my_packages</entry>
<entry key="name">site-content</entry>
<entry key="version">1.0.2</entry>
</properties>
"#;

    #[test]
    fn test_installation_path() {
        let id = PackId::new("my_packages", "site-content", Some("1.0.2")).unwrap();
        assert_eq!(
            id.installation_path(),
            "/etc/packages/my_packages/site-content-1.0.2"
        );
        assert_eq!(
            id.archive_path(),
            "/etc/packages/my_packages/site-content-1.0.2.zip"
        );
    }

    #[test]
    fn test_installation_path_without_group_or_version() {
        let id = PackId::new("", "bare", None::<String>).unwrap();
        assert_eq!(id.installation_path(), "/etc/packages/bare");

        let id = PackId::new("/nested/group/", "pkg", Some("")).unwrap();
        assert_eq!(id.installation_path(), "/etc/packages/nested/group/pkg");
        assert_eq!(id.version(), None);
    }

    #[test]
    fn test_new_rejects_empty_name() {
        let err = PackId::new("group", "  ", None::<String>).unwrap_err();
        assert!(matches!(err, PackmgrError::InvalidArgument { .. }));
    }

    #[test]
    fn test_display() {
        let id = PackId::new("g", "n", Some("1")).unwrap();
        assert_eq!(id.to_string(), "g:n:1");
    }

    #[test]
    fn test_parse_properties() {
        let id = parse_properties(PROPERTIES).unwrap();
        assert_eq!(id.group(), "my_packages");
        assert_eq!(id.name(), "site-content");
        assert_eq!(id.version(), Some("1.0.2"));
    }

    #[test]
    fn test_parse_properties_without_name() {
        assert!(parse_properties("<properties><entry key=\"group\">g</entry></properties>").is_none());
    }

    #[test]
    fn test_identify_package() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(
            &dir,
            "site-content.zip",
            &[
                ("META-INF/vault/properties.xml", PROPERTIES),
                ("jcr_root/content/site/.content.xml", "<jcr:root/>"),
            ],
        );

        let id = identify(&path).unwrap().unwrap();
        assert_eq!(id.to_string(), "my_packages:site-content:1.0.2");
    }

    #[test]
    fn test_identify_zip_that_is_not_a_package() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(&dir, "plain.zip", &[("readme.txt", "hello")]);
        assert_eq!(identify(&path).unwrap(), None);
    }

    #[test]
    fn test_identify_non_zip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "definitely not a zip").unwrap();

        let err = identify(&path).unwrap_err();
        assert!(matches!(err, PackmgrError::InvalidPackage { .. }));
    }

    #[test]
    fn test_identify_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = identify(&dir.path().join("missing.zip")).unwrap_err();
        assert!(matches!(err, PackmgrError::Io { path: Some(_), .. }));
    }
}
