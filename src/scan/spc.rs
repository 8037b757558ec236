//! The SPC package format.
//!
//! ```text
//! net/curl/
//! ├── info        # key: value metadata (required)
//! ├── deps        # one dependency per line (optional)
//! ├── ndmake.sh   # build recipe; its line count is reported
//! ├── README.md   # rendered on the package page (optional)
//! └── BROKEN      # marker file: package is known broken
//! ```
//!
//! `info` keys: `version`, `release`, `description`, `license`, `upstream`,
//! `maintainer`, `provides` (comma separated). Blank lines and `#` comments
//! are ignored, as are unknown keys. A maintainer of `-` marks the package
//! unmaintained. `${VERSION}`, `${NAME}`, `${COMMIT}`, `${RELEASE}` and
//! `${RELEASE_TAG}` are expanded in `upstream`.
//!
//! `deps` lines are prefix-coded: `.name` build, `>name` run, `/name` or a
//! bare `name` link.

use super::{PackageFormat, Parser, ScanError};
use crate::digest::digest_dir;
use crate::model::{DepKind, Dependency, Port};
use crate::registry::Registry;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

pub struct SpcParser {
    registry: Arc<Registry>,
}

impl SpcParser {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Parser for SpcParser {
    fn format(&self) -> PackageFormat {
        PackageFormat::Spc
    }

    fn parse(&self, category: &str, name: &str) -> Result<Port, ScanError> {
        let dir = self.registry.port_dir(category, name);

        let info = fs::read_to_string(dir.join("info")).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ScanError::MissingFile {
                dir: dir.clone(),
                file: "info",
            },
            _ => ScanError::Io(e),
        })?;

        let mut port = Port {
            name: name.to_string(),
            category: category.to_string(),
            digest: Some(digest_dir(&dir)?),
            ..Default::default()
        };
        apply_info(&mut port, &info);

        match fs::read_to_string(dir.join("deps")) {
            Ok(deps) => port.deps = parse_deps(&deps),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        port.upstream = expand_variables(
            &port.upstream,
            &[
                ("VERSION", port.version.as_str()),
                ("NAME", port.name.as_str()),
                ("COMMIT", port.version.as_str()),
                ("RELEASE", port.release.as_str()),
                ("RELEASE_TAG", port.release.as_str()),
            ],
        );

        port.recipe_lines = count_lines(&dir.join("ndmake.sh")).unwrap_or(0);
        port.readme = fs::read_to_string(dir.join("README.md")).ok();
        port.broken = dir.join("BROKEN").exists();
        port.dir = dir;
        Ok(port)
    }
}

fn apply_info(port: &mut Port, info: &str) {
    for line in info.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "version" => port.version = value.to_string(),
            "release" => port.release = value.to_string(),
            "description" => port.description = value.to_string(),
            "license" => port.license = value.to_string(),
            "upstream" => port.upstream = value.to_string(),
            "maintainer" if value == "-" => {
                port.unmaintained = true;
                port.maintainer.clear();
            }
            "maintainer" => port.maintainer = strip_markdown_links(value),
            "provides" => port
                .provides
                .extend(value.split(',').map(|p| p.trim().to_string())),
            _ => {}
        }
    }
}

pub fn parse_deps(text: &str) -> Vec<Dependency> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|line| {
            let (kind, name) = if let Some(rest) = line.strip_prefix('.') {
                (DepKind::Build, rest)
            } else if let Some(rest) = line.strip_prefix('>') {
                (DepKind::Run, rest)
            } else if let Some(rest) = line.strip_prefix('/') {
                (DepKind::Link, rest)
            } else {
                (DepKind::Link, line)
            };
            Dependency {
                name: name.trim().to_string(),
                kind,
            }
        })
        .collect()
}

/// Replace `${KEY}` occurrences with their values.
pub fn expand_variables(text: &str, vars: &[(&str, &str)]) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

/// `[text](url)` becomes `text`; everything else is kept.
pub fn strip_markdown_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let link = after.find("](").and_then(|close| {
            let label = &after[..close];
            let url = &after[close + 2..];
            url.find(')')
                .filter(|_| !label.contains(']'))
                .map(|end| (label, close + 2 + end + 1))
        });
        match link {
            Some((label, consumed)) => {
                out.push_str(&rest[..open]);
                out.push_str(label);
                rest = &after[consumed..];
            }
            None => {
                out.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn count_lines(path: &Path) -> io::Result<usize> {
    Ok(fs::read_to_string(path)?.lines().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::test_helpers::write_port;
    use tempfile::TempDir;

    fn parser(root: &Path) -> SpcParser {
        let config = SiteConfig {
            ports_path: root.to_string_lossy().into_owned(),
            ..SiteConfig::default()
        };
        SpcParser::new(Arc::new(Registry::new(&config)))
    }

    #[test]
    fn parses_info_fields() {
        let tmp = TempDir::new().unwrap();
        write_port(
            tmp.path(),
            "net",
            "curl",
            "# comment\n\
             version: 8.5.0\n\
             release: 2\n\
             description: URL transfer tool: libcurl and cli\n\
             license: MIT, curl\n\
             upstream: https://curl.se/download/curl-${VERSION}.tar.xz\n\
             maintainer: [Jane Roe](https://example.org/jane)\n\
             provides: libcurl, curl-bin\n\
             homepage: ignored\n",
            "",
        );
        let port = parser(tmp.path()).parse("net", "curl").unwrap();
        assert_eq!(port.version, "8.5.0");
        assert_eq!(port.release, "2");
        assert_eq!(port.description, "URL transfer tool: libcurl and cli");
        assert_eq!(port.license, "MIT, curl");
        assert_eq!(port.upstream, "https://curl.se/download/curl-8.5.0.tar.xz");
        assert_eq!(port.maintainer, "Jane Roe");
        assert_eq!(port.provides, vec!["libcurl", "curl-bin"]);
        assert!(!port.unmaintained);
        assert!(port.digest.is_some());
    }

    #[test]
    fn dash_maintainer_means_unmaintained() {
        let tmp = TempDir::new().unwrap();
        write_port(tmp.path(), "net", "old", "version: 1\nmaintainer: -", "");
        let port = parser(tmp.path()).parse("net", "old").unwrap();
        assert!(port.unmaintained);
        assert_eq!(port.maintainer, "");
    }

    #[test]
    fn deps_prefixes() {
        let deps = parse_deps("# header\n.cmake\n>ca-certificates\n/openssl\nzlib\n\n");
        let got: Vec<(&str, DepKind)> = deps.iter().map(|d| (d.name.as_str(), d.kind)).collect();
        assert_eq!(
            got,
            vec![
                ("cmake", DepKind::Build),
                ("ca-certificates", DepKind::Run),
                ("openssl", DepKind::Link),
                ("zlib", DepKind::Link),
            ]
        );
    }

    #[test]
    fn broken_marker_recipe_and_readme() {
        let tmp = TempDir::new().unwrap();
        let dir = write_port(tmp.path(), "net", "curl", "version: 1", ".cmake");
        fs::write(dir.join("BROKEN"), "").unwrap();
        fs::write(dir.join("ndmake.sh"), "#!/bin/sh\nconfigure\nmake\n").unwrap();
        fs::write(dir.join("README.md"), "# curl").unwrap();

        let port = parser(tmp.path()).parse("net", "curl").unwrap();
        assert!(port.broken);
        assert_eq!(port.recipe_lines, 3);
        assert_eq!(port.readme.as_deref(), Some("# curl"));
        assert_eq!(port.deps.len(), 1);
        assert_eq!(port.dir, dir);
    }

    #[test]
    fn missing_info_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("net/curl")).unwrap();
        let err = parser(tmp.path()).parse("net", "curl").unwrap_err();
        assert!(matches!(err, ScanError::MissingFile { file: "info", .. }));
    }

    #[test]
    fn digest_changes_when_any_file_changes() {
        let tmp = TempDir::new().unwrap();
        let dir = write_port(tmp.path(), "net", "curl", "version: 1", "");
        let p = parser(tmp.path());
        let before = p.parse("net", "curl").unwrap().digest;
        fs::write(dir.join("ndmake.sh"), "make").unwrap();
        assert_ne!(before, p.parse("net", "curl").unwrap().digest);
    }

    #[test]
    fn expand_variables_replaces_all_known_keys() {
        let out = expand_variables(
            "https://x/${NAME}/${RELEASE_TAG}/${NAME}-${VERSION}",
            &[("NAME", "vim"), ("VERSION", "9.1"), ("RELEASE_TAG", "v9.1")],
        );
        assert_eq!(out, "https://x/vim/v9.1/vim-9.1");
    }

    #[test]
    fn strip_markdown_links_cases() {
        assert_eq!(strip_markdown_links("[A](u) and [B](v)"), "A and B");
        assert_eq!(strip_markdown_links("plain <a@b.c>"), "plain <a@b.c>");
        assert_eq!(strip_markdown_links("[not a link]"), "[not a link]");
        assert_eq!(strip_markdown_links("x [y](z"), "x [y](z");
    }
}
