//! Build metadata reported as tracer resource attributes.
//!
//! This module provides:
//! - [`BuildInfo`] - version, build settings and dependency versions
//! - [`emit_build_env`] - build.rs helper that records VCS state and
//!   dependency versions for [`capture_build_info!`](crate::capture_build_info)

use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use std::path::{Path, PathBuf};

/// A `key=value` build setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    /// Setting name, e.g. `vcs.revision`.
    pub key: String,
    /// Setting value.
    pub value: String,
}

/// A dependency and the version it was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Crate name.
    pub path: String,
    /// Resolved version.
    pub version: String,
}

/// Build-time information about the running binary.
///
/// Usually created with [`capture_build_info!`](crate::capture_build_info).
///
/// # Example
///
/// ```ignore
/// // In build.rs:
/// fn main() {
///     telemetry_builder::emit_build_env();
/// }
///
/// // In main.rs:
/// let info = telemetry_builder::capture_build_info!();
/// let telemetry = telemetry_builder::Builder::new(Default::default())
///     .tracer(|t| t.with_build_info(Some(&info), &["tokio"]))
///     .build()?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    /// Version of the main package.
    pub version: String,
    /// Build settings, including `vcs.*` entries.
    pub settings: Vec<Setting>,
    /// Resolved dependencies.
    pub deps: Vec<Module>,
}

impl BuildInfo {
    /// Creates build information for the given package version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    /// Adds a build setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push(Setting {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, path: impl Into<String>, version: impl Into<String>) -> Self {
        self.deps.push(Module {
            path: path.into(),
            version: version.into(),
        });
        self
    }

    /// Assembles build information from the variables emitted by
    /// [`emit_build_env`]. Used by [`capture_build_info!`](crate::capture_build_info).
    #[doc(hidden)]
    pub fn from_build_env(
        version: &str,
        settings: &[(&str, Option<&str>)],
        dependencies: Option<&str>,
    ) -> Self {
        let mut info = Self::new(version);
        for (key, value) in settings {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                info = info.with_setting(*key, value);
            }
        }

        for dep in dependencies.unwrap_or_default().split(',') {
            if let Some((path, version)) = dep.trim().split_once('@') {
                info = info.with_dependency(path, version);
            }
        }
        info
    }

    /// Returns the resource attributes describing this build.
    ///
    /// - `service.version` from the package version
    /// - every setting whose key starts with `vcs.`
    /// - for each of `modules` present in the dependency list, an attribute
    ///   keyed by the module name holding its version
    #[must_use]
    pub fn key_values(&self, modules: &[&str]) -> Vec<KeyValue> {
        let mut attrs = vec![KeyValue::new(SERVICE_VERSION, self.version.clone())];

        attrs.extend(
            self.settings
                .iter()
                .filter(|s| s.key.starts_with("vcs."))
                .map(|s| KeyValue::new(s.key.clone(), s.value.clone())),
        );

        if !modules.is_empty() {
            attrs.extend(
                self.deps
                    .iter()
                    .filter(|dep| modules.contains(&dep.path.as_str()))
                    .map(|dep| KeyValue::new(dep.path.clone(), dep.version.clone())),
            );
        }

        attrs
    }
}

/// Emits build metadata as cargo environment variables.
///
/// Call this from your `build.rs`. The variables are read back by
/// [`capture_build_info!`](crate::capture_build_info).
///
/// # Environment Variables Emitted
///
/// - `VCS_REVISION` - current git commit
/// - `VCS_TIME` - commit time in strict ISO 8601
/// - `VCS_MODIFIED` - `true` if the working tree has uncommitted changes
/// - `BUILD_PROFILE` - cargo profile (`debug` or `release`)
/// - `BUILD_DEPENDENCIES` - `name@version` pairs from the nearest `Cargo.lock`
///
/// Variables whose source is unavailable (no git, no lockfile) are skipped.
pub fn emit_build_env() {
    use std::process::Command;

    let git = |args: &[&str]| -> Option<String> {
        let output = Command::new("git").args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim().to_string())
    };

    if let Some(revision) = git(&["rev-parse", "HEAD"]) {
        println!("cargo::rustc-env=VCS_REVISION={revision}");
        if let Some(time) = git(&["log", "-1", "--format=%cI"]) {
            println!("cargo::rustc-env=VCS_TIME={time}");
        }
        if let Some(status) = git(&["status", "--porcelain"]) {
            println!("cargo::rustc-env=VCS_MODIFIED={}", !status.is_empty());
        }
    }

    if let Ok(profile) = std::env::var("PROFILE") {
        println!("cargo::rustc-env=BUILD_PROFILE={profile}");
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR")
        && let Some(lockfile) = find_lockfile(Path::new(&manifest_dir))
        && let Ok(contents) = std::fs::read_to_string(&lockfile)
    {
        println!("cargo::rerun-if-changed={}", lockfile.display());
        let deps = parse_lockfile(&contents)
            .into_iter()
            .map(|m| format!("{}@{}", m.path, m.version))
            .collect::<Vec<_>>()
            .join(",");
        println!("cargo::rustc-env=BUILD_DEPENDENCIES={deps}");
    }
}

fn find_lockfile(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("Cargo.lock"))
        .find(|path| path.is_file())
}

/// Extracts `[[package]]` names and versions from a `Cargo.lock`.
fn parse_lockfile(contents: &str) -> Vec<Module> {
    let mut modules = Vec::new();
    let mut name = None;
    let mut version = None;

    let mut flush = |name: &mut Option<String>, version: &mut Option<String>| {
        if let (Some(path), Some(version)) = (name.take(), version.take()) {
            modules.push(Module { path, version });
        }
    };

    for line in contents.lines().map(str::trim) {
        if line == "[[package]]" {
            flush(&mut name, &mut version);
        } else if let Some(value) = line.strip_prefix("name = ") {
            name = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("version = ") {
            version = Some(value.trim_matches('"').to_string());
        }
    }
    flush(&mut name, &mut version);

    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(attrs: &[KeyValue]) -> Vec<&str> {
        attrs.iter().map(|kv| kv.key.as_str()).collect()
    }

    #[test]
    fn key_values_include_version_and_vcs_settings() {
        let info = BuildInfo::new("1.4.2")
            .with_setting("vcs.revision", "0123abc")
            .with_setting("vcs.modified", "false")
            .with_setting("build.profile", "release");

        let attrs = info.key_values(&[]);

        assert_eq!(
            keys(&attrs),
            ["service.version", "vcs.revision", "vcs.modified"]
        );
        assert_eq!(attrs[0].value.as_str(), "1.4.2");
    }

    #[test]
    fn key_values_include_only_named_modules() {
        let info = BuildInfo::new("0.1.0")
            .with_dependency("tokio", "1.44.1")
            .with_dependency("serde", "1.0.219");

        let attrs = info.key_values(&["tokio", "hyper"]);

        assert_eq!(keys(&attrs), ["service.version", "tokio"]);
        assert_eq!(attrs[1].value.as_str(), "1.44.1");
    }

    #[test]
    fn from_build_env_skips_missing_values() {
        let info = BuildInfo::from_build_env(
            "2.0.0",
            &[
                ("vcs.revision", Some("deadbeef")),
                ("vcs.time", None),
                ("vcs.modified", Some("")),
            ],
            Some("tokio@1.44.1,serde@1.0.219"),
        );

        assert_eq!(info.version, "2.0.0");
        assert_eq!(
            info.settings,
            vec![Setting {
                key: "vcs.revision".to_string(),
                value: "deadbeef".to_string(),
            }]
        );
        assert_eq!(info.deps.len(), 2);
        assert_eq!(info.deps[1].path, "serde");
    }

    #[test]
    fn from_build_env_without_dependencies() {
        let info = BuildInfo::from_build_env("0.1.0", &[], None);
        assert!(info.deps.is_empty());
        assert!(info.settings.is_empty());
    }

    #[test]
    fn parse_lockfile_reads_packages() {
        let lock = r#"
# This file is automatically @generated by Cargo.
version = 4

[[package]]
name = "bytes"
version = "1.10.1"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "tokio"
version = "1.44.1"
dependencies = [
 "bytes",
]
"#;

        let modules = parse_lockfile(lock);
        assert_eq!(
            modules,
            vec![
                Module {
                    path: "bytes".to_string(),
                    version: "1.10.1".to_string(),
                },
                Module {
                    path: "tokio".to_string(),
                    version: "1.44.1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn capture_build_info_uses_package_version() {
        let info = crate::capture_build_info!();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
