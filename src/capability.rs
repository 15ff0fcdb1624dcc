//! Startup probe deciding which synthesis backends may run in this process.
//!
//! The cloning engines live in a separate engine runtime (an interpreter with
//! the model packages installed). Each engine only works on a bounded range of
//! runtime versions, so availability depends on three things checked once at
//! startup:
//!
//! 1. the backend was compiled in (cargo feature),
//! 2. the runtime version lies inside the backend's closed version interval,
//! 3. every package the backend needs is importable in that runtime.
//!
//! The resulting [`CapabilityMap`] is immutable. A backend reported unavailable
//! stays unavailable until the process restarts, and vice versa.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::BackendKind;

/// `major.minor` version of the engine runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Find the first `X.Y[.Z]` token in a version banner such as `"Python 3.11.4"`.
    pub fn parse(text: &str) -> Option<Self> {
        text.split_whitespace().find_map(|token| {
            let mut parts = token.split('.');
            let major = parts.next()?.parse().ok()?;
            let minor = parts
                .next()?
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()?;
            Some(Self { major, minor })
        })
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid runtime version '{value}'"))
    }
}

impl From<RuntimeVersion> for String {
    fn from(version: RuntimeVersion) -> Self {
        version.to_string()
    }
}

/// Closed interval `[min, max]` of supported runtime versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: RuntimeVersion,
    pub max: RuntimeVersion,
}

impl VersionRange {
    pub const fn new(min: RuntimeVersion, max: RuntimeVersion) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: RuntimeVersion) -> bool {
        self.min <= version && version <= self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// What a backend needs from the environment.
#[derive(Debug, Clone)]
pub struct BackendRequirement {
    pub kind: BackendKind,
    /// Whether the backend was compiled into this build.
    pub compiled: bool,
    /// Packages that must be importable in the engine runtime.
    pub packages: Vec<String>,
    /// Supported engine runtime versions; `None` when no runtime is involved.
    pub runtime: Option<VersionRange>,
    /// A precondition outside the environment that already failed
    /// (for example missing credentials).
    pub blocked_by: Option<String>,
    /// Appended to the unavailability reason to tell the user how to fix it.
    pub install_hint: Option<String>,
}

impl BackendRequirement {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            compiled: true,
            packages: Vec::new(),
            runtime: None,
            blocked_by: None,
            install_hint: None,
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    pub fn runtime(mut self, range: VersionRange) -> Self {
        self.runtime = Some(range);
        self
    }

    pub fn compiled(mut self, compiled: bool) -> Self {
        self.compiled = compiled;
        self
    }

    pub fn blocked_by(mut self, reason: impl Into<String>) -> Self {
        self.blocked_by = Some(reason.into());
        self
    }

    pub fn install_hint(mut self, hint: impl Into<String>) -> Self {
        self.install_hint = Some(hint.into());
        self
    }
}

/// Read-only view of the engine runtime.
pub trait Environment {
    /// Version of the engine runtime, or `None` when it cannot be run.
    fn runtime_version(&self) -> Option<RuntimeVersion>;

    /// Whether `package` can be imported by the engine runtime.
    fn has_package(&self, package: &str) -> bool;
}

/// Queries a real interpreter on this machine.
///
/// Only runs `--version` and an import lookup; nothing is installed.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    interpreter: PathBuf,
}

impl HostEnvironment {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Environment for HostEnvironment {
    fn runtime_version(&self) -> Option<RuntimeVersion> {
        let output = Command::new(&self.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| log::debug!("Engine runtime {:?} not runnable: {e}", self.interpreter))
            .ok()?;
        // Older interpreters print the banner on stderr.
        let banner = format!(
            "{} {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RuntimeVersion::parse(&banner)
    }

    fn has_package(&self, package: &str) -> bool {
        let check = format!(
            "import importlib.util, sys; sys.exit(0 if importlib.util.find_spec({package:?}) else 1)"
        );
        Command::new(&self.interpreter)
            .args(["-c", &check])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Availability of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapability {
    pub available: bool,
    /// Empty when available.
    pub reason_if_unavailable: String,
}

impl BackendCapability {
    pub fn available() -> Self {
        Self {
            available: true,
            reason_if_unavailable: String::new(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason_if_unavailable: reason.into(),
        }
    }
}

/// Process-wide, immutable backend availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMap {
    entries: BTreeMap<BackendKind, BackendCapability>,
}

impl CapabilityMap {
    /// Build a map from explicit entries; kinds left out are unavailable.
    pub fn from_entries(entries: impl IntoIterator<Item = (BackendKind, BackendCapability)>) -> Self {
        let mut map: BTreeMap<_, _> = entries.into_iter().collect();
        for kind in BackendKind::ALL {
            map.entry(kind)
                .or_insert_with(|| BackendCapability::unavailable("backend not configured"));
        }
        Self { entries: map }
    }

    pub fn get(&self, kind: BackendKind) -> &BackendCapability {
        // from_entries fills every kind
        &self.entries[&kind]
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.get(kind).available
    }

    pub fn available_kinds(&self) -> Vec<BackendKind> {
        self.entries
            .iter()
            .filter(|(_, c)| c.available)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BackendKind, &BackendCapability)> {
        self.entries.iter().map(|(k, c)| (*k, c))
    }
}

/// Evaluate every requirement against the environment. Never fails.
pub fn probe(env: &dyn Environment, requirements: &[BackendRequirement]) -> CapabilityMap {
    let needs_runtime = requirements.iter().any(|r| r.compiled && r.runtime.is_some());
    let version = if needs_runtime {
        env.runtime_version()
    } else {
        None
    };

    let entries = requirements.iter().map(|req| {
        let capability = match check(env, req, version) {
            Ok(()) => BackendCapability::available(),
            Err(reason) => {
                let reason = match &req.install_hint {
                    Some(hint) => format!("{reason}. {hint}"),
                    None => reason,
                };
                BackendCapability::unavailable(reason)
            }
        };
        if capability.available {
            log::info!("Backend {} available", req.kind);
        } else {
            log::warn!(
                "Backend {} unavailable: {}",
                req.kind,
                capability.reason_if_unavailable
            );
        }
        (req.kind, capability)
    });

    CapabilityMap::from_entries(entries.collect::<Vec<_>>())
}

fn check(
    env: &dyn Environment,
    req: &BackendRequirement,
    version: Option<RuntimeVersion>,
) -> Result<(), String> {
    if !req.compiled {
        return Err(format!("{} support was not compiled into this build", req.kind));
    }
    if let Some(reason) = &req.blocked_by {
        return Err(reason.clone());
    }
    if let Some(range) = req.runtime {
        let version = version.ok_or_else(|| "engine runtime not found".to_string())?;
        if !range.contains(version) {
            return Err(format!(
                "{} needs engine runtime {range}, found {version}",
                req.kind
            ));
        }
    }
    if let Some(missing) = req.packages.iter().find(|p| !env.has_package(p)) {
        return Err(format!("package '{missing}' is not installed in the engine runtime"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use super::*;

    struct FakeEnv {
        version: Option<RuntimeVersion>,
        packages: HashSet<&'static str>,
        version_queries: Cell<u32>,
    }

    impl FakeEnv {
        fn new(version: Option<(u32, u32)>, packages: &[&'static str]) -> Self {
            Self {
                version: version.map(|(a, b)| RuntimeVersion::new(a, b)),
                packages: packages.iter().copied().collect(),
                version_queries: Cell::new(0),
            }
        }
    }

    impl Environment for FakeEnv {
        fn runtime_version(&self) -> Option<RuntimeVersion> {
            self.version_queries.set(self.version_queries.get() + 1);
            self.version
        }

        fn has_package(&self, package: &str) -> bool {
            self.packages.contains(package)
        }
    }

    fn requirements() -> Vec<BackendRequirement> {
        vec![
            BackendRequirement::new(BackendKind::CloudNeural),
            BackendRequirement::new(BackendKind::CloneEnglish)
                .package("chatterbox")
                .runtime(VersionRange::new(
                    RuntimeVersion::new(3, 10),
                    RuntimeVersion::new(3, 11),
                )),
            BackendRequirement::new(BackendKind::CloneMultilingual)
                .package("TTS")
                .runtime(VersionRange::new(
                    RuntimeVersion::new(3, 9),
                    RuntimeVersion::new(3, 11),
                )),
        ]
    }

    #[test]
    fn parses_version_banners() {
        assert_eq!(
            RuntimeVersion::parse("Python 3.11.4"),
            Some(RuntimeVersion::new(3, 11))
        );
        assert_eq!(RuntimeVersion::parse("3.9"), Some(RuntimeVersion::new(3, 9)));
        assert_eq!(
            RuntimeVersion::parse("Python 3.12.0rc1"),
            Some(RuntimeVersion::new(3, 12))
        );
        assert_eq!(RuntimeVersion::parse("no version here"), None);
    }

    #[test]
    fn version_range_is_closed() {
        let range = VersionRange::new(RuntimeVersion::new(3, 10), RuntimeVersion::new(3, 11));
        assert!(range.contains(RuntimeVersion::new(3, 10)));
        assert!(range.contains(RuntimeVersion::new(3, 11)));
        assert!(!range.contains(RuntimeVersion::new(3, 9)));
        assert!(!range.contains(RuntimeVersion::new(3, 12)));
    }

    #[test]
    fn supported_runtime_with_packages_enables_all() {
        let env = FakeEnv::new(Some((3, 11)), &["chatterbox", "TTS"]);
        let map = probe(&env, &requirements());
        assert_eq!(map.available_kinds(), BackendKind::ALL.to_vec());
        assert_eq!(env.version_queries.get(), 1);
    }

    #[test]
    fn runtime_outside_interval_disables_cloning() {
        let env = FakeEnv::new(Some((3, 12)), &["chatterbox", "TTS"]);
        let map = probe(&env, &requirements());
        assert!(map.is_available(BackendKind::CloudNeural));
        assert!(!map.is_available(BackendKind::CloneEnglish));
        assert!(map
            .get(BackendKind::CloneEnglish)
            .reason_if_unavailable
            .contains("3.10-3.11"));
    }

    #[test]
    fn interval_differs_per_backend() {
        let env = FakeEnv::new(Some((3, 9)), &["chatterbox", "TTS"]);
        let map = probe(&env, &requirements());
        assert!(!map.is_available(BackendKind::CloneEnglish));
        assert!(map.is_available(BackendKind::CloneMultilingual));
    }

    #[test]
    fn missing_package_is_reported() {
        let env = FakeEnv::new(Some((3, 11)), &["TTS"]);
        let map = probe(&env, &requirements());
        let english = map.get(BackendKind::CloneEnglish);
        assert!(!english.available);
        assert!(english.reason_if_unavailable.contains("chatterbox"));
    }

    #[test]
    fn missing_runtime_never_panics() {
        let env = FakeEnv::new(None, &[]);
        let map = probe(&env, &requirements());
        assert_eq!(map.available_kinds(), vec![BackendKind::CloudNeural]);
    }

    #[test]
    fn uncompiled_and_blocked_backends_are_unavailable() {
        let env = FakeEnv::new(Some((3, 11)), &["chatterbox", "TTS"]);
        let reqs = vec![
            BackendRequirement::new(BackendKind::CloudNeural).blocked_by("no API key configured"),
            BackendRequirement::new(BackendKind::CloneEnglish).compiled(false),
        ];
        let map = probe(&env, &reqs);
        assert_eq!(
            map.get(BackendKind::CloudNeural).reason_if_unavailable,
            "no API key configured"
        );
        assert!(!map.is_available(BackendKind::CloneEnglish));
        // not listed at all
        assert!(!map.is_available(BackendKind::CloneMultilingual));
        assert_eq!(env.version_queries.get(), 0);
    }

    #[test]
    fn install_hint_is_appended() {
        let env = FakeEnv::new(Some((3, 12)), &[]);
        let reqs = vec![BackendRequirement::new(BackendKind::CloneEnglish)
            .runtime(VersionRange::new(
                RuntimeVersion::new(3, 10),
                RuntimeVersion::new(3, 11),
            ))
            .install_hint("Re-run setup")];
        let map = probe(&env, &reqs);
        assert!(map
            .get(BackendKind::CloneEnglish)
            .reason_if_unavailable
            .ends_with("Re-run setup"));
    }
}
