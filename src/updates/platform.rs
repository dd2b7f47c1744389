// src/updates/platform.rs

//! Target platforms and architectures for update binaries
//!
//! Both sets are closed. Parsing is strict and case-sensitive: only the
//! canonical lowercase names are accepted. Architecture aliases used by
//! some build tooling (`x86`, `arm64`) are mapped explicitly through
//! [`Arch::normalize`] before parsing.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Darwin,
    Linux,
    Windows,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Darwin, Platform::Linux];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Darwin => "darwin",
            Platform::Linux => "linux",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "windows" => Ok(Platform::Windows),
            "darwin" => Ok(Platform::Darwin),
            "linux" => Ok(Platform::Linux),
            _ => Err(format!("Invalid platform: {s}")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "i686")]
    I686,
    #[serde(rename = "armv7")]
    Armv7,
    #[serde(rename = "aarch64")]
    Aarch64,
}

impl Arch {
    pub const ALL: [Arch; 4] = [Arch::X86_64, Arch::I686, Arch::Armv7, Arch::Aarch64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I686 => "i686",
            Arch::Armv7 => "armv7",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// Map architecture aliases to their canonical names
    ///
    /// `x86` becomes `i686` and `arm64` becomes `aarch64`; anything else is
    /// returned unchanged for [`FromStr`] to accept or reject.
    pub fn normalize(raw: &str) -> &str {
        match raw {
            "x86" => "i686",
            "arm64" => "aarch64",
            other => other,
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "i686" => Ok(Arch::I686),
            "armv7" => Ok(Arch::Armv7),
            "aarch64" => Ok(Arch::Aarch64),
            _ => Err(format!("Invalid architecture: {s}")),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate key for a platform/arch pair, e.g. `linux-x86_64`
pub fn platform_key(platform: Platform, arch: Arch) -> String {
    format!("{}-{}", platform.as_str(), arch.as_str())
}

/// The fixed set of aggregate keys: every platform crossed with every arch
pub fn all_platform_keys() -> impl Iterator<Item = String> {
    Platform::ALL
        .into_iter()
        .flat_map(|p| Arch::ALL.into_iter().map(move |a| platform_key(p, a)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_is_strict() {
        assert_eq!("linux".parse::<Platform>(), Ok(Platform::Linux));
        assert_eq!("darwin".parse::<Platform>(), Ok(Platform::Darwin));
        assert!("Linux".parse::<Platform>().is_err());
        assert!("macos".parse::<Platform>().is_err());
        assert!("".parse::<Platform>().is_err());
    }

    #[test]
    fn test_arch_parse_is_strict() {
        assert_eq!("aarch64".parse::<Arch>(), Ok(Arch::Aarch64));
        assert!("X86_64".parse::<Arch>().is_err());
        // Aliases are not accepted without normalization
        assert!("arm64".parse::<Arch>().is_err());
        assert!("x86".parse::<Arch>().is_err());
    }

    #[test]
    fn test_arch_aliases() {
        assert_eq!(Arch::normalize("x86").parse::<Arch>(), Ok(Arch::I686));
        assert_eq!(Arch::normalize("arm64").parse::<Arch>(), Ok(Arch::Aarch64));
        assert_eq!(Arch::normalize("armv7"), "armv7");
        assert!(Arch::normalize("ARM64").parse::<Arch>().is_err());
    }

    #[test]
    fn test_all_platform_keys() {
        let keys: Vec<String> = all_platform_keys().collect();
        assert_eq!(keys.len(), 12);
        assert!(keys.contains(&"windows-i686".to_string()));
        assert!(keys.contains(&"darwin-aarch64".to_string()));
        assert!(keys.contains(&"linux-armv7".to_string()));
    }

    #[test]
    fn test_serializes_as_canonical_name() {
        assert_eq!(serde_json::to_string(&Arch::X86_64).unwrap(), "\"x86_64\"");
        assert_eq!(serde_json::to_string(&Platform::Windows).unwrap(), "\"windows\"");
    }
}
