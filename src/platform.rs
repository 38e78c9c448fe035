//! Platform probe (spec.md §4.A).
//!
//! Detects `(os, arch)` and resolves absolute, executable paths to the
//! three external collaborators. Constructed once by the driver and threaded
//! through every other component — no process-wide mutable state, per
//! `spec.md` §9's first re-architecture directive.

use std::path::{Path, PathBuf};

use crate::error::{FalconzError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Mac,
    Windows,
}

impl Os {
    fn detect() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Mac),
            "windows" => Some(Os::Windows),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Mac => "mac",
            Os::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Arch {
    fn detect() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::X86_64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }
}

/// Where to look for the three external binaries this pipeline shells out to.
#[derive(Debug, Clone)]
pub struct BinaryLocator {
    /// A directory laid out as `<root>/<os>-<arch>/<name>`, checked first.
    pub bundled_root: Option<PathBuf>,
    /// Explicit overrides, keyed by logical name (`registration-engine`,
    /// `image-tool`, `dicom-converter`).
    pub overrides: Vec<(&'static str, PathBuf)>,
}

impl Default for BinaryLocator {
    fn default() -> Self {
        BinaryLocator {
            bundled_root: None,
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    pub registration_engine: PathBuf,
    pub image_tool: PathBuf,
    pub dicom_converter: PathBuf,
}

const REGISTRATION_ENGINE_NAME: &str = "greedy";
const IMAGE_TOOL_NAME: &str = "c3d";
const DICOM_CONVERTER_NAME: &str = "dcm2niix";

impl Platform {
    /// Detects the running OS/arch and resolves all three binaries,
    /// granting execute permission on POSIX systems where needed.
    pub fn probe(locator: &BinaryLocator) -> Result<Self> {
        let os = Os::detect().ok_or_else(|| FalconzError::UnsupportedPlatform {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })?;
        let arch = Arch::detect().ok_or_else(|| FalconzError::UnsupportedPlatform {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })?;

        let registration_engine =
            Self::resolve(locator, os, arch, "registration-engine", REGISTRATION_ENGINE_NAME)?;
        let image_tool = Self::resolve(locator, os, arch, "image-tool", IMAGE_TOOL_NAME)?;
        let dicom_converter =
            Self::resolve(locator, os, arch, "dicom-converter", DICOM_CONVERTER_NAME)?;

        for bin in [&registration_engine, &image_tool, &dicom_converter] {
            Self::ensure_executable(bin, os)?;
        }

        Ok(Platform {
            os,
            arch,
            registration_engine,
            image_tool,
            dicom_converter,
        })
    }

    fn resolve(
        locator: &BinaryLocator,
        os: Os,
        arch: Arch,
        logical_name: &str,
        binary_name: &str,
    ) -> Result<PathBuf> {
        if let Some((_, path)) = locator.overrides.iter().find(|(name, _)| *name == logical_name) {
            return Ok(path.clone());
        }

        if let Some(root) = &locator.bundled_root {
            let candidate = root
                .join(format!("{}-{}", os.as_str(), arch.as_str()))
                .join(binary_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        which::which(binary_name).map_err(|_| FalconzError::BinaryNotFound {
            name: binary_name.to_string(),
            searched: locator
                .bundled_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "PATH".to_string()),
        })
    }

    #[cfg(unix)]
    fn ensure_executable(path: &Path, _os: Os) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mut perms = metadata.permissions();
        let mode = perms.mode();
        if mode & 0o111 == 0 {
            perms.set_mode(mode | 0o755);
            std::fs::set_permissions(path, perms)
                .map_err(|source| FalconzError::PermissionDenied { path: path.to_path_buf(), source })?;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn ensure_executable(_path: &Path, _os: Os) -> Result<()> {
        // Windows has no execute bit; `icacls` grants are a no-op for
        // binaries already readable by the invoking user.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_explicit_override_before_bundled_or_path() {
        let mut locator = BinaryLocator::default();
        locator
            .overrides
            .push(("registration-engine", PathBuf::from("/opt/custom/greedy")));
        let resolved =
            Platform::resolve(&locator, Os::Linux, Arch::X86_64, "registration-engine", "greedy").unwrap();
        assert_eq!(resolved, PathBuf::from("/opt/custom/greedy"));
    }

    #[test]
    fn os_arch_strings_match_spec_vocabulary() {
        assert_eq!(Os::Linux.as_str(), "linux");
        assert_eq!(Os::Mac.as_str(), "mac");
        assert_eq!(Os::Windows.as_str(), "windows");
        assert_eq!(Arch::X86_64.as_str(), "x86_64");
        assert_eq!(Arch::Arm64.as_str(), "arm64");
    }
}
