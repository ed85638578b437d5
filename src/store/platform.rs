//! Snapshot platforms and their naming conventions

use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Last Windows snapshot published as `chrome-win32.zip`; later ones are
/// `chrome-win.zip`.
const WIN_ARCHIVE_RENAME_REVISION: u64 = 591479;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Mac,
    MacArm,
    Win32,
    Win64,
}

impl Platform {
    /// Platform of the running host, if snapshots are published for it.
    pub fn current() -> Option<Platform> {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("linux", _) => Some(Platform::Linux),
            ("macos", "aarch64") => Some(Platform::MacArm),
            ("macos", _) => Some(Platform::Mac),
            ("windows", "x86") => Some(Platform::Win32),
            ("windows", _) => Some(Platform::Win64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::MacArm => "mac_arm",
            Platform::Win32 => "win32",
            Platform::Win64 => "win64",
        }
    }

    /// Bucket folder holding this platform's snapshots.
    pub fn folder(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux_x64",
            Platform::Mac => "Mac",
            Platform::MacArm => "Mac_Arm",
            Platform::Win32 => "Win",
            Platform::Win64 => "Win_x64",
        }
    }

    /// Archive base name (without `.zip`) for a revision.
    pub fn archive_name(&self, revision: Revision) -> &'static str {
        match self {
            Platform::Linux => "chrome-linux",
            Platform::Mac | Platform::MacArm => "chrome-mac",
            Platform::Win32 | Platform::Win64 => {
                if revision.get() > WIN_ARCHIVE_RENAME_REVISION {
                    "chrome-win"
                } else {
                    "chrome-win32"
                }
            }
        }
    }

    /// Executable location relative to the extracted revision folder.
    pub fn relative_executable_path(&self, revision: Revision) -> PathBuf {
        let archive = PathBuf::from(self.archive_name(revision));
        match self {
            Platform::Linux => archive.join("chrome"),
            Platform::Mac | Platform::MacArm => archive
                .join("Chromium.app")
                .join("Contents")
                .join("MacOS")
                .join("Chromium"),
            Platform::Win32 | Platform::Win64 => archive.join("chrome.exe"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "mac" => Ok(Platform::Mac),
            "mac_arm" | "mac-arm" => Ok(Platform::MacArm),
            "win32" => Ok(Platform::Win32),
            "win64" => Ok(Platform::Win64),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_windows_archive_rename() {
        assert_eq!(Platform::Win64.archive_name(Revision(591479)), "chrome-win32");
        assert_eq!(Platform::Win64.archive_name(Revision(591480)), "chrome-win");
        assert_eq!(Platform::Linux.archive_name(Revision(1)), "chrome-linux");
    }

    #[test]
    fn test_executable_paths() {
        assert_eq!(
            Platform::Linux.relative_executable_path(Revision(600000)),
            Path::new("chrome-linux").join("chrome")
        );
        assert!(Platform::MacArm
            .relative_executable_path(Revision(600000))
            .ends_with("Chromium.app/Contents/MacOS/Chromium"));
        assert_eq!(
            Platform::Win32.relative_executable_path(Revision(500000)),
            Path::new("chrome-win32").join("chrome.exe")
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        for platform in [
            Platform::Linux,
            Platform::Mac,
            Platform::MacArm,
            Platform::Win32,
            Platform::Win64,
        ] {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
        assert!("amiga".parse::<Platform>().is_err());
    }
}
