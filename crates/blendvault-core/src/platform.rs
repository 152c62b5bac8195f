//! Platform and architecture detection plus per-platform archive and
//! executable naming rules.

use crate::config::Lineage;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    /// Key used by the buildbot JSON documents.
    pub fn json_key(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "darwin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "aarch64" => Arch::Arm64,
            _ => Arch::Amd64,
        }
    }

    /// Spelling used in buildbot documents and archive names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Alternate spellings seen in archive file names.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => &["amd64", "x64", "x86_64", "windows64"],
            Arch::Arm64 => &["arm64", "aarch64"],
        }
    }
}

/// Archive file name filter for official builds on one platform. Excludes
/// checksum companions.
pub fn archive_filter(platform: Platform) -> &'static Regex {
    static WINDOWS: OnceLock<Regex> = OnceLock::new();
    static LINUX: OnceLock<Regex> = OnceLock::new();
    static MACOS: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match platform {
        Platform::Windows => (&WINDOWS, r"(?i)blender-.+win.+64.*\.zip$"),
        Platform::Linux => (&LINUX, r"(?i)blender-.+lin.+64.*\.tar\.(gz|zst)$"),
        Platform::MacOs => (&MACOS, r"(?i)blender-.+(macos|darwin).*\.zip$"),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("static archive filter"))
}

/// Archive file name filter for UPBGE release assets.
pub fn upbge_archive_filter(platform: Platform) -> &'static Regex {
    static WINDOWS: OnceLock<Regex> = OnceLock::new();
    static LINUX: OnceLock<Regex> = OnceLock::new();
    static MACOS: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match platform {
        Platform::Windows => (&WINDOWS, r"(?i)upbge-.+windows.*\.zip$"),
        Platform::Linux => (&LINUX, r"(?i)upbge-.+linux.*\.tar\.(gz|zst)$"),
        Platform::MacOs => (&MACOS, r"(?i)upbge-.+macos.*\.zip$"),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("static archive filter"))
}

/// Archive file name filter for Bforartists release assets.
pub fn bforartists_archive_filter(platform: Platform) -> &'static Regex {
    static WINDOWS: OnceLock<Regex> = OnceLock::new();
    static LINUX: OnceLock<Regex> = OnceLock::new();
    static MACOS: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match platform {
        Platform::Windows => (&WINDOWS, r"(?i)bforartists.+windows.*\.zip$"),
        Platform::Linux => (&LINUX, r"(?i)bforartists.+linux.*\.tar\.(gz|zst)$"),
        Platform::MacOs => (&MACOS, r"(?i)bforartists.+macos.*\.zip$"),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("static archive filter"))
}

/// Relative executable paths that mark a directory as a valid build of the
/// given lineage. UPBGE ships under the blender executable name.
pub fn executable_candidates(lineage: Lineage, platform: Platform) -> &'static [&'static str] {
    match (lineage, platform) {
        (Lineage::Bforartists, Platform::Windows) => &["bforartists.exe", "blender.exe"],
        (Lineage::Bforartists, Platform::Linux) => &["bforartists", "blender"],
        (Lineage::Bforartists, Platform::MacOs) => &[
            "Bforartists.app/Contents/MacOS/Bforartists",
            "Bforartists/Bforartists.app/Contents/MacOS/Bforartists",
        ],
        (_, Platform::Windows) => &["blender.exe", "bforartists.exe"],
        (_, Platform::Linux) => &["blender", "bforartists"],
        (_, Platform::MacOs) => &[
            "Blender.app/Contents/MacOS/Blender",
            "Blender/Blender.app/Contents/MacOS/Blender",
            "Bforartists.app/Contents/MacOS/Bforartists",
        ],
    }
}

/// Whether `dir` contains any recognized executable for `lineage`.
pub fn has_recognized_executable(dir: &Path, lineage: Lineage, platform: Platform) -> bool {
    executable_candidates(lineage, platform)
        .iter()
        .any(|candidate| dir.join(candidate).is_file())
}

/// Whether an archive file name matches the running machine's architecture.
/// Names that carry no architecture marker at all are accepted.
pub fn matches_arch(file_name: &str, arch: Arch) -> bool {
    let lower = file_name.to_lowercase();
    if arch.aliases().iter().any(|alias| lower.contains(alias)) {
        return true;
    }
    let other = match arch {
        Arch::Amd64 => Arch::Arm64,
        Arch::Arm64 => Arch::Amd64,
    };
    !other.aliases().iter().any(|alias| lower.contains(alias))
}

/// File name portion of a download URL.
pub fn file_name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

/// Archive stem with the compression suffixes removed, used as the default
/// install directory name.
pub fn archive_stem(file_name: &str) -> String {
    let mut stem = file_name;
    for suffix in [".tar.gz", ".tar.zst", ".tgz", ".zip"] {
        if let Some(stripped) = stem.strip_suffix(suffix) {
            stem = stripped;
            break;
        }
    }
    stem.to_string()
}
