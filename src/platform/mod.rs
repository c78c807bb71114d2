use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::path_registrar::PathRecord;

pub trait PlatformOps: Sync + Send {
    fn home_dir(&self) -> Option<PathBuf>;
    /// Where the user's persistent search path lives on this host.
    fn default_path_record(&self) -> Option<PathRecord>;
    fn make_executable(&self, path: &Path) -> io::Result<()>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::UNIX_PLATFORM as ConcretePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WINDOWS_PLATFORM as ConcretePlatform;

pub fn platform() -> &'static dyn PlatformOps {
    &ConcretePlatform
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("unsupported operating system '{0}' (supported: Linux, Windows)")]
    UnsupportedOs(String),
    #[error("unsupported architecture '{0}' (supported: x86_64, arm64)")]
    UnsupportedArch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Os {
    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTarget {
    pub os: Os,
    pub arch: Arch,
}

impl PlatformTarget {
    pub fn binary_extension(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            Os::Linux => "",
        }
    }

    /// Release asset name, e.g. `sald-lsp-windows-x86_64.exe`.
    pub fn asset_filename(&self, logical_name: &str) -> String {
        format!(
            "{logical_name}-{}-{}{}",
            self.os.as_str(),
            self.arch.as_str(),
            self.binary_extension()
        )
    }

    /// Name the binary carries once it sits in the install tree.
    pub fn installed_filename(&self, logical_name: &str) -> String {
        format!("{logical_name}{}", self.binary_extension())
    }

    pub fn needs_exec_bit(&self) -> bool {
        self.os != Os::Windows
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

/// Raw facts about the host, gathered once so resolution stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct HostProbe {
    /// `uname -s` style kernel name (`Linux`, `Windows_NT`, `Darwin`, ...).
    pub kernel_name: String,
    /// `uname -r` style kernel release; WSL kernels carry a `microsoft` marker.
    pub kernel_release: String,
    pub machine: String,
    pub msystem: Option<String>,
    pub ostype: Option<String>,
}

impl HostProbe {
    pub fn current() -> Self {
        let kernel_name = match std::env::consts::OS {
            "linux" => "Linux",
            "windows" => "Windows_NT",
            "macos" => "Darwin",
            "freebsd" => "FreeBSD",
            other => other,
        }
        .to_string();
        let kernel_release = std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        HostProbe {
            kernel_name,
            kernel_release,
            machine: std::env::consts::ARCH.to_string(),
            msystem: std::env::var("MSYSTEM").ok().filter(|s| !s.is_empty()),
            ostype: std::env::var("OSTYPE").ok().filter(|s| !s.is_empty()),
        }
    }

    fn emulated_windows(&self) -> bool {
        if self.msystem.is_some() {
            return true;
        }
        let ostype = self.ostype.as_deref().unwrap_or("").to_ascii_lowercase();
        if ostype.starts_with("msys") || ostype.starts_with("cygwin") {
            return true;
        }
        let kernel = self.kernel_name.to_ascii_uppercase();
        kernel.starts_with("MINGW") || kernel.starts_with("MSYS") || kernel.starts_with("CYGWIN")
    }

    fn windows_subsystem(&self) -> bool {
        let release = self.kernel_release.to_ascii_lowercase();
        release.contains("microsoft") || release.contains("wsl")
    }
}

/// Order matters: an emulation layer must win over the kernel name, and a
/// WSL kernel must resolve to the guest (Linux) rather than the host.
pub fn resolve(probe: &HostProbe) -> Result<PlatformTarget, PlatformError> {
    let os = if probe.emulated_windows() {
        Os::Windows
    } else if probe.windows_subsystem() {
        Os::Linux
    } else {
        match probe.kernel_name.as_str() {
            "Linux" => Os::Linux,
            "Windows_NT" | "Windows" => Os::Windows,
            other => return Err(PlatformError::UnsupportedOs(other.to_string())),
        }
    };
    let arch = match probe.machine.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => Arch::X86_64,
        "aarch64" | "arm64" => Arch::Arm64,
        other => return Err(PlatformError::UnsupportedArch(other.to_string())),
    };
    let target = PlatformTarget { os, arch };
    log::debug!("resolved platform {target} from {probe:?}");
    Ok(target)
}

pub fn resolve_current() -> Result<PlatformTarget, PlatformError> {
    resolve(&HostProbe::current())
}
