use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PROFILE_MARKER: &str = "# Added by sald-install";

#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("the user environment registry is only available on Windows")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Posix,
    Fish,
}

/// The user's persistent search path: a shell start-up file on Unix-like
/// hosts, the per-user `Path` value on Windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRecord {
    ShellProfile {
        path: PathBuf,
        shell: ShellKind,
        home: PathBuf,
    },
    UserEnvironment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathUpdate {
    Updated,
    AlreadyPresent,
}

impl PathRecord {
    /// Picks the start-up file the login shell in `$SHELL` actually reads.
    pub fn shell_profile_for(home: &Path, shell: &str) -> Self {
        let name = Path::new(shell)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let (path, shell) = match name {
            "zsh" => (home.join(".zshrc"), ShellKind::Posix),
            "bash" => (home.join(".bashrc"), ShellKind::Posix),
            "fish" => (home.join(".config/fish/config.fish"), ShellKind::Fish),
            _ => (home.join(".profile"), ShellKind::Posix),
        };
        PathRecord::ShellProfile {
            path,
            shell,
            home: home.to_path_buf(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PathRecord::ShellProfile { path, .. } => path.display().to_string(),
            PathRecord::UserEnvironment => "HKCU\\Environment\\Path".to_string(),
        }
    }

    pub fn read(&self) -> Result<String, PathError> {
        match self {
            PathRecord::ShellProfile { path, .. } => {
                if path.exists() {
                    Ok(fs_err::read_to_string(path)?)
                } else {
                    Ok(String::new())
                }
            }
            PathRecord::UserEnvironment => registry::read_user_path(),
        }
    }

    fn contains(&self, current: &str, bin_dir: &Path) -> bool {
        match self {
            PathRecord::ShellProfile { home, .. } => {
                profile_mentions(current, bin_dir, home)
            }
            PathRecord::UserEnvironment => env_path_contains(current, bin_dir, ';'),
        }
    }

    fn append(&self, current: &str, bin_dir: &Path) -> Result<(), PathError> {
        match self {
            PathRecord::ShellProfile { path, shell, .. } => {
                use std::io::Write;
                if let Some(parent) = path.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                let mut f = fs_err::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                if !current.is_empty() && !current.ends_with('\n') {
                    f.write_all(b"\n")?;
                }
                let line = export_line(*shell, bin_dir);
                f.write_all(format!("\n{PROFILE_MARKER}\n{line}\n").as_bytes())?;
                Ok(())
            }
            PathRecord::UserEnvironment => {
                registry::write_user_path(&append_env_entry(current, bin_dir, ';'))
            }
        }
    }
}

pub fn export_line(shell: ShellKind, bin_dir: &Path) -> String {
    match shell {
        ShellKind::Posix => format!("export PATH=\"{}:$PATH\"", bin_dir.display()),
        ShellKind::Fish => format!("set -gx PATH \"{}\" $PATH", bin_dir.display()),
    }
}

fn profile_mentions(content: &str, bin_dir: &Path, home: &Path) -> bool {
    let absolute = bin_dir.display().to_string();
    if content.contains(&absolute) {
        return true;
    }
    match bin_dir.strip_prefix(home) {
        Ok(rel) => {
            let rel = rel.display().to_string();
            content.contains(&format!("$HOME/{rel}")) || content.contains(&format!("~/{rel}"))
        }
        Err(_) => false,
    }
}

fn normalize_entry(entry: &str) -> String {
    entry
        .trim()
        .trim_end_matches(['/', '\\'])
        .replace('/', "\\")
        .to_ascii_lowercase()
}

/// Separator-delimited membership test; case-insensitive since it serves the
/// Windows `Path` value.
pub fn env_path_contains(value: &str, bin_dir: &Path, sep: char) -> bool {
    let wanted = normalize_entry(&bin_dir.display().to_string());
    value
        .split(sep)
        .filter(|e| !e.trim().is_empty())
        .any(|e| normalize_entry(e) == wanted)
}

pub fn append_env_entry(value: &str, bin_dir: &Path, sep: char) -> String {
    let trimmed = value.trim_end_matches(sep);
    if trimmed.is_empty() {
        bin_dir.display().to_string()
    } else {
        format!("{trimmed}{sep}{}", bin_dir.display())
    }
}

/// Reads the persisted value, writes only when `bin_dir` is missing, and
/// exports it into this process so the binaries resolve without a new shell.
pub fn ensure_on_path(record: &PathRecord, bin_dir: &Path) -> Result<PathUpdate, PathError> {
    let current = record.read()?;
    if record.contains(&current, bin_dir) {
        log::debug!("{} already on PATH via {}", bin_dir.display(), record.describe());
        return Ok(PathUpdate::AlreadyPresent);
    }
    record.append(&current, bin_dir)?;
    log::info!("added {} to PATH in {}", bin_dir.display(), record.describe());
    if let Some(updated) = prepend_session_path(std::env::var_os("PATH"), bin_dir) {
        std::env::set_var("PATH", updated);
    }
    Ok(PathUpdate::Updated)
}

/// New session `PATH` with `bin_dir` first, or `None` when it is already there.
pub fn prepend_session_path(current: Option<OsString>, bin_dir: &Path) -> Option<OsString> {
    let existing: Vec<PathBuf> = current
        .as_deref()
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();
    if existing.iter().any(|p| p == bin_dir) {
        return None;
    }
    let mut parts = vec![bin_dir.to_path_buf()];
    parts.extend(existing);
    std::env::join_paths(parts).ok()
}

#[cfg(windows)]
mod registry {
    use super::PathError;
    use winreg::enums::{RegType, HKEY_CURRENT_USER, KEY_READ, KEY_WRITE};
    use winreg::types::ToRegValue;
    use winreg::RegKey;

    pub fn read_user_path() -> Result<String, PathError> {
        let env =
            RegKey::predef(HKEY_CURRENT_USER).open_subkey_with_flags("Environment", KEY_READ)?;
        match env.get_value::<String, _>("Path") {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored as REG_EXPAND_SZ so existing `%USERPROFILE%` entries keep expanding.
    pub fn write_user_path(value: &str) -> Result<(), PathError> {
        let env =
            RegKey::predef(HKEY_CURRENT_USER).open_subkey_with_flags("Environment", KEY_WRITE)?;
        let mut raw = value.to_string().to_reg_value();
        raw.vtype = RegType::REG_EXPAND_SZ;
        env.set_raw_value("Path", &raw)?;
        Ok(())
    }
}

#[cfg(not(windows))]
mod registry {
    use super::PathError;

    pub fn read_user_path() -> Result<String, PathError> {
        Err(PathError::Unsupported)
    }

    pub fn write_user_path(_value: &str) -> Result<(), PathError> {
        Err(PathError::Unsupported)
    }
}
