use crate::path_registrar::PathRecord;
use crate::platform::PlatformOps;
use std::io;
use std::path::{Path, PathBuf};

pub static UNIX_PLATFORM: Unix = Unix;

pub struct Unix;

impl PlatformOps for Unix {
    fn home_dir(&self) -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
    }
    fn default_path_record(&self) -> Option<PathRecord> {
        let home = self.home_dir()?;
        let shell = std::env::var("SHELL").unwrap_or_default();
        Some(PathRecord::shell_profile_for(&home, &shell))
    }
    fn make_executable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs_err::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(path, perms)?;
        Ok(())
    }
}
