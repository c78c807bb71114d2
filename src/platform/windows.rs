use crate::path_registrar::PathRecord;
use crate::platform::PlatformOps;
use std::io;
use std::path::{Path, PathBuf};

pub static WINDOWS_PLATFORM: Windows = Windows;

pub struct Windows;

impl PlatformOps for Windows {
    fn home_dir(&self) -> Option<PathBuf> { std::env::var_os("USERPROFILE").map(PathBuf::from).or_else(dirs::home_dir) }
    fn default_path_record(&self) -> Option<PathRecord> { Some(PathRecord::UserEnvironment) }
    fn make_executable(&self, _path: &Path) -> io::Result<()> { Ok(()) }
}
