//! Filesystem helpers shared by the vault, the CLI and the sweeper.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::fs::MetadataExt as _;
use std::path::Path;

/// Fallback filename limit when `pathconf` cannot answer.
const DEFAULT_NAME_MAX: usize = 255;

/// Whether the given path is a regular file, without following symlinks.
pub fn is_regular(path: &Path) -> bool {
    path.symlink_metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// The inode number of the given file, without following symlinks.
pub fn inode(path: &Path) -> io::Result<u64> {
    Ok(path.symlink_metadata()?.ino())
}

/// The device number of the given file.
pub fn device(path: &Path) -> io::Result<u64> {
    Ok(path.symlink_metadata()?.dev())
}

/// The number of hardlinks to the given file.
pub fn hardlinks(path: &Path) -> io::Result<u64> {
    Ok(path.symlink_metadata()?.nlink())
}

/// Reset the access and modification times of `path` to now.
///
/// Anyone who can write to the file may do this; setting arbitrary times
/// is reserved to the owner, which is why the vault only ever touches.
#[allow(unsafe_code)]
pub fn touch(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid null-terminated string and a null times
    // pointer asks the kernel to set both timestamps to the current time.
    // AT_FDCWD makes an absolute path interpreted as-is.
    let ret = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            c_path.as_ptr(),
            std::ptr::null(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// The maximum filename length on the filesystem holding `path`.
///
/// Queried from the target filesystem rather than assumed; falls back to
/// 255 when the query is unsupported.
#[allow(unsafe_code)]
pub fn name_max(path: &Path) -> usize {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return DEFAULT_NAME_MAX;
    };

    // SAFETY: c_path is a valid null-terminated string; pathconf has no
    // other preconditions.
    let limit = unsafe { libc::pathconf(c_path.as_ptr(), libc::_PC_NAME_MAX) };
    if limit > 0 {
        limit as usize
    } else {
        DEFAULT_NAME_MAX
    }
}
