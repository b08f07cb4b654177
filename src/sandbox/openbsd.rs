use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use super::backend::SandboxBackend;
use super::policy::PathGrant;
use super::promises::PromiseSet;

/// Enforcing backend: `unveil(2)` + `pledge(2)`.
///
/// unveil restrictions are not inherited through exec(2), which is why the
/// shell layer runs sh, scripts, and common utilities in-process here.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenBsdBackend;

impl SandboxBackend for OpenBsdBackend {
    fn name(&self) -> &'static str {
        "openbsd"
    }

    fn is_enforcing(&self) -> bool {
        true
    }

    fn reveal(&self, grant: &PathGrant) -> io::Result<()> {
        let path = CString::new(grant.path.as_os_str().as_bytes())?;
        let perms = CString::new(grant.perms.to_string())?;
        let ret = unsafe { libc::unveil(path.as_ptr(), perms.as_ptr()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn seal(&self) -> io::Result<()> {
        let ret = unsafe { libc::unveil(ptr::null(), ptr::null()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn restrict(&self, promises: &PromiseSet) -> io::Result<()> {
        let promises = CString::new(promises.to_string())?;
        // execpromises stay NULL: exec'd children are not pledged.
        let ret = unsafe { libc::pledge(promises.as_ptr(), ptr::null()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
