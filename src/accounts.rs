use crate::error::BrewboxError;
use log::debug;
use std::ffi::{CStr, CString};
use std::io;
use std::path::PathBuf;
use std::ptr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub home: PathBuf,
    pub shell: String,
}

pub trait AccountDb {
    fn lookup(&self, name: &str) -> Result<Option<Account>, BrewboxError>;
    fn list(&self) -> Result<Vec<String>, BrewboxError>;
}

pub struct SystemAccounts;

impl AccountDb for SystemAccounts {
    fn lookup(&self, name: &str) -> Result<Option<Account>, BrewboxError> {
        let c_name = CString::new(name).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("account name {name:?} contains a NUL byte"),
            )
        })?;
        lookup_with(|pwd, buf, result| unsafe {
            // SAFETY: every pointer refers to storage owned by lookup_with for the call
            libc::getpwnam_r(c_name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result)
        })
        .map_err(|err| {
            BrewboxError::Io(io::Error::new(
                err.kind(),
                format!("failed to look up account {name:?}: {err}"),
            ))
        })
    }

    fn list(&self) -> Result<Vec<String>, BrewboxError> {
        list_accounts()
    }
}

pub fn current_username() -> Result<String, BrewboxError> {
    // SAFETY: geteuid has no preconditions
    let uid = unsafe { libc::geteuid() };
    let account = lookup_with(|pwd, buf, result| unsafe {
        // SAFETY: every pointer refers to storage owned by lookup_with for the call
        libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), result)
    })?;
    match account {
        Some(account) if !account.name.is_empty() => Ok(account.name),
        _ => Err(BrewboxError::Config(format!(
            "cannot determine the current user (uid {uid}); set `operator` in the config file"
        ))),
    }
}

fn lookup_with<F>(mut call: F) -> Result<Option<Account>, io::Error>
where
    F: FnMut(&mut libc::passwd, &mut Vec<libc::c_char>, &mut *mut libc::passwd) -> libc::c_int,
{
    let mut buf: Vec<libc::c_char> = vec![0; 4096];
    loop {
        // SAFETY: passwd is plain old data; an all-zero value is valid before the call fills it
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = call(&mut pwd, &mut buf, &mut result);
        if rc == libc::ERANGE && buf.len() < (1 << 20) {
            let grown = buf.len() * 2;
            buf.resize(grown, 0);
            continue;
        }
        // Some NSS backends report "no such user" as ENOENT instead of a null result.
        if rc == libc::ENOENT || rc == libc::ESRCH {
            return Ok(None);
        }
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        if result.is_null() {
            return Ok(None);
        }
        // SAFETY: on success the string fields point into `buf`, which is still alive
        return Ok(Some(unsafe { account_from_passwd(&pwd) }));
    }
}

unsafe fn account_from_passwd(pwd: &libc::passwd) -> Account {
    let text = |ptr: *const libc::c_char| {
        if ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().to_string()
        }
    };
    Account {
        name: text(pwd.pw_name),
        uid: pwd.pw_uid,
        home: PathBuf::from(text(pwd.pw_dir)),
        shell: text(pwd.pw_shell),
    }
}

#[cfg(target_os = "macos")]
fn list_accounts() -> Result<Vec<String>, BrewboxError> {
    use std::process::Command;

    // getpwent on macOS only sees the flat-file records, not the local directory node.
    let output = Command::new("dscl")
        .args([".", "-list", "/Users"])
        .output()
        .map_err(|err| BrewboxError::Spawn {
            command: "dscl . -list /Users".to_string(),
            hint: None,
            source: err,
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(BrewboxError::StepFailed {
            step: 1,
            total: 1,
            command: "dscl . -list /Users".to_string(),
            status_code: output.status.code().unwrap_or(1),
            stderr: if stderr.is_empty() { None } else { Some(stderr) },
        });
    }
    let names = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!("Enumerated {} accounts via dscl", names.len());
    Ok(names)
}

#[cfg(not(target_os = "macos"))]
fn list_accounts() -> Result<Vec<String>, BrewboxError> {
    let mut names = Vec::new();
    // SAFETY: the passwd iteration is process-global; brewbox is single-threaded and
    // copies each entry before the next getpwent call.
    unsafe {
        libc::setpwent();
        loop {
            let entry = libc::getpwent();
            if entry.is_null() {
                break;
            }
            if !(*entry).pw_name.is_null() {
                names.push(CStr::from_ptr((*entry).pw_name).to_string_lossy().to_string());
            }
        }
        libc::endpwent();
    }
    debug!("Enumerated {} accounts via getpwent", names.len());
    Ok(names)
}
