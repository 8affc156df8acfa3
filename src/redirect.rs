//! Opens the files named by a [`Side`]'s redirections, in the parent
//! process, before any `fork`/`exec` happens.
//!
//! Grounded on `examples/original_source/shell.c`'s `redirectSimple`/
//! `redirectPipe`, but opening in the parent rather than the forked child:
//! `std::process::Command` takes ownership of a [`std::fs::File`] via
//! [`std::process::Stdio::from`] and wires it onto the child's descriptor
//! itself, so there is no need to reopen files after `fork` the way the
//! original does from inside the child — and opening here means an open
//! failure is a plain `Result` in the parent, with the exact errno and path
//! in hand, rather than information that would otherwise have to cross the
//! fork boundary from a child that is about to `exit()`.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::os::unix::io::FromRawFd;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;

use crate::types::job::Side;

/// Reported as `open errno {errno}: could not open file: {path}`, the exact
/// client-visible text from the original implementation.
#[derive(Debug)]
pub struct RedirectError {
    pub errno: i32,
    pub path: String,
}

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "open errno {}: could not open file: {}",
            self.errno, self.path
        )
    }
}

impl std::error::Error for RedirectError {}

fn open_file(path: &str, flags: OFlag, mode: Mode) -> Result<File, RedirectError> {
    let c_path = CString::new(path).map_err(|_| RedirectError {
        errno: nix::errno::Errno::EINVAL as i32,
        path: path.to_string(),
    })?;

    let fd = open(c_path.as_c_str(), flags, mode).map_err(|e| RedirectError {
        errno: e as i32,
        path: path.to_string(),
    })?;

    // Safety: `fd` was just returned by `open(2)` and is uniquely owned here.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// The open files (if any) for one side's stdin/stdout/stderr redirections.
#[derive(Default)]
pub struct SideFiles {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

/// Opens every redirection target named by `side`. All-or-nothing: the first
/// failure is returned immediately, matching the original's behaviour of
/// aborting the job before ever forking when a redirection target can't be
/// opened.
pub fn open_side(side: &Side) -> Result<SideFiles, RedirectError> {
    let mut files = SideFiles::default();
    if let Some(path) = &side.in_path {
        files.stdin = Some(open_file(path, OFlag::O_RDONLY, Mode::empty())?);
    }
    if let Some(path) = &side.out_path {
        files.stdout = Some(open_file(
            path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
        )?);
    }
    if let Some(path) = &side.err_path {
        files.stderr = Some(open_file(
            path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
        )?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn side_with_no_redirections_opens_nothing() {
        let side = Side { argv: vec!["true".to_string()], ..Side::default() };
        let files = open_side(&side).unwrap();
        assert!(files.stdin.is_none());
        assert!(files.stdout.is_none());
        assert!(files.stderr.is_none());
    }

    #[test]
    fn missing_input_file_reports_errno_and_path() {
        let path = "/nonexistent/path/for/yashd/tests".to_string();
        let side = Side { argv: vec!["cat".to_string()], in_path: Some(path.clone()), ..Side::default() };

        let err = open_side(&side).unwrap_err();
        assert_eq!(err.path, path);
        assert_eq!(err.errno, nix::errno::Errno::ENOENT as i32);
        assert_eq!(err.to_string(), format!("open errno {}: could not open file: {}", err.errno, path));
    }

    #[test]
    fn output_redirection_creates_and_truncates() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("yashd-rs-test-{}.out", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();

        std::fs::write(&path, b"stale contents").unwrap();

        let side = Side { argv: vec!["true".to_string()], out_path: Some(path_str.clone()), ..Side::default() };
        let mut files = open_side(&side).unwrap();
        let mut f = files.stdout.take().unwrap();
        f.write_all(b"fresh").unwrap();
        drop(f);

        let mut contents = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "fresh");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn all_or_nothing_on_first_failure() {
        let side = Side {
            argv: vec!["cat".to_string()],
            in_path: Some("/nonexistent/for/yashd/tests".to_string()),
            out_path: Some("/also/nonexistent/for/yashd/tests".to_string()),
            ..Side::default()
        };
        // the stdin open fails first, so the function returns before ever
        // attempting the stdout open
        let err = open_side(&side).unwrap_err();
        assert_eq!(err.path, "/nonexistent/for/yashd/tests");
    }
}
