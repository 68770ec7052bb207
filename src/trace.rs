//! Fixed-line diagnostics written with the raw platform write primitive.
//!
//! The formatted-output machinery may itself allocate, and a naive program
//! using this crate as its allocator would then recurse straight back into
//! `allocate`. So no `println!` here under any circumstance; one unbuffered
//! write for the message, one for the newline, results ignored.

pub(crate) const ALLOCATING: &str = "[VOIDSTAR] Allocating memory...";
pub(crate) const FREEING: &str = "[VOIDSTAR] Freeing memory...";
pub(crate) const BAD_RELEASE: &str = "[VOIDSTAR] Invalid free, ignoring...";

/// Writes `msg` plus a newline to the standard output stream.
#[cfg(unix)]
pub(crate) fn line(msg: &str) {
    unsafe {
        libc::write(1, msg.as_ptr().cast(), msg.len());
        libc::write(1, "\n".as_ptr().cast(), 1);
    }
}

/// Writes `msg` plus a newline to the standard output stream.
#[cfg(windows)]
pub(crate) fn line(msg: &str) {
    use windows::Win32::Storage::FileSystem::WriteFile;
    use windows::Win32::System::Console::{GetStdHandle, STD_OUTPUT_HANDLE};

    unsafe {
        if let Ok(handle) = GetStdHandle(STD_OUTPUT_HANDLE) {
            let _ = WriteFile(handle, Some(msg.as_bytes()), None, None);
            let _ = WriteFile(handle, Some(b"\n".as_slice()), None, None);
        }
    }
}
