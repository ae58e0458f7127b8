// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Naming scheme for the OS objects behind a buffer. Given a user-chosen
// buffer name, three named objects exist: the shared-memory region (the name
// itself), the data-available semaphore and the space-available semaphore.
// The reader additionally holds <tempdir>/zerobuffer/<name>.lock.

use std::path::PathBuf;

use crate::platform;

/// "Data-available" semaphore: the writer signals it, the reader waits on it.
pub(crate) fn data_sem_name(buffer: &str) -> String {
    format!("sem-w-{buffer}")
}

/// "Space-available" semaphore: the reader signals it, the writer waits on it.
pub(crate) fn space_sem_name(buffer: &str) -> String {
    format!("sem-r-{buffer}")
}

/// Lock file held for the lifetime of the reader.
pub(crate) fn lock_file_path(buffer: &str) -> PathBuf {
    platform::temp_directory().join(format!("{buffer}.lock"))
}

/// Request ring of a duplex channel: client writes, server reads.
pub(crate) fn request_buffer_name(channel: &str) -> String {
    format!("{channel}_request")
}

/// Response ring of a duplex channel: server writes, client reads.
pub(crate) fn response_buffer_name(channel: &str) -> String {
    format!("{channel}_response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_names() {
        assert_eq!(data_sem_name("foo"), "sem-w-foo");
        assert_eq!(space_sem_name("foo"), "sem-r-foo");
    }

    #[test]
    fn lock_path_lives_under_temp_directory() {
        let p = lock_file_path("foo");
        assert!(p.starts_with(platform::temp_directory()));
        assert_eq!(p.file_name().unwrap(), "foo.lock");
    }

    #[test]
    fn duplex_names() {
        assert_eq!(request_buffer_name("chan"), "chan_request");
        assert_eq!(response_buffer_name("chan"), "chan_response");
    }
}
