// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Rendezvous directory and socket file management.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

use alarmbus_client::{RUN_DIR_MODE, SOCKET_FILE_MODE};
use mio::net::{UnixDatagram, UnixListener};
use tracing::{info, warn};

use crate::error::{BrokerError, Result};

/// Device and inode of a socket file we bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Result of checking a socket file against what we bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketCheck {
    Healthy,
    /// Ours, but its mode had drifted and was reset.
    ModeRepaired,
    Missing,
    /// Not a socket, or not the socket we bound.
    Replaced,
}

impl SocketCheck {
    pub(crate) fn needs_rebuild(self) -> bool {
        matches!(self, SocketCheck::Missing | SocketCheck::Replaced)
    }
}

/// Create the run directory if needed and force its mode to owner-only.
pub(crate) fn ensure_run_dir(dir: &Path) -> Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(metadata) if metadata.is_dir() => {
            if metadata.permissions().mode() & 0o777 != RUN_DIR_MODE {
                fs::set_permissions(dir, fs::Permissions::from_mode(RUN_DIR_MODE))?;
                info!("[Sockets] Reset mode of {} to {:o}", dir.display(), RUN_DIR_MODE);
            }
            Ok(())
        }
        Ok(_) => Err(BrokerError::PathInUse {
            path: dir.to_path_buf(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            fs::set_permissions(dir, fs::Permissions::from_mode(RUN_DIR_MODE))?;
            info!("[Sockets] Created run directory {}", dir.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Clear a stale file from a socket path before binding.
fn clear_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(BrokerError::PathInUse {
            path: path.to_path_buf(),
        }),
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Restrict a freshly bound socket file and record its identity.
fn finish_bind(path: &Path) -> Result<SocketIdentity> {
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_FILE_MODE))?;
    Ok(SocketIdentity::of(&fs::symlink_metadata(path)?))
}

pub(crate) fn bind_datagram(path: &Path) -> Result<(UnixDatagram, SocketIdentity)> {
    clear_path(path)?;
    let socket = UnixDatagram::bind(path).map_err(|source| BrokerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((socket, finish_bind(path)?))
}

pub(crate) fn bind_listener(path: &Path) -> Result<(UnixListener, SocketIdentity)> {
    clear_path(path)?;
    let listener = UnixListener::bind(path).map_err(|source| BrokerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((listener, finish_bind(path)?))
}

/// Verify that `path` is still the socket we bound, repairing its mode.
pub(crate) fn check_socket(path: &Path, expected: Option<SocketIdentity>) -> SocketCheck {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return SocketCheck::Missing,
        Err(e) => {
            warn!("[Sockets] Cannot stat {}: {}", path.display(), e);
            return SocketCheck::Missing;
        }
    };
    if !metadata.file_type().is_socket() || expected != Some(SocketIdentity::of(&metadata)) {
        return SocketCheck::Replaced;
    }
    if metadata.permissions().mode() & 0o777 == SOCKET_FILE_MODE {
        return SocketCheck::Healthy;
    }
    match fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_FILE_MODE)) {
        Ok(()) => SocketCheck::ModeRepaired,
        Err(e) => {
            warn!("[Sockets] Cannot reset mode of {}: {}", path.display(), e);
            SocketCheck::Replaced
        }
    }
}

/// Unlink a socket file at shutdown, unless someone else owns it by now.
pub(crate) fn remove_if_ours(path: &Path, expected: Option<SocketIdentity>) {
    if check_socket(path, expected).needs_rebuild() {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!("[Sockets] Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_ensure_run_dir_creates_and_repairs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("bus");
        ensure_run_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(mode(&dir), RUN_DIR_MODE);

        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
        ensure_run_dir(&dir).unwrap();
        assert_eq!(mode(&dir), RUN_DIR_MODE);

        let file = root.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(ensure_run_dir(&file), Err(BrokerError::PathInUse { .. })));
    }

    #[test]
    fn test_bind_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report");
        fs::write(&path, b"stale").unwrap();

        let (_socket, identity) = bind_datagram(&path).unwrap();
        assert_eq!(mode(&path), SOCKET_FILE_MODE);
        assert_eq!(check_socket(&path, Some(identity)), SocketCheck::Healthy);
    }

    #[test]
    fn test_check_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarm");
        let (listener, identity) = bind_listener(&path).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();
        assert_eq!(check_socket(&path, Some(identity)), SocketCheck::ModeRepaired);
        assert_eq!(mode(&path), SOCKET_FILE_MODE);

        // Same path, different socket.
        let foreign_path = dir.path().join("foreign");
        let _foreign = std::os::unix::net::UnixListener::bind(&foreign_path).unwrap();
        fs::rename(&foreign_path, &path).unwrap();
        assert_eq!(check_socket(&path, Some(identity)), SocketCheck::Replaced);
        drop(listener);

        fs::remove_file(&path).unwrap();
        assert_eq!(check_socket(&path, Some(identity)), SocketCheck::Missing);
        assert_eq!(check_socket(&path, None), SocketCheck::Missing);

        fs::write(&path, b"not a socket").unwrap();
        assert_eq!(check_socket(&path, Some(identity)), SocketCheck::Replaced);
    }

    #[test]
    fn test_remove_if_ours_leaves_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarm");
        let (_listener, identity) = bind_listener(&path).unwrap();

        let other = dir.path().join("other");
        let (_other_listener, other_identity) = bind_listener(&other).unwrap();
        remove_if_ours(&other, Some(identity));
        assert!(other.exists());

        remove_if_ours(&path, Some(identity));
        assert!(!path.exists());
        remove_if_ours(&other, Some(other_identity));
        assert!(!other.exists());
    }
}
