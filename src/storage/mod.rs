//! Persistencia en disco: respaldos de cola y playlists.

pub mod playlists;
pub mod snapshot;

pub use playlists::{Playlist, PlaylistError, PlaylistStore};
pub use snapshot::{BackupKind, LoadMode, SnapshotError, SnapshotStore};
