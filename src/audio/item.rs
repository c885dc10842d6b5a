use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, UserId};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

/// Origen de un archivo local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalOrigin {
    /// Sonido registrado con un alias en el directorio de sonidos
    Alias,
    /// Archivo subido por un usuario
    Attachment,
}

/// Estado de descarga de un item remoto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Download {
    Pending,
    Resolved { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Local { origin: LocalOrigin, path: PathBuf },
    Remote { url: String, download: Download },
}

/// Variante observable de un item, usada para logs y listados
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    LocalAlias,
    LocalAttachment,
    RemotePending,
    RemoteResolved,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemKind::LocalAlias => "alias",
            ItemKind::LocalAttachment => "adjunto",
            ItemKind::RemotePending => "remoto (pendiente)",
            ItemKind::RemoteResolved => "remoto",
        };
        f.write_str(label)
    }
}

/// Una unidad de audio en cola, con su procedencia y destino.
///
/// Un item remoto pasa de `Pending` a `Resolved` una sola vez, cuando el
/// coordinador recibe la ruta del resolver activo. La cola nunca cambia la
/// variante de un item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    source: Source,
    pub channel_id: ChannelId,
    pub requested_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn alias(
        name: impl Into<String>,
        path: PathBuf,
        channel_id: ChannelId,
        requested_by: UserId,
    ) -> Self {
        Self::new(
            name.into(),
            Source::Local {
                origin: LocalOrigin::Alias,
                path,
            },
            channel_id,
            requested_by,
        )
    }

    pub fn attachment(
        filename: impl Into<String>,
        path: PathBuf,
        channel_id: ChannelId,
        requested_by: UserId,
    ) -> Self {
        Self::new(
            filename.into(),
            Source::Local {
                origin: LocalOrigin::Attachment,
                path,
            },
            channel_id,
            requested_by,
        )
    }

    pub fn remote(
        title: impl Into<String>,
        url: impl Into<String>,
        channel_id: ChannelId,
        requested_by: UserId,
    ) -> Self {
        Self::new(
            title.into(),
            Source::Remote {
                url: url.into(),
                download: Download::Pending,
            },
            channel_id,
            requested_by,
        )
    }

    fn new(title: String, source: Source, channel_id: ChannelId, requested_by: UserId) -> Self {
        Self {
            title,
            source,
            channel_id,
            requested_by,
            started_at: None,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match &self.source {
            Source::Local {
                origin: LocalOrigin::Alias,
                ..
            } => ItemKind::LocalAlias,
            Source::Local {
                origin: LocalOrigin::Attachment,
                ..
            } => ItemKind::LocalAttachment,
            Source::Remote {
                download: Download::Pending,
                ..
            } => ItemKind::RemotePending,
            Source::Remote {
                download: Download::Resolved { .. },
                ..
            } => ItemKind::RemoteResolved,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, Source::Remote { .. })
    }

    /// URL de origen, solo para items remotos
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            Source::Remote { url, .. } => Some(url),
            Source::Local { .. } => None,
        }
    }

    /// Ruta local si ya existe una (vacía hasta que se resuelve)
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::Local { path, .. } => Some(path),
            Source::Remote {
                download: Download::Resolved { path },
                ..
            } => Some(path),
            Source::Remote {
                download: Download::Pending,
                ..
            } => None,
        }
    }

    /// Ruta que puede entregarse al decodificador; `None` si está vacía
    pub fn playable_path(&self) -> Option<&Path> {
        self.path().filter(|p| !p.as_os_str().is_empty())
    }

    /// Marca un item remoto pendiente como descargado.
    ///
    /// Devuelve `false` (sin cambios) si el item no estaba pendiente.
    pub fn resolve(&mut self, local: PathBuf) -> bool {
        match &mut self.source {
            Source::Remote { download, .. } if *download == Download::Pending => {
                *download = Download::Resolved { path: local };
                true
            }
            _ => false,
        }
    }

    /// Vuelve a pendiente un item remoto cuyo archivo ya no existe
    pub fn reset_download(&mut self) {
        if let Source::Remote { download, .. } = &mut self.source {
            *download = Download::Pending;
        }
    }

    /// Copia el item hacia otro canal y solicitante (cargar playlists)
    pub fn retarget(&self, channel_id: ChannelId, requested_by: UserId) -> Self {
        Self {
            channel_id,
            requested_by,
            started_at: None,
            ..self.clone()
        }
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
    }

    /// Tiempo transcurrido desde que empezó a sonar
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at
            .and_then(|started| now.signed_duration_since(started).to_std().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn remote() -> Item {
        Item::remote(
            "Song",
            "https://youtu.be/abc",
            ChannelId::new(10),
            UserId::new(20),
        )
    }

    #[test]
    fn test_kinds_follow_source() {
        let alias = Item::alias("horn", "sounds/horn.mp3".into(), ChannelId::new(1), UserId::new(2));
        let upload = Item::attachment("a.ogg", "up/a.ogg".into(), ChannelId::new(1), UserId::new(2));
        assert_eq!(alias.kind(), ItemKind::LocalAlias);
        assert_eq!(upload.kind(), ItemKind::LocalAttachment);
        assert_eq!(remote().kind(), ItemKind::RemotePending);
    }

    #[test]
    fn test_pending_item_has_no_playable_path() {
        let item = remote();
        assert!(item.path().is_none());
        assert!(item.playable_path().is_none());

        let empty = Item::alias("x", PathBuf::new(), ChannelId::new(1), UserId::new(1));
        assert!(empty.playable_path().is_none());
    }

    #[test]
    fn test_resolution_happens_once() {
        let mut item = remote();
        assert!(item.resolve("/tmp/first.webm".into()));
        assert_eq!(item.kind(), ItemKind::RemoteResolved);
        assert!(!item.resolve("/tmp/second.webm".into()));
        assert_eq!(item.path(), Some(Path::new("/tmp/first.webm")));
        assert_eq!(item.url(), Some("https://youtu.be/abc"));
    }

    #[test]
    fn test_local_items_cannot_be_resolved() {
        let mut item = Item::alias("horn", "horn.mp3".into(), ChannelId::new(1), UserId::new(2));
        assert!(!item.resolve("/tmp/other".into()));
        item.reset_download();
        assert_eq!(item.kind(), ItemKind::LocalAlias);
    }

    #[test]
    fn test_reset_download_returns_to_pending() {
        let mut item = remote();
        item.resolve("/tmp/gone.webm".into());
        item.reset_download();
        assert_eq!(item.kind(), ItemKind::RemotePending);
        assert!(item.resolve("/tmp/again.webm".into()));
    }

    #[test]
    fn test_record_is_tagged() {
        let json = serde_json::to_value(remote()).unwrap();
        assert_eq!(json["source"]["kind"], "remote");
        assert_eq!(json["source"]["download"]["state"], "pending");
        assert!(json.get("started_at").is_none());
    }

    #[test]
    fn test_retarget_clears_start_time() {
        let mut item = remote();
        item.mark_started(Utc::now());
        let copy = item.retarget(ChannelId::new(99), UserId::new(7));
        assert_eq!(copy.channel_id, ChannelId::new(99));
        assert_eq!(copy.requested_by, UserId::new(7));
        assert!(copy.started_at.is_none());
        assert_eq!(copy.url(), item.url());
    }
}
