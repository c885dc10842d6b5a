use serenity::model::id::{ChannelId, UserId};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{direct_url, ResolveError};
use crate::audio::item::Item;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "flac", "m4a", "opus", "webm"];

/// Sonidos registrados por alias: cada archivo de audio del directorio de
/// sonidos es un alias con el nombre de su archivo sin extensión.
#[derive(Debug, Clone)]
pub struct AliasBook {
    dir: PathBuf,
}

impl AliasBook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Aliases disponibles, ordenados
    pub async fn list(&self) -> Result<Vec<String>, ResolveError> {
        let mut names: Vec<String> = self
            .entries()
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Ruta del sonido para un alias (sin distinguir mayúsculas)
    pub async fn lookup(&self, alias: &str) -> Result<Option<PathBuf>, ResolveError> {
        let wanted = alias.trim();
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, path)| path))
    }

    /// Crea el item para un alias, o `None` si no existe
    pub async fn item(
        &self,
        alias: &str,
        channel_id: ChannelId,
        requested_by: UserId,
    ) -> Result<Option<Item>, ResolveError> {
        Ok(self
            .lookup(alias)
            .await?
            .map(|path| Item::alias(alias.trim().to_lowercase(), path, channel_id, requested_by)))
    }

    async fn entries(&self) -> Result<Vec<(String, PathBuf)>, ResolveError> {
        let mut found = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !is_audio_file(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((stem.to_lowercase(), path.clone()));
            }
        }
        Ok(found)
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Guarda los adjuntos subidos por usuarios en el directorio de subidas
pub struct AttachmentStore {
    client: reqwest::Client,
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    /// Descarga un adjunto y devuelve su ruta local
    pub async fn fetch(&self, url: &str, filename: &str) -> Result<PathBuf, ResolveError> {
        let path = direct_url::download_to(&self.client, url, &self.dir, Some(filename)).await?;
        info!("📎 Adjunto guardado: {}", path.display());
        Ok(path)
    }

    pub fn accepts(filename: &str) -> bool {
        let accepted = is_audio_file(Path::new(filename)) || filename.to_lowercase().ends_with(".mp4");
        debug!("Adjunto {} aceptado: {}", filename, accepted);
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::item::ItemKind;
    use pretty_assertions::assert_eq;

    fn book_with(files: &[&str]) -> (tempfile::TempDir, AliasBook) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), b"x").unwrap();
        }
        let book = AliasBook::new(dir.path());
        (dir, book)
    }

    #[tokio::test]
    async fn test_lists_audio_files_only() {
        let (_dir, book) = book_with(&["Horn.mp3", "bell.ogg", "notes.txt", "drum.WAV"]);
        assert_eq!(book.list().await.unwrap(), vec!["bell", "drum", "horn"]);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let (dir, book) = book_with(&["Horn.mp3"]);
        let path = book.lookup("HORN").await.unwrap();
        assert_eq!(path, Some(dir.path().join("Horn.mp3")));
        assert_eq!(book.lookup("bell").await.unwrap(), None);

        let item = book
            .item(" Horn ", ChannelId::new(1), UserId::new(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.kind(), ItemKind::LocalAlias);
        assert_eq!(item.title, "horn");
    }

    #[tokio::test]
    async fn test_missing_sounds_dir_is_empty() {
        let book = AliasBook::new("/definitely/not/a/dir");
        assert!(book.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_accepts_audio_attachments() {
        assert!(AttachmentStore::accepts("voz.OGG"));
        assert!(AttachmentStore::accepts("clip.mp4"));
        assert!(!AttachmentStore::accepts("foto.png"));
    }
}
