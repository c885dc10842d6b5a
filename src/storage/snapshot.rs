use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

use crate::audio::item::Item;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no hay respaldo guardado en {0}")]
    Missing(PathBuf),
    #[error("error de E/S en respaldo: {0}")]
    Io(#[from] std::io::Error),
    #[error("error serializando respaldo: {0}")]
    Json(#[from] serde_json::Error),
}

/// Archivos de respaldo de cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// Respaldo ordinario, antes de cada reproducción y con `/save`
    Queue,
    /// Estado previo a la interrupción diaria
    Interrupt,
    /// Estado al caerse la conexión a mitad de reproducción
    Crash,
}

impl BackupKind {
    pub fn file_name(self) -> &'static str {
        match self {
            BackupKind::Queue => "queue-contents.jsonl",
            BackupKind::Interrupt => "weed-queue.jsonl",
            BackupKind::Crash => "crash-backup.jsonl",
        }
    }
}

/// Cómo se ordenan los items leídos de un respaldo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Normal,
    /// Tras una interrupción el archivo empieza con [actual, interrupción]:
    /// se invierten los dos primeros para que la interrupción suene primero.
    InterruptResume,
}

impl LoadMode {
    pub fn arrange(self, mut items: Vec<Item>) -> Vec<Item> {
        if self == LoadMode::InterruptResume && items.len() >= 2 {
            items.swap(0, 1);
        }
        items
    }
}

/// Respaldos de cola en JSON, un registro por línea
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: BackupKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Escribe el item actual (si hay) seguido de la cola.
    ///
    /// Se escribe a un temporal hermano y se renombra, así un lector nunca
    /// ve un archivo a medias.
    pub async fn save(
        &self,
        kind: BackupKind,
        current: Option<&Item>,
        queue: &[Item],
    ) -> Result<usize, SnapshotError> {
        fs::create_dir_all(&self.dir).await?;

        let mut content = String::new();
        let mut count = 0;
        for item in current.into_iter().chain(queue.iter()) {
            content.push_str(&serde_json::to_string(item)?);
            content.push('\n');
            count += 1;
        }

        let target = self.path(kind);
        let temp = target.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&temp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &target).await?;

        info!("💾 Respaldo {} guardado con {} items", kind.file_name(), count);
        Ok(count)
    }

    /// Lee los items de un respaldo en orden de archivo.
    ///
    /// Las líneas que no se pueden interpretar se registran y se omiten.
    pub async fn load(&self, kind: BackupKind) -> Result<Vec<Item>, SnapshotError> {
        let path = self.path(kind);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::Missing(path));
            }
            Err(e) => return Err(e.into()),
        };

        let items = parse_records(&path, &content);
        info!("📂 Respaldo {} cargado con {} items", kind.file_name(), items.len());
        Ok(items)
    }
}

fn parse_records(path: &Path, content: &str) -> Vec<Item> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<Item>(line) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Línea {} inválida en {}: {}", n + 1, path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};

    fn item(title: &str) -> Item {
        Item::remote(
            title,
            format!("https://youtu.be/{title}"),
            ChannelId::new(3),
            UserId::new(4),
        )
    }

    fn titles(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_current_is_written_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let written = store
            .save(
                BackupKind::Queue,
                Some(&item("D")),
                &[item("A"), item("B"), item("C")],
            )
            .await
            .unwrap();
        assert_eq!(written, 4);

        let loaded = store.load(BackupKind::Queue).await.unwrap();
        assert_eq!(titles(&loaded), vec!["D", "A", "B", "C"]);
        assert!(!store.path(BackupKind::Queue).with_extension("jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn test_empty_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(BackupKind::Queue, None, &[]).await.unwrap();
        assert!(store.load(BackupKind::Queue).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_backup_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.load(BackupKind::Crash).await,
            Err(SnapshotError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let good = serde_json::to_string(&item("ok")).unwrap();
        std::fs::write(
            store.path(BackupKind::Interrupt),
            format!("{good}\n{{not json\n\n{good}\n"),
        )
        .unwrap();

        let loaded = store.load(BackupKind::Interrupt).await.unwrap();
        assert_eq!(titles(&loaded), vec!["ok", "ok"]);
    }

    #[test]
    fn test_interrupt_resume_swaps_first_two() {
        let arranged = LoadMode::InterruptResume.arrange(vec![item("A"), item("X"), item("B")]);
        assert_eq!(titles(&arranged), vec!["X", "A", "B"]);

        let normal = LoadMode::Normal.arrange(vec![item("A"), item("X"), item("B")]);
        assert_eq!(titles(&normal), vec!["A", "X", "B"]);
    }

    #[test]
    fn test_interrupt_resume_with_few_records() {
        assert!(LoadMode::InterruptResume.arrange(Vec::new()).is_empty());
        let single = LoadMode::InterruptResume.arrange(vec![item("X")]);
        assert_eq!(titles(&single), vec!["X"]);
    }
}
