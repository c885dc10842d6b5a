use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, UserId};
use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::LazyLock,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

use crate::audio::item::Item;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("regex de slug válida"));

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("la playlist \"{0}\" no existe")]
    NotFound(String),
    #[error("ya existe una playlist llamada \"{0}\"")]
    AlreadyExists(String),
    #[error("no tienes permiso para modificar \"{0}\"")]
    Unauthorized(String),
    #[error("solo se pueden guardar canciones remotas en una playlist")]
    NotRemote,
    #[error("nombre de playlist inválido")]
    InvalidName,
    #[error("error de E/S en playlists: {0}")]
    Io(#[from] std::io::Error),
    #[error("error serializando playlist: {0}")]
    Json(#[from] serde_json::Error),
}

/// Colección de canciones con dueño, independiente de la cola en vivo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub owner: UserId,
    #[serde(default)]
    pub whitelist: BTreeSet<UserId>,
    #[serde(default)]
    pub songs: Vec<Item>,
}

impl Playlist {
    pub fn can_edit(&self, user: UserId) -> bool {
        user == self.owner || self.whitelist.contains(&user)
    }
}

/// Nombre de archivo de una playlist: minúsculas, lo no alfanumérico a `_`
pub fn slug(name: &str) -> String {
    NON_ALNUM
        .replace_all(&name.trim().to_lowercase(), "_")
        .into_owned()
}

/// Playlists persistidas como un JSON por archivo, con cache en memoria
pub struct PlaylistStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Playlist>>,
}

impl PlaylistStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, PlaylistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut cache = HashMap::new();
        let mut files = fs::read_dir(&dir).await?;
        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let loaded = fs::read_to_string(&path)
                .await
                .map_err(PlaylistError::from)
                .and_then(|content| Ok(serde_json::from_str::<Playlist>(&content)?));
            match loaded {
                Ok(playlist) => {
                    cache.insert(slug(&playlist.name), playlist);
                }
                Err(e) => warn!("Error cargando playlist {}: {}", path.display(), e),
            }
        }

        if !cache.is_empty() {
            info!("📂 Cargadas {} playlists", cache.len());
        }

        Ok(Self {
            dir,
            cache: Mutex::new(cache),
        })
    }

    pub async fn create(&self, name: &str, owner: UserId) -> Result<Playlist, PlaylistError> {
        let key = Self::key(name)?;
        let mut cache = self.cache.lock().await;
        if cache.contains_key(&key) {
            return Err(PlaylistError::AlreadyExists(name.trim().to_string()));
        }

        let playlist = Playlist {
            name: name.trim().to_string(),
            owner,
            whitelist: BTreeSet::new(),
            songs: Vec::new(),
        };
        self.write(&key, &playlist).await?;
        cache.insert(key, playlist.clone());

        info!("📝 Playlist creada: {} (dueño {})", playlist.name, owner);
        Ok(playlist)
    }

    /// Agrega una canción remota; dueño o usuarios en la lista blanca
    pub async fn add_song(&self, name: &str, user: UserId, song: Item) -> Result<usize, PlaylistError> {
        if !song.is_remote() {
            return Err(PlaylistError::NotRemote);
        }

        self.update(name, |playlist| {
            if !playlist.can_edit(user) {
                return Err(PlaylistError::Unauthorized(playlist.name.clone()));
            }
            playlist.songs.push(song);
            Ok(playlist.songs.len())
        })
        .await
    }

    pub async fn delete(&self, name: &str, user: UserId) -> Result<(), PlaylistError> {
        let key = Self::key(name)?;
        let mut cache = self.cache.lock().await;
        let playlist = cache
            .get(&key)
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))?;
        if playlist.owner != user {
            return Err(PlaylistError::Unauthorized(playlist.name.clone()));
        }

        match fs::remove_file(self.file_path(&key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        cache.remove(&key);

        info!("🗑️ Playlist eliminada: {}", name);
        Ok(())
    }

    pub async fn whitelist(&self, name: &str, owner: UserId, target: UserId) -> Result<(), PlaylistError> {
        self.update(name, |playlist| {
            if playlist.owner != owner {
                return Err(PlaylistError::Unauthorized(playlist.name.clone()));
            }
            playlist.whitelist.insert(target);
            Ok(())
        })
        .await
    }

    pub async fn blacklist(&self, name: &str, owner: UserId, target: UserId) -> Result<(), PlaylistError> {
        self.update(name, |playlist| {
            if playlist.owner != owner {
                return Err(PlaylistError::Unauthorized(playlist.name.clone()));
            }
            playlist.whitelist.remove(&target);
            Ok(())
        })
        .await
    }

    pub async fn get(&self, name: &str) -> Result<Playlist, PlaylistError> {
        let key = Self::key(name)?;
        self.cache
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))
    }

    /// Nombres de todas las playlists, ordenados
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cache
            .lock()
            .await
            .values()
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Copia las canciones hacia el canal y usuario que cargan la playlist
    pub async fn songs_for(
        &self,
        name: &str,
        channel_id: ChannelId,
        user: UserId,
    ) -> Result<Vec<Item>, PlaylistError> {
        let playlist = self.get(name).await?;
        Ok(playlist
            .songs
            .iter()
            .map(|song| song.retarget(channel_id, user))
            .collect())
    }

    async fn update<T>(
        &self,
        name: &str,
        change: impl FnOnce(&mut Playlist) -> Result<T, PlaylistError>,
    ) -> Result<T, PlaylistError> {
        let key = Self::key(name)?;
        let mut cache = self.cache.lock().await;
        let playlist = cache
            .get_mut(&key)
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))?;

        let mut edited = playlist.clone();
        let result = change(&mut edited)?;
        self.write(&key, &edited).await?;
        *playlist = edited;
        Ok(result)
    }

    async fn write(&self, key: &str, playlist: &Playlist) -> Result<(), PlaylistError> {
        let content = serde_json::to_string_pretty(playlist)?;
        fs::write(self.file_path(key), content).await?;
        Ok(())
    }

    fn key(name: &str) -> Result<String, PlaylistError> {
        let key = slug(name);
        if key.trim_matches('_').is_empty() {
            return Err(PlaylistError::InvalidName);
        }
        Ok(key)
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OWNER: UserId = UserId::new(1);
    const FRIEND: UserId = UserId::new(2);
    const STRANGER: UserId = UserId::new(3);

    fn song(title: &str) -> Item {
        Item::remote(title, format!("https://youtu.be/{title}"), ChannelId::new(7), OWNER)
    }

    async fn store() -> (tempfile::TempDir, PlaylistStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Road Trip 2024!"), "road_trip_2024_");
        assert_eq!(slug("  chill  "), "chill");
    }

    #[tokio::test]
    async fn test_only_owner_and_whitelist_can_add() {
        let (_dir, store) = store().await;
        store.create("Mix", OWNER).await.unwrap();

        assert!(matches!(
            store.add_song("mix", FRIEND, song("a")).await,
            Err(PlaylistError::Unauthorized(_))
        ));

        store.whitelist("Mix", OWNER, FRIEND).await.unwrap();
        assert_eq!(store.add_song("mix", FRIEND, song("a")).await.unwrap(), 1);
        assert_eq!(store.add_song("Mix", OWNER, song("b")).await.unwrap(), 2);

        store.blacklist("Mix", OWNER, FRIEND).await.unwrap();
        assert!(matches!(
            store.add_song("Mix", FRIEND, song("c")).await,
            Err(PlaylistError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_whitelist_and_delete_are_owner_only() {
        let (_dir, store) = store().await;
        store.create("Mix", OWNER).await.unwrap();
        store.whitelist("Mix", OWNER, FRIEND).await.unwrap();

        assert!(matches!(
            store.whitelist("Mix", FRIEND, STRANGER).await,
            Err(PlaylistError::Unauthorized(_))
        ));
        assert!(matches!(
            store.delete("Mix", FRIEND).await,
            Err(PlaylistError::Unauthorized(_))
        ));

        store.delete("Mix", OWNER).await.unwrap();
        assert!(matches!(store.get("Mix").await, Err(PlaylistError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_local_songs_and_duplicates() {
        let (_dir, store) = store().await;
        store.create("Mix", OWNER).await.unwrap();
        assert!(matches!(
            store.create("mix", FRIEND).await,
            Err(PlaylistError::AlreadyExists(_))
        ));

        let local = Item::alias("horn", "horn.mp3".into(), ChannelId::new(7), OWNER);
        assert!(matches!(
            store.add_song("Mix", OWNER, local).await,
            Err(PlaylistError::NotRemote)
        ));
    }

    #[tokio::test]
    async fn test_playlists_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PlaylistStore::new(dir.path()).await.unwrap();
            store.create("Road Trip", OWNER).await.unwrap();
            store.add_song("road trip", OWNER, song("a")).await.unwrap();
        }
        assert!(dir.path().join("road_trip.json").exists());

        let store = PlaylistStore::new(dir.path()).await.unwrap();
        assert_eq!(store.list().await, vec!["Road Trip"]);

        let songs = store
            .songs_for("Road Trip", ChannelId::new(99), FRIEND)
            .await
            .unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].channel_id, ChannelId::new(99));
        assert_eq!(songs[0].requested_by, FRIEND);

        // La playlist guardada no cambia al cargarla
        let stored = store.get("Road Trip").await.unwrap();
        assert_eq!(stored.songs[0].channel_id, ChannelId::new(7));
    }
}
