use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    decoder::Decoder,
    item::{Item, ItemKind},
    notify::{Notice, Notifier},
    queue::{QueueError, QueueListing, QueueStore},
    session::{ConnectError, SessionManager, VoiceTransport},
};
use crate::{
    sources::ResolverRegistry,
    storage::snapshot::{BackupKind, LoadMode, SnapshotError, SnapshotStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Resolving,
    Connecting,
    Streaming,
    Disconnecting,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub max_queue_size: usize,
    pub connect_retries: u32,
    pub connect_timeout: Duration,
    /// Descargas temporales; cada guild usa un subdirectorio
    pub download_dir: PathBuf,
    /// Respaldos de cola; cada guild usa un subdirectorio
    pub backup_dir: PathBuf,
}

/// Colaboradores compartidos por todos los reproductores
#[derive(Clone)]
pub struct PlayerDeps {
    pub transport: Arc<dyn VoiceTransport>,
    pub decoder: Arc<dyn Decoder>,
    pub resolvers: Arc<ResolverRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: PlayerSettings,
}

/// Cómo terminó la copia de un stream
enum StreamOutcome {
    Finished(u64),
    Cancelled,
    Lost,
    Failed(String),
}

struct Inner {
    state: PlayerState,
    current: Option<Item>,
    /// Item sacado de la cola que todavía se está resolviendo o conectando
    pending: Option<Item>,
    stream_cancel: Option<CancellationToken>,
    halt: CancellationToken,
    loop_task: Option<JoinHandle<()>>,
    running: bool,
    last_channel: Option<ChannelId>,
}

/// Coordinador de reproducción de una guild.
///
/// Un único bucle consumidor por guild saca items de la cola, los resuelve,
/// conecta y reproduce. Los productores solo lanzan el bucle si no hay uno
/// corriendo, y eso se decide bajo el lock de estado.
pub struct GuildPlayer {
    guild_id: GuildId,
    queue: QueueStore,
    inner: Mutex<Inner>,
    session: tokio::sync::Mutex<SessionManager>,
    /// Serializa las detenciones del bucle
    halting: tokio::sync::Mutex<()>,
    snapshots: SnapshotStore,
    download_dir: PathBuf,
    deps: PlayerDeps,
}

impl GuildPlayer {
    pub fn new(guild_id: GuildId, deps: PlayerDeps) -> Self {
        let settings = &deps.settings;
        let session = SessionManager::new(
            guild_id,
            Arc::clone(&deps.transport),
            Arc::clone(&deps.notifier),
            settings.connect_timeout,
        );

        Self {
            guild_id,
            queue: QueueStore::new(settings.max_queue_size),
            inner: Mutex::new(Inner {
                state: PlayerState::Idle,
                current: None,
                pending: None,
                stream_cancel: None,
                halt: CancellationToken::new(),
                loop_task: None,
                running: false,
                last_channel: None,
            }),
            session: tokio::sync::Mutex::new(session),
            halting: tokio::sync::Mutex::new(()),
            snapshots: SnapshotStore::new(settings.backup_dir.join(guild_id.to_string())),
            download_dir: settings.download_dir.join(guild_id.to_string()),
            deps,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().state
    }

    pub fn current(&self) -> Option<Item> {
        self.inner.lock().current.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Último canal de voz en el que sonó algo
    pub fn last_channel(&self) -> Option<ChannelId> {
        self.inner.lock().last_channel
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Agrega al final de la cola y arranca el bucle si hace falta
    pub fn enqueue(self: &Arc<Self>, item: Item) -> Result<usize, PlayerError> {
        let position = self.queue.enqueue_append(item)?;
        self.ensure_running();
        Ok(position)
    }

    pub fn enqueue_many(self: &Arc<Self>, items: Vec<Item>) -> usize {
        let added = self.queue.enqueue_many(items);
        self.ensure_running();
        added
    }

    /// Corta solo el stream en curso; el item actual no vuelve a la cola
    pub fn skip(&self) -> Result<Item, PlayerError> {
        let inner = self.inner.lock();
        match (&inner.current, &inner.stream_cancel) {
            (Some(current), Some(cancel)) => {
                info!("⏭️ Saltando: {}", current.title);
                cancel.cancel();
                Ok(current.clone())
            }
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    pub fn move_to_front(&self, index: i64) -> Result<Item, PlayerError> {
        Ok(self.queue.move_to_front(index)?)
    }

    pub fn list(&self) -> QueueListing {
        let current = self.current();
        QueueListing {
            current,
            items: self.queue.snapshot_all(),
        }
    }

    /// Guarda el item actual y la cola en el respaldo ordinario
    pub async fn save_queue(&self) -> Result<usize, PlayerError> {
        let current = self.current();
        let queue = self.queue.snapshot_all();
        Ok(self
            .snapshots
            .save(BackupKind::Queue, current.as_ref(), &queue)
            .await?)
    }

    /// Reemplaza la cola con el contenido de un respaldo
    pub async fn load_queue(self: &Arc<Self>, kind: BackupKind) -> Result<usize, PlayerError> {
        let items = self.snapshots.load(kind).await?;
        let loaded = self.queue.replace_all(LoadMode::Normal.arrange(items));
        info!("📂 Cola restaurada desde {} ({} items)", kind.file_name(), loaded);
        self.ensure_running();
        Ok(loaded)
    }

    /// Vacía la cola, detiene el bucle y desconecta.
    ///
    /// Lo que se encole mientras el bucle se detiene vuelve a arrancarlo.
    pub async fn stop_all(self: &Arc<Self>) -> usize {
        let cleared = self.queue.clear();
        self.halt().await;
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        self.ensure_running();
        cleared
    }

    /// Antepone un item prioritario y, si algo estaba en marcha, lo detiene
    /// y reanuda detrás del item prioritario.
    ///
    /// Con `A` sonando y cola `[B]`, el resultado es `[X, A, B]`. La parada
    /// forzada deja además el respaldo de emergencia, igual que una caída.
    pub async fn fire_interrupt(self: &Arc<Self>, item: Item) -> Result<(), PlayerError> {
        info!("🚨 Interrupción programada en guild {}: {}", self.guild_id, item.title);

        // Se detiene antes de anteponer para que el bucle no saque el item
        // prioritario ni avance de item mientras se respalda
        let interrupted = if self.is_running() {
            Some(self.halt().await)
        } else {
            None
        };
        let playing = interrupted.clone().flatten();

        if let Err(QueueError::Full { .. }) = self.queue.enqueue_prepend(item.clone()) {
            warn!("Cola llena, la interrupción entra igual al frente");
            self.queue.reinsert_at_front(item);
        }

        let queue = self.queue.snapshot_all();
        let saved = self
            .snapshots
            .save(BackupKind::Interrupt, playing.as_ref(), &queue)
            .await;

        let result = match interrupted {
            None => saved.map(|_| ()),
            Some(playing) => {
                self.persist_crash(playing.as_ref()).await;
                let mode = if playing.is_some() {
                    LoadMode::InterruptResume
                } else {
                    LoadMode::Normal
                };
                let loaded = match saved {
                    Ok(_) => self.snapshots.load(BackupKind::Interrupt).await,
                    Err(e) => Err(e),
                };
                match loaded {
                    Ok(items) => {
                        self.queue.replace_all(mode.arrange(items));
                        Ok(())
                    }
                    Err(e) => {
                        error!("Respaldo de interrupción no disponible, se reanuda desde memoria: {}", e);
                        let items = playing.into_iter().chain(queue).collect();
                        self.queue.replace_all(mode.arrange(items));
                        Err(e)
                    }
                }
            }
        };

        self.ensure_running();
        result.map_err(PlayerError::from)
    }

    /// Lanza el bucle consumidor si hay items y no hay otro corriendo
    pub fn ensure_running(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock();
        if inner.running || self.queue.is_empty() {
            return false;
        }

        inner.running = true;
        let halt = inner.halt.clone();
        inner.loop_task = Some(tokio::spawn(Arc::clone(self).run(halt)));
        debug!("▶️ Bucle de reproducción iniciado en guild {}", self.guild_id);
        true
    }

    /// Cancela la ejecución actual y espera a que el bucle termine.
    ///
    /// Devuelve el item que estaba sonando o preparándose en el instante de
    /// la cancelación. Hasta que el bucle termina, `running` sigue activo y
    /// los productores no lanzan otro; quien llama decide si relanzarlo.
    async fn halt(&self) -> Option<Item> {
        let _halting = self.halting.lock().await;
        let (task, interrupted) = {
            let mut inner = self.inner.lock();
            inner.halt.cancel();
            inner.halt = CancellationToken::new();
            let interrupted = inner.current.clone().or_else(|| inner.pending.clone());
            (inner.loop_task.take(), interrupted)
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("El bucle de reproducción terminó con error: {}", e);
            }
        }
        let mut inner = self.inner.lock();
        // Un bucle lanzado después de la cancelación sigue siendo válido
        if inner.loop_task.is_none() {
            inner.running = false;
        }
        interrupted
    }

    async fn run(self: Arc<Self>, halt: CancellationToken) {
        loop {
            let Some(item) = self.take_next(&halt) else {
                self.go_idle().await;
                if self.try_finish(&halt) {
                    break;
                }
                continue;
            };
            self.play_item(item, &halt).await;
        }
        debug!("⏸️ Bucle de reproducción terminado en guild {}", self.guild_id);
    }

    fn take_next(&self, halt: &CancellationToken) -> Option<Item> {
        let mut inner = self.inner.lock();
        if halt.is_cancelled() {
            return None;
        }
        let item = self.queue.dequeue_head()?;
        inner.state = PlayerState::Resolving;
        inner.pending = Some(item.clone());
        Some(item)
    }

    /// Marca el bucle como terminado salvo que hayan llegado items nuevos.
    /// Si lo detuvo `halt`, es `halt` quien limpia `running`.
    fn try_finish(&self, halt: &CancellationToken) -> bool {
        let mut inner = self.inner.lock();
        if halt.is_cancelled() {
            return true;
        }
        if self.queue.is_empty() {
            inner.running = false;
            return true;
        }
        false
    }

    fn set_state(&self, state: PlayerState) {
        self.inner.lock().state = state;
    }

    async fn play_item(&self, item: Item, halt: &CancellationToken) {
        let Some(item) = self.prepare(item, halt).await else {
            self.inner.lock().pending = None;
            return;
        };
        self.inner.lock().pending = Some(item.clone());

        self.set_state(PlayerState::Connecting);
        let connected = {
            let mut session = self.session.lock().await;
            session
                .connect(
                    item.channel_id,
                    self.deps.settings.connect_retries,
                    halt,
                )
                .await
        };

        match connected {
            Ok(()) => self.stream(item, halt).await,
            Err(ConnectError::Cancelled) => {
                debug!("Conexión cancelada para {}", item.title);
            }
            Err(e) => {
                warn!("🔌 Item abandonado ({}): {}", item.title, e);
                self.inner.lock().pending = None;
                self.deps
                    .notifier
                    .reply(
                        item.channel_id,
                        Notice::error(format!("No pude conectarme para reproducir **{}**", item.title)),
                    )
                    .await;
            }
        }
    }

    /// Deja el item listo para el decodificador, o `None` si hay que descartarlo
    async fn prepare(&self, mut item: Item, halt: &CancellationToken) -> Option<Item> {
        if item.kind() == ItemKind::RemoteResolved && !file_exists(item.playable_path()).await {
            debug!("Archivo de {} ya no existe, se descargará de nuevo", item.title);
            item.reset_download();
        }

        match item.kind() {
            ItemKind::LocalAlias | ItemKind::LocalAttachment => {
                if file_exists(item.playable_path()).await {
                    Some(item)
                } else {
                    warn!("🗑️ Archivo local no encontrado, descartando: {}", item.title);
                    None
                }
            }
            ItemKind::RemoteResolved => Some(item),
            ItemKind::RemotePending => {
                let url = item.url()?.to_string();
                let resolver = self.deps.resolvers.active();

                let result = tokio::select! {
                    biased;
                    _ = halt.cancelled() => return None,
                    result = resolver.resolve(&url, &self.download_dir) => result,
                };

                match result {
                    Ok(path) => {
                        item.resolve(path);
                        Some(item)
                    }
                    Err(e) => {
                        warn!("⚠️ {} no pudo resolver {}: {}", resolver.name(), url, e);
                        self.deps
                            .notifier
                            .reply(
                                item.channel_id,
                                Notice::error(format!("No se pudo descargar **{}**, la salto", item.title)),
                            )
                            .await;
                        None
                    }
                }
            }
        }
    }

    async fn stream(&self, mut item: Item, halt: &CancellationToken) {
        item.mark_started(Utc::now());
        let cancel = halt.child_token();
        {
            let mut inner = self.inner.lock();
            inner.state = PlayerState::Streaming;
            inner.current = Some(item.clone());
            inner.pending = None;
            inner.stream_cancel = Some(cancel.clone());
            inner.last_channel = Some(item.channel_id);
        }

        let queue = self.queue.snapshot_all();
        if let Err(e) = self
            .snapshots
            .save(BackupKind::Queue, Some(&item), &queue)
            .await
        {
            warn!("No se pudo respaldar la cola: {}", e);
        }

        info!("🎵 Reproduciendo: {} ({})", item.title, item.kind());
        self.deps
            .notifier
            .set_now_playing(Some(item.title.clone()))
            .await;

        let outcome = self.pump(&item, &cancel).await;
        {
            let mut inner = self.inner.lock();
            inner.current = None;
            inner.stream_cancel = None;
        }

        // Un adjunto ya consumido no se vuelve a usar; si lo cortó una
        // detención o una caída puede volver desde un respaldo
        let consumed = match &outcome {
            StreamOutcome::Lost => false,
            StreamOutcome::Cancelled => !halt.is_cancelled(),
            StreamOutcome::Finished(_) | StreamOutcome::Failed(_) => true,
        };
        if consumed && item.kind() == ItemKind::LocalAttachment {
            remove_attachment(&item).await;
        }

        match outcome {
            StreamOutcome::Finished(bytes) => {
                debug!("✅ Terminado: {} ({} bytes)", item.title, bytes)
            }
            StreamOutcome::Cancelled => info!("⏹️ Stream cancelado: {}", item.title),
            StreamOutcome::Failed(reason) => {
                warn!("⚠️ Falló la reproducción de {}: {}", item.title, reason)
            }
            StreamOutcome::Lost => self.crash(item).await,
        }
    }

    /// Copia la salida del decodificador a la conexión hasta terminar,
    /// cancelarse o perder la conexión. El proceso siempre se termina.
    async fn pump(&self, item: &Item, cancel: &CancellationToken) -> StreamOutcome {
        let Some(path) = item.playable_path() else {
            return StreamOutcome::Failed("item sin ruta local".to_string());
        };

        let (mut sink, lost) = {
            let mut session = self.session.lock().await;
            session.begin_stream(cancel.clone());
            let lost = session.lost_signal().unwrap_or_default();
            match session.open_sink().await {
                Ok(sink) => (sink, lost),
                Err(e) => {
                    session.end_stream();
                    return StreamOutcome::Failed(e.to_string());
                }
            }
        };

        let mut decode = match self.deps.decoder.start(path).await {
            Ok(decode) => decode,
            Err(e) => {
                sink.abort();
                self.session.lock().await.end_stream();
                return StreamOutcome::Failed(e.to_string());
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = lost.cancelled() => StreamOutcome::Lost,
            _ = cancel.cancelled() => StreamOutcome::Cancelled,
            result = decode.pump(sink.as_mut()) => match result {
                Ok(bytes) => StreamOutcome::Finished(bytes),
                Err(e) => StreamOutcome::Failed(e.to_string()),
            },
        };

        if !matches!(outcome, StreamOutcome::Finished(_)) {
            sink.abort();
        }
        decode.terminate().await;
        self.session.lock().await.end_stream();
        outcome
    }

    /// Caída inesperada de la conexión a mitad de reproducción
    async fn crash(&self, item: Item) {
        self.set_state(PlayerState::Disconnecting);
        error!(
            "💥 Conexión perdida en guild {} mientras sonaba {}",
            self.guild_id, item.title
        );

        self.persist_crash(Some(&item)).await;
        self.session.lock().await.disconnect().await;

        self.deps
            .notifier
            .reply(
                item.channel_id,
                Notice::error("Se perdió la conexión de voz. La cola quedó respaldada, usa `/load` para recuperarla"),
            )
            .await;
    }

    /// Respalda `current` y la cola en el respaldo de emergencia y vacía la cola
    async fn persist_crash(&self, current: Option<&Item>) {
        let queue = self.queue.snapshot_all();
        match self.snapshots.save(BackupKind::Crash, current, &queue).await {
            Ok(count) => info!("💾 Respaldo de emergencia con {} items", count),
            Err(e) => error!("No se pudo escribir el respaldo de emergencia: {}", e),
        }
        self.queue.clear();
    }

    /// Vuelve a reposo: sin item actual, desconectado y sin descargas
    async fn go_idle(&self) {
        {
            let mut inner = self.inner.lock();
            inner.current = None;
            inner.pending = None;
            inner.stream_cancel = None;
        }

        self.session.lock().await.disconnect().await;
        self.clean_downloads().await;
        self.set_state(PlayerState::Idle);
    }

    async fn clean_downloads(&self) {
        let mut entries = match tokio::fs::read_dir(&self.download_dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_file() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("No se pudo borrar {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            debug!("🧹 {} descargas temporales eliminadas", removed);
        }
    }
}

async fn remove_attachment(item: &Item) {
    let Some(path) = item.playable_path() else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🧹 Adjunto eliminado: {}", path.display()),
        Err(e) => warn!("No se pudo borrar el adjunto {}: {}", path.display(), e),
    }
}

async fn file_exists(path: Option<&std::path::Path>) -> bool {
    match path {
        Some(path) => tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false),
        None => false,
    }
}

/// Reproductores de todas las guilds
pub struct AudioPlayer {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    deps: PlayerDeps,
}

impl AudioPlayer {
    pub fn new(deps: PlayerDeps) -> Self {
        Self {
            players: DashMap::new(),
            deps,
        }
    }

    /// Reproductor de una guild, creándolo si no existe
    pub fn guild(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildPlayer::new(guild_id, self.deps.clone())))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|p| Arc::clone(p.value()))
    }

    pub fn players(&self) -> Vec<Arc<GuildPlayer>> {
        self.players.iter().map(|p| Arc::clone(p.value())).collect()
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.deps.resolvers
    }

    /// Detiene todos los reproductores (apagado ordenado)
    pub async fn shutdown(&self) {
        for player in self.players() {
            player.stop_all().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{
        audio::{decoder::ProcessDecoder, session::testing::FakeTransport},
        sources::{testing::FakeResolver, Resolver},
    };
    use std::path::Path;

    /// Dependencias de prueba: transporte y resolver falsos bajo `dir`
    pub fn deps(
        dir: &Path,
        decoder: ProcessDecoder,
        notifier: Arc<dyn Notifier>,
    ) -> (PlayerDeps, Arc<FakeTransport>, Arc<FakeResolver>) {
        let transport = Arc::new(FakeTransport::default());
        let resolver = Arc::new(FakeResolver::default());
        let resolvers =
            ResolverRegistry::new(vec![Arc::clone(&resolver) as Arc<dyn Resolver>], "fake")
                .unwrap();

        let deps = PlayerDeps {
            transport: Arc::clone(&transport) as Arc<dyn VoiceTransport>,
            decoder: Arc::new(decoder),
            resolvers: Arc::new(resolvers),
            notifier,
            settings: PlayerSettings {
                max_queue_size: 100,
                connect_retries: 2,
                connect_timeout: Duration::from_secs(1),
                download_dir: dir.join("downloads"),
                backup_dir: dir.join("backups"),
            },
        };
        (deps, transport, resolver)
    }
}
