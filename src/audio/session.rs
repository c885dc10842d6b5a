use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notify::Notifier;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("tiempo de conexión agotado")]
    Timeout,
    #[error("el canal de audio está cerrado")]
    Closed,
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no se pudo conectar al canal {channel_id} tras {attempts} intentos")]
    Exhausted { channel_id: ChannelId, attempts: u32 },
    #[error("conexión cancelada")]
    Cancelled,
    #[error("error de conexión: {0}")]
    Failed(#[from] TransportError),
}

/// Destino de los bytes crudos que produce el decodificador
#[async_trait]
pub trait AudioSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// Cierra la entrada y espera a que termine de sonar lo ya enviado
    async fn finish(&mut self) -> Result<(), TransportError>;

    /// Corta la reproducción inmediatamente
    fn abort(&mut self);
}

/// Conexión viva a un canal de voz
#[async_trait]
pub trait VoiceLink: Send + Sync {
    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, TransportError>;
}

/// Transporte de la plataforma de chat (songbird en producción)
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Connection, TransportError>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), TransportError>;
}

pub struct Connection {
    pub channel_id: ChannelId,
    pub link: Arc<dyn VoiceLink>,
    /// El transporte lo cancela cuando la conexión se cae sin que la pidamos cerrar
    pub lost: CancellationToken,
}

/// Mantiene como máximo una conexión de voz por guild.
///
/// Cambiar de canal siempre desconecta primero: no hay multiplexado de
/// canales dentro de un mismo coordinador.
pub struct SessionManager {
    guild_id: GuildId,
    transport: Arc<dyn VoiceTransport>,
    notifier: Arc<dyn Notifier>,
    connect_timeout: Duration,
    active: Option<Connection>,
    stream: Option<CancellationToken>,
}

impl SessionManager {
    pub fn new(
        guild_id: GuildId,
        transport: Arc<dyn VoiceTransport>,
        notifier: Arc<dyn Notifier>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            guild_id,
            transport,
            notifier,
            connect_timeout,
            active: None,
            stream: None,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.active.as_ref().map(|c| c.channel_id)
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Señal de caída de la conexión actual
    pub fn lost_signal(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|c| c.lost.clone())
    }

    /// Conecta al canal indicado con un número acotado de intentos.
    ///
    /// Si ya hay conexión al mismo canal no hace nada; si es otro canal,
    /// desconecta antes. Cada intento está limitado por `connect_timeout`.
    /// Un timeout consume un intento; cualquier otro error corta en seco.
    pub async fn connect(
        &mut self,
        channel_id: ChannelId,
        retries: u32,
        halt: &CancellationToken,
    ) -> Result<(), ConnectError> {
        if self.lost_signal().is_some_and(|lost| lost.is_cancelled()) {
            debug!("Conexión caída detectada en guild {}, limpiando", self.guild_id);
            self.disconnect().await;
        }
        if self.channel_id() == Some(channel_id) {
            return Ok(());
        }
        if self.is_connected() {
            info!("🔀 Cambiando de canal en guild {}", self.guild_id);
            self.disconnect().await;
        }

        let attempts = retries.max(1);
        for attempt in 1..=attempts {
            info!(
                "🔗 Conectando al canal {} en guild {} (intento {}/{})",
                channel_id, self.guild_id, attempt, attempts
            );

            let result = tokio::select! {
                biased;
                _ = halt.cancelled() => return Err(ConnectError::Cancelled),
                result = tokio::time::timeout(
                    self.connect_timeout,
                    self.transport.connect(self.guild_id, channel_id),
                ) => result,
            };

            match result {
                Ok(Ok(connection)) => {
                    info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, self.guild_id);
                    self.active = Some(connection);
                    return Ok(());
                }
                Ok(Err(TransportError::Timeout)) | Err(_) => {
                    warn!(
                        "⏰ Timeout conectando al canal {} (intento {}/{})",
                        channel_id, attempt, attempts
                    );
                }
                Ok(Err(e)) => return Err(ConnectError::Failed(e)),
            }
        }

        Err(ConnectError::Exhausted {
            channel_id,
            attempts,
        })
    }

    /// Abre un sink nuevo sobre la conexión actual
    pub async fn open_sink(&self) -> Result<Box<dyn AudioSink>, TransportError> {
        let link = self
            .active
            .as_ref()
            .map(|c| Arc::clone(&c.link))
            .ok_or(TransportError::Closed)?;
        link.open_sink().await
    }

    /// Registra el token del stream en curso para poder cortarlo al desconectar
    pub fn begin_stream(&mut self, token: CancellationToken) {
        self.stream = Some(token);
    }

    pub fn end_stream(&mut self) {
        self.stream = None;
    }

    /// Desconecta del canal y limpia el estado de la sesión
    pub async fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.cancel();
        }

        let Some(connection) = self.active.take() else {
            return;
        };

        if let Err(e) = self.transport.disconnect(self.guild_id).await {
            warn!("Error al desconectar en guild {}: {}", self.guild_id, e);
        }
        drop(connection);

        self.notifier.set_now_playing(None).await;
        debug!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}
