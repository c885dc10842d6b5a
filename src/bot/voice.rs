//! Transporte de voz sobre songbird.
//!
//! El PCM f32le que produce el decodificador entra a songbird como entrada
//! cruda (`RawAdapter`) a través de un canal acotado, así la copia respeta
//! la contrapresión del mezclador.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    events::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent},
    input::{core::io::ReadOnlySource, Input, RawAdapter},
    tracks::TrackHandle,
    Call, Songbird,
};
use std::{
    io::{self, Read},
    sync::Arc,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::session::{AudioSink, Connection, TransportError, VoiceLink, VoiceTransport};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;
/// Chunks en vuelo entre el decodificador y el mezclador
const SINK_CAPACITY: usize = 32;

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Connection, TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| match e {
                JoinError::TimedOut => TransportError::Timeout,
                other => TransportError::Failed(other.to_string()),
            })?;

        let lost = CancellationToken::new();
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectHandler {
                    guild_id,
                    lost: lost.clone(),
                },
            );
        }

        debug!("Call de songbird lista para el canal {} en guild {}", channel_id, guild_id);
        Ok(Connection {
            channel_id,
            link: Arc::new(SongbirdLink { call }),
            lost,
        })
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), TransportError> {
        match self.manager.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Desconectado del canal de voz en guild {}", guild_id);
                Ok(())
            }
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }
}

/// Cancela la señal de caída cuando el driver de voz se desconecta
struct DisconnectHandler {
    guild_id: GuildId,
    lost: CancellationToken,
}

#[async_trait]
impl VoiceEventHandler for DisconnectHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Conexión de voz perdida en guild {}: {:?}",
                self.guild_id, data.reason
            );
            self.lost.cancel();
        }
        None
    }
}

struct SongbirdLink {
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, TransportError> {
        let (tx, rx) = flume::bounded(SINK_CAPACITY);
        let reader = ChunkReader {
            rx,
            pending: Bytes::new(),
        };
        let adapter = RawAdapter::new(ReadOnlySource::new(reader), SAMPLE_RATE, CHANNELS);

        let track = self.call.lock().await.play_only_input(Input::from(adapter));

        let done = CancellationToken::new();
        for event in [TrackEvent::End, TrackEvent::Error] {
            let handler = TrackDoneHandler { done: done.clone() };
            if track.add_event(Event::Track(event), handler).is_err() {
                // La pista ya terminó antes de registrar el evento
                done.cancel();
            }
        }

        Ok(Box::new(SongbirdSink {
            tx: Some(tx),
            track,
            done,
        }))
    }
}

struct TrackDoneHandler {
    done: CancellationToken,
}

#[async_trait]
impl VoiceEventHandler for TrackDoneHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.done.cancel();
        Some(Event::Cancel)
    }
}

struct SongbirdSink {
    tx: Option<flume::Sender<Bytes>>,
    track: TrackHandle,
    done: CancellationToken,
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        if self.done.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tx.send_async(chunk).await.map_err(|_| TransportError::Closed)
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        // Sin emisor el lector ve fin de archivo y la pista termina sola
        self.tx.take();
        self.done.cancelled().await;
        debug!("Pista {} terminada", self.track.uuid());
        Ok(())
    }

    fn abort(&mut self) {
        self.tx.take();
        if let Err(e) = self.track.stop() {
            debug!("La pista ya estaba detenida: {}", e);
        }
        self.done.cancel();
    }
}

/// Adapta el canal de chunks a `Read` para el mezclador de songbird
struct ChunkReader {
    rx: flume::Receiver<Bytes>,
    pending: Bytes,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chunk_reader_spans_chunks_and_ends_on_close() {
        let (tx, rx) = flume::bounded(4);
        tx.send(Bytes::from_static(b"abc")).unwrap();
        tx.send(Bytes::from_static(b"")).unwrap();
        tx.send(Bytes::from_static(b"defg")).unwrap();
        drop(tx);

        let mut reader = ChunkReader {
            rx,
            pending: Bytes::new(),
        };
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefg");
    }

    #[test]
    fn test_chunk_reader_partial_reads() {
        let (tx, rx) = flume::bounded(1);
        tx.send(Bytes::from_static(b"12345")).unwrap();
        let mut reader = ChunkReader {
            rx,
            pending: Bytes::new(),
        };

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"12");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"34");
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'5');
    }
}
