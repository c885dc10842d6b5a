use async_trait::async_trait;
use bytes::Bytes;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, warn};

use super::session::{AudioSink, TransportError};

/// Tamaño de cada bloque copiado del decodificador al sink
const CHUNK_SIZE: usize = 16 * 1024;

/// Marcador de la ruta de entrada dentro de los argumentos
const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no se pudo iniciar {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("el decodificador no expuso su salida estándar")]
    NoOutput,
    #[error("error leyendo la salida del decodificador: {0}")]
    Read(#[from] std::io::Error),
    #[error("error enviando audio: {0}")]
    Transport(#[from] TransportError),
    #[error("el decodificador terminó con estado {0}")]
    Exit(std::process::ExitStatus),
}

/// Lanza el proceso externo que convierte un archivo local en audio crudo
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn start(&self, path: &Path) -> Result<DecodeStream, DecodeError>;
}

/// Proceso de decodificación en marcha: su salida y el handle del proceso
pub struct DecodeStream {
    child: Child,
    output: ChildStdout,
}

impl DecodeStream {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Copia toda la salida del proceso al sink y espera a que suene.
    ///
    /// Devuelve los bytes copiados. Un código de salida distinto de cero
    /// indica un archivo que no se pudo decodificar.
    pub async fn pump(&mut self, sink: &mut dyn AudioSink) -> Result<u64, DecodeError> {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut copied = 0u64;

        loop {
            let read = self.output.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            sink.write(Bytes::copy_from_slice(&buffer[..read])).await?;
            copied += read as u64;
        }

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(DecodeError::Exit(status));
        }

        sink.finish().await?;
        Ok(copied)
    }

    /// Mata el proceso (si sigue vivo) y lo recoge para no dejar huérfanos
    pub async fn terminate(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("Decodificador ya había terminado: {}", status),
            _ => {
                if let Err(e) = self.child.kill().await {
                    warn!("No se pudo terminar el decodificador: {}", e);
                }
            }
        }
    }
}

/// Decodificador basado en un programa externo (ffmpeg por defecto).
///
/// Los argumentos pueden contener `{input}`, que se sustituye por la ruta
/// del archivo a reproducir.
#[derive(Debug, Clone)]
pub struct ProcessDecoder {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessDecoder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ffmpeg produciendo PCM f32le estéreo a 48kHz (formato de Discord)
    pub fn ffmpeg(program: impl Into<PathBuf>) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-i",
            INPUT_PLACEHOLDER,
            "-vn",
            "-f",
            "f32le",
            "-ar",
            "48000",
            "-ac",
            "2",
            "pipe:1",
        ];
        Self::new(program, args.iter().map(|a| a.to_string()).collect())
    }
}

#[async_trait]
impl Decoder for ProcessDecoder {
    async fn start(&self, path: &Path) -> Result<DecodeStream, DecodeError> {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            if arg == INPUT_PLACEHOLDER {
                cmd.arg(path);
            } else {
                cmd.arg(arg);
            }
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let output = child.stdout.take().ok_or(DecodeError::NoOutput)?;
        debug!("🎛️ Decodificador iniciado (pid {:?}) para {}", child.id(), path.display());

        Ok(DecodeStream { child, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct VecSink {
        data: Vec<u8>,
        finished: bool,
    }

    #[async_trait]
    impl AudioSink for VecSink {
        async fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
            self.data.extend_from_slice(&chunk);
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), TransportError> {
            self.finished = true;
            Ok(())
        }

        fn abort(&mut self) {}
    }

    fn process_alive(pid: u32) -> bool {
        // Un proceso zombi sigue en /proc; el estado "Z" cuenta como muerto
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat.contains(") Z"),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_pump_copies_whole_output() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.raw");
        let payload: Vec<u8> = (0..50_000u32).map(|n| (n % 251) as u8).collect();
        std::fs::write(&file, &payload).unwrap();

        let decoder = ProcessDecoder::new("cat", vec![INPUT_PLACEHOLDER.to_string()]);
        let mut stream = decoder.start(&file).await.unwrap();
        let mut sink = VecSink {
            data: Vec::new(),
            finished: false,
        };

        let copied = stream.pump(&mut sink).await.unwrap();
        stream.terminate().await;

        assert_eq!(copied, payload.len() as u64);
        assert_eq!(sink.data, payload);
        assert!(sink.finished);
    }

    #[tokio::test]
    async fn test_failed_decode_reports_exit_status() {
        let decoder = ProcessDecoder::new("cat", vec![INPUT_PLACEHOLDER.to_string()]);
        let mut stream = decoder
            .start(Path::new("/definitely/not/here.mp3"))
            .await
            .unwrap();
        let mut sink = VecSink {
            data: Vec::new(),
            finished: false,
        };

        let result = stream.pump(&mut sink).await;
        assert!(matches!(result, Err(DecodeError::Exit(_))));
        assert!(!sink.finished);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let decoder = ProcessDecoder::new("/no/such/decoder", Vec::new());
        let result = decoder.start(Path::new("x.mp3")).await;
        assert!(matches!(result, Err(DecodeError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_terminate_kills_running_process() {
        let decoder = ProcessDecoder::new("sleep", vec!["30".to_string()]);
        let stream = decoder.start(Path::new("ignored")).await.unwrap();
        let pid = stream.id().unwrap();
        assert!(process_alive(pid));

        stream.terminate().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!process_alive(pid));
    }
}
