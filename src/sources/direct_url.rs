use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{title_from_url, ResolveError, Resolver};

/// Descarga `url` por HTTP dentro de `dir`.
///
/// El contenido se escribe en un temporal del mismo directorio y solo se
/// mueve a su nombre final, reservado con [`reserve_target`], cuando la
/// descarga termina completa.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    filename: Option<&str>,
) -> Result<PathBuf, ResolveError> {
    tokio::fs::create_dir_all(dir).await?;

    let response = client.get(url).send().await?.error_for_status()?;
    let temp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)?;

    let mut file = tokio::fs::File::from_std(temp.reopen()?);
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    let target = reserve_target(dir, url, filename)?;
    temp.persist(&target).map_err(|e| e.error)?;

    debug!("📦 {} bytes escritos en {}", written, target.display());
    Ok(target)
}

/// Reserva en `dir` un nombre que nadie más usa.
///
/// Con `filename` el nombre termina en el nombre saneado del archivo; sin él,
/// en la extensión de la URL. Dos descargas del mismo archivo nunca se pisan.
pub fn reserve_target(dir: &Path, url: &str, filename: Option<&str>) -> std::io::Result<PathBuf> {
    let (prefix, suffix) = match filename {
        Some(name) => ("upload-", format!("-{}", sanitize_filename(name))),
        None => (
            "direct-",
            title_from_url(url)
                .rsplit_once('.')
                .map(|(_, ext)| format!(".{}", sanitize_filename(ext)))
                .unwrap_or_default(),
        ),
    };

    let reserved = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(&suffix)
        .tempfile_in(dir)?;
    let (_, target) = reserved.keep().map_err(|e| e.error)?;
    Ok(target)
}

/// Deja solo caracteres seguros para un nombre de archivo
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "archivo".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolver para URLs que apuntan directamente a un archivo de audio
pub struct DirectResolver {
    client: reqwest::Client,
}

impl DirectResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for DirectResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn resolve(&self, url: &str, dest: &Path) -> Result<PathBuf, ResolveError> {
        let parsed = url::Url::parse(url).map_err(|e| ResolveError::Failed(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::Failed(format!("esquema no soportado: {}", parsed.scheme())));
        }

        info!("⬇️ Descarga directa: {}", url);
        download_to(&self.client, url, dest, None).await
    }
}
