pub mod direct_url;
pub mod local;
pub mod ytdlp;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::info;

pub use direct_url::DirectResolver;
pub use local::{AliasBook, AttachmentStore};
pub use ytdlp::YtDlpResolver;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no se pudo ejecutar {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("falló la descarga: {0}")]
    Failed(String),
    #[error("el resolver {0} no soporta esta operación")]
    Unsupported(&'static str),
    #[error("sin resultados para: {0}")]
    NoResults(String),
    #[error("resolver desconocido: {name} (disponibles: {available})")]
    UnknownResolver { name: String, available: String },
    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Entrada remota todavía sin descargar: título y URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub title: String,
    pub url: String,
}

/// Convierte referencias remotas en archivos locales reproducibles
#[async_trait]
pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Descarga `url` dentro de `dest` y devuelve la ruta del archivo
    async fn resolve(&self, url: &str, dest: &Path) -> Result<PathBuf, ResolveError>;

    /// Expande una URL de playlist en sus entradas
    async fn expand(&self, url: &str) -> Result<Vec<RemoteEntry>, ResolveError> {
        Ok(vec![RemoteEntry {
            title: title_from_url(url),
            url: url.to_string(),
        }])
    }

    /// Busca un término y devuelve el primer resultado
    async fn search(&self, _term: &str) -> Result<RemoteEntry, ResolveError> {
        Err(ResolveError::Unsupported(self.name()))
    }
}

/// Último segmento de la ruta de una URL, o la URL completa
pub fn title_from_url(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| raw.to_string())
}

/// Resolvers disponibles y cuál está activo.
///
/// El activo se puede cambiar en caliente; las descargas ya en curso
/// terminan con el resolver que las empezó.
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn Resolver>>,
    active: RwLock<Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>, active: &str) -> Result<Self, ResolveError> {
        let selected = Self::find(&resolvers, active)?;
        info!("🔌 Resolver activo: {}", selected.name());
        Ok(Self {
            active: RwLock::new(selected),
            resolvers,
        })
    }

    pub fn active(&self) -> Arc<dyn Resolver> {
        Arc::clone(&self.active.read())
    }

    pub fn active_name(&self) -> &'static str {
        self.active.read().name()
    }

    pub fn set_active(&self, name: &str) -> Result<&'static str, ResolveError> {
        let selected = Self::find(&self.resolvers, name)?;
        let name = selected.name();
        *self.active.write() = selected;
        info!("🔌 Resolver cambiado a: {}", name);
        Ok(name)
    }

    pub fn available(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    fn find(resolvers: &[Arc<dyn Resolver>], name: &str) -> Result<Arc<dyn Resolver>, ResolveError> {
        resolvers
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
            .ok_or_else(|| ResolveError::UnknownResolver {
                name: name.to_string(),
                available: resolvers
                    .iter()
                    .map(|r| r.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Resolver falso: "descarga" escribiendo un archivo; las URLs que
    /// contienen `fail` fallan y las que contienen `slow` tardan 30 s
    #[derive(Default)]
    pub struct FakeResolver {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn resolve(&self, url: &str, dest: &Path) -> Result<PathBuf, ResolveError> {
            self.calls.lock().push(url.to_string());
            if url.contains("fail") {
                return Err(ResolveError::Failed(format!("no se pudo bajar {url}")));
            }
            if url.contains("slow") {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            tokio::fs::create_dir_all(dest).await?;
            let path = dest.join(format!("{}.raw", title_from_url(url)));
            tokio::fs::write(&path, url.as_bytes()).await?;
            Ok(path)
        }
    }
}
