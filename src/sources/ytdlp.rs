use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{RemoteEntry, ResolveError, Resolver};

/// Resolver que delega la descarga en `yt-dlp`
pub struct YtDlpResolver {
    program: PathBuf,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Busca archivo de cookies disponible
    async fn find_cookies_file() -> Option<String> {
        let home = std::env::var("HOME").unwrap_or_default();
        let candidates = [
            format!("{home}/.config/yt-dlp/cookies.txt"),
            "/app/.config/yt-dlp/cookies.txt".to_string(),
            "./cookies.txt".to_string(),
        ];

        for path in candidates {
            if tokio::fs::metadata(&path).await.is_ok() {
                debug!("🍪 Cookies encontradas en: {}", path);
                return Some(path);
            }
        }
        None
    }

    async fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--no-warnings", "--socket-timeout", "30", "--retries", "3"]);
        if let Some(cookies) = Self::find_cookies_file().await {
            cmd.args(["--cookies", &cookies]);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<String, ResolveError> {
        let output = cmd.output().await.map_err(|source| ResolveError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Failed(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Separa líneas `url|título` como las imprime `--print`
fn parse_entries(stdout: &str) -> Vec<RemoteEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let (url, title) = line.trim().split_once('|')?;
            if url.is_empty() || url == "NA" {
                return None;
            }
            let title = if title.is_empty() || title == "NA" {
                url
            } else {
                title
            };
            Some(RemoteEntry {
                title: title.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl Resolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str, dest: &Path) -> Result<PathBuf, ResolveError> {
        tokio::fs::create_dir_all(dest).await?;
        let template = dest.join("%(id)s.%(ext)s");

        let mut cmd = self.command().await;
        cmd.args([
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--no-simulate",
            "--print",
            "after_move:filepath",
            "-o",
        ])
        .arg(&template)
        .arg(url);

        info!("⬇️ Descargando con yt-dlp: {}", url);
        let stdout = self.run(cmd).await?;

        let path = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ResolveError::Failed(format!("yt-dlp no informó archivo para {url}")))?;

        if tokio::fs::metadata(&path).await.is_err() {
            warn!("yt-dlp informó {} pero el archivo no existe", path.display());
            return Err(ResolveError::Failed(format!(
                "archivo descargado no encontrado: {}",
                path.display()
            )));
        }

        info!("✅ Descargado: {}", path.display());
        Ok(path)
    }

    async fn expand(&self, url: &str) -> Result<Vec<RemoteEntry>, ResolveError> {
        let mut cmd = self.command().await;
        cmd.args(["--flat-playlist", "--print", "%(webpage_url,url)s|%(title)s"])
            .arg(url);

        let entries = parse_entries(&self.run(cmd).await?);
        if entries.is_empty() {
            return Err(ResolveError::NoResults(url.to_string()));
        }

        info!("🎵 Playlist extraída con {} entradas", entries.len());
        Ok(entries)
    }

    async fn search(&self, term: &str) -> Result<RemoteEntry, ResolveError> {
        let mut cmd = self.command().await;
        cmd.args([
            "--flat-playlist",
            "--print",
            "%(webpage_url)s|%(title)s",
        ])
        .arg(format!("ytsearch1:{term}"));

        parse_entries(&self.run(cmd).await?)
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoResults(term.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_entries_skips_garbage() {
        let stdout = "https://youtu.be/a|First\n\nnot an entry\nNA|ghost\nhttps://youtu.be/b|NA\n";
        assert_eq!(
            parse_entries(stdout),
            vec![
                RemoteEntry {
                    title: "First".to_string(),
                    url: "https://youtu.be/a".to_string(),
                },
                RemoteEntry {
                    title: "https://youtu.be/b".to_string(),
                    url: "https://youtu.be/b".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_titles_may_contain_separator() {
        let entries = parse_entries("https://youtu.be/x|AC|DC - Thunderstruck");
        assert_eq!(entries[0].title, "AC|DC - Thunderstruck");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let resolver = YtDlpResolver::new("/no/such/yt-dlp");
        let dir = tempfile::tempdir().unwrap();
        let err = resolver
            .resolve("https://youtu.be/abc", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Spawn { .. }));
    }
}
