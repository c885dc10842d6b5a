use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Cola y conexión
    pub max_queue_size: usize,
    pub connect_retries: u32,
    pub connect_timeout_secs: u64,
    pub resolver: String,

    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub sounds_dir: PathBuf,
    pub uploads_dir: PathBuf,

    // Interrupción diaria
    pub interrupt_time: NaiveTime,
    pub interrupt_alias: String,
    pub interrupt_channel_id: Option<u64>,
    pub interrupt_tick_secs: u64,

    // Procesos externos
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        for dir in [
            &config.data_dir,
            &config.cache_dir,
            &config.sounds_dir,
            &config.uploads_dir,
            &config.backup_dir(),
            &config.playlists_dir(),
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("No se pudo crear {}", dir.display()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir: PathBuf = get("DATA_DIR").map_or(defaults.data_dir, PathBuf::from);

        Ok(Self {
            discord_token: get("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: parse(get("APPLICATION_ID"), "APPLICATION_ID", None)?,
            guild_id: get("GUILD_ID").map(|v| v.parse()).transpose().context("GUILD_ID inválido")?,

            max_queue_size: parse(get("MAX_QUEUE_SIZE"), "MAX_QUEUE_SIZE", Some(defaults.max_queue_size))?,
            connect_retries: parse(get("CONNECT_RETRIES"), "CONNECT_RETRIES", Some(defaults.connect_retries))?,
            connect_timeout_secs: parse(
                get("CONNECT_TIMEOUT_SECS"),
                "CONNECT_TIMEOUT_SECS",
                Some(defaults.connect_timeout_secs),
            )?,
            resolver: get("RESOLVER").unwrap_or(defaults.resolver),

            cache_dir: get("CACHE_DIR").map_or_else(|| data_dir.join("downloads"), PathBuf::from),
            sounds_dir: get("SOUNDS_DIR").map_or_else(|| data_dir.join("sounds"), PathBuf::from),
            uploads_dir: get("UPLOADS_DIR").map_or_else(|| data_dir.join("uploads"), PathBuf::from),
            data_dir,

            interrupt_time: match get("INTERRUPT_TIME") {
                Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                    .with_context(|| format!("INTERRUPT_TIME debe ser HH:MM, se recibió {raw}"))?,
                None => defaults.interrupt_time,
            },
            interrupt_alias: get("INTERRUPT_ALIAS").unwrap_or(defaults.interrupt_alias),
            interrupt_channel_id: get("INTERRUPT_CHANNEL_ID")
                .map(|v| v.parse())
                .transpose()
                .context("INTERRUPT_CHANNEL_ID inválido")?,
            interrupt_tick_secs: parse(
                get("INTERRUPT_TICK_SECS"),
                "INTERRUPT_TICK_SECS",
                Some(defaults.interrupt_tick_secs),
            )?,

            ffmpeg_path: get("FFMPEG_PATH").map_or(defaults.ffmpeg_path, PathBuf::from),
            ytdlp_path: get("YTDLP_PATH").map_or(defaults.ytdlp_path, PathBuf::from),
        })
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.connect_retries == 0 {
            anyhow::bail!("Connect retries must be greater than 0");
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.interrupt_tick_secs == 0 || self.interrupt_tick_secs > 3600 {
            anyhow::bail!(
                "Interrupt tick must be between 1 and 3600 seconds, got: {}",
                self.interrupt_tick_secs
            );
        }

        if self.interrupt_alias.trim().is_empty() {
            anyhow::bail!("Interrupt alias cannot be empty");
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn interrupt_tick(&self) -> Duration {
        Duration::from_secs(self.interrupt_tick_secs)
    }

    /// Respaldos de cola (`queue-contents`, `weed-queue`, `crash-backup`)
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("queue-backup")
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.data_dir.join("playlists")
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Queue: max {}, resolver {}\n  \
            Connect: {} retries, {} timeout\n  \
            Interrupt: {} alias \"{}\" (tick {})\n  \
            Paths: data {}, downloads {}, sounds {}, uploads {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_queue_size,
            self.resolver,
            self.connect_retries,
            humantime::format_duration(self.connect_timeout()),
            self.interrupt_time.format("%H:%M"),
            self.interrupt_alias,
            humantime::format_duration(self.interrupt_tick()),
            self.data_dir.display(),
            self.cache_dir.display(),
            self.sounds_dir.display(),
            self.uploads_dir.display(),
        )
    }
}

fn parse<T>(raw: Option<String>, key: &str, default: Option<T>) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match (raw, default) {
        (Some(raw), _) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} inválido: {raw}")),
        (None, Some(default)) => Ok(default),
        (None, None) => anyhow::bail!("{key} no definido"),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            max_queue_size: 1000,
            connect_retries: 3,
            connect_timeout_secs: 10,
            resolver: "yt-dlp".to_string(),

            data_dir: "/app/data".into(),
            cache_dir: "/app/data/downloads".into(),
            sounds_dir: "/app/data/sounds".into(),
            uploads_dir: "/app/data/uploads".into(),

            interrupt_time: NaiveTime::from_hms_opt(16, 20, 0).unwrap_or(NaiveTime::MIN),
            interrupt_alias: "weed".to_string(),
            interrupt_channel_id: None,
            interrupt_tick_secs: 30,

            ffmpeg_path: "ffmpeg".into(),
            ytdlp_path: "yt-dlp".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_fill_optional_values() {
        let config = config_from(&[
            ("DISCORD_TOKEN", "token"),
            ("APPLICATION_ID", "123"),
            ("DATA_DIR", "/srv/jukebox"),
        ])
        .unwrap();

        assert_eq!(config.application_id, 123);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.interrupt_time, NaiveTime::from_hms_opt(16, 20, 0).unwrap());
        assert_eq!(config.sounds_dir, PathBuf::from("/srv/jukebox/sounds"));
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/jukebox/queue-backup"));
        assert_eq!(config.resolver, "yt-dlp");
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides_and_errors() {
        let config = config_from(&[
            ("DISCORD_TOKEN", "token"),
            ("APPLICATION_ID", "123"),
            ("INTERRUPT_TIME", "07:45"),
            ("INTERRUPT_CHANNEL_ID", "555"),
            ("CONNECT_RETRIES", " 5 "),
        ])
        .unwrap();
        assert_eq!(config.interrupt_time, NaiveTime::from_hms_opt(7, 45, 0).unwrap());
        assert_eq!(config.interrupt_channel_id, Some(555));
        assert_eq!(config.connect_retries, 5);

        assert!(config_from(&[("APPLICATION_ID", "123")]).is_err());
        assert!(config_from(&[
            ("DISCORD_TOKEN", "token"),
            ("APPLICATION_ID", "123"),
            ("INTERRUPT_TIME", "4:20pm"),
        ])
        .is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = Config {
            application_id: 1,
            connect_retries: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
