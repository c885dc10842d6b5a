use anyhow::Result;
use serenity::{
    model::{
        gateway::GatewayIntents,
        id::{ChannelId, GuildId},
    },
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod storage;
mod ui;

use crate::audio::{
    decoder::ProcessDecoder,
    interrupt::{InterruptScheduler, InterruptSettings, SystemClock},
    player::{AudioPlayer, PlayerDeps, PlayerSettings},
};
use crate::bot::{notifier::DiscordNotifier, voice::SongbirdTransport, JukeboxBot};
use crate::config::Config;
use crate::sources::{
    direct_url::DirectResolver, AliasBook, AttachmentStore, Resolver, ResolverRegistry,
    YtDlpResolver,
};
use crate::storage::playlists::PlaylistStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let http_client = reqwest::Client::builder()
        .user_agent(concat!("guild-jukebox/", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Resolvers de descarga; el activo se puede cambiar con /resolver
    let available: Vec<Arc<dyn Resolver>> = vec![
        Arc::new(YtDlpResolver::new(&config.ytdlp_path)),
        Arc::new(DirectResolver::new(http_client.clone())),
    ];
    let resolvers = ResolverRegistry::new(available, &config.resolver)?;

    let songbird = Songbird::serenity();
    let notifier = Arc::new(DiscordNotifier::default());

    let player = Arc::new(AudioPlayer::new(PlayerDeps {
        transport: Arc::new(SongbirdTransport::new(songbird.clone())),
        decoder: Arc::new(ProcessDecoder::ffmpeg(&config.ffmpeg_path)),
        resolvers: Arc::new(resolvers),
        notifier: notifier.clone(),
        settings: PlayerSettings {
            max_queue_size: config.max_queue_size,
            connect_retries: config.connect_retries,
            connect_timeout: config.connect_timeout(),
            download_dir: config.cache_dir.clone(),
            backup_dir: config.backup_dir(),
        },
    }));

    let playlists = PlaylistStore::new(config.playlists_dir()).await?;

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(
        config.clone(),
        player.clone(),
        AliasBook::new(&config.sounds_dir),
        AttachmentStore::new(http_client, &config.uploads_dir),
        playlists,
        notifier,
    );

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Interrupción diaria
    let shutdown = CancellationToken::new();
    let bot_user = client.http.get_current_user().await?.id;
    let fallback = match (config.guild_id, config.interrupt_channel_id) {
        (Some(guild_id), Some(channel_id)) => {
            Some((GuildId::new(guild_id), ChannelId::new(channel_id)))
        }
        (None, Some(_)) => {
            warn!("⚠️ INTERRUPT_CHANNEL_ID requiere GUILD_ID, se ignora");
            None
        }
        _ => None,
    };
    let scheduler = InterruptScheduler::new(
        player.clone(),
        AliasBook::new(&config.sounds_dir),
        Arc::new(SystemClock),
        InterruptSettings {
            at: config.interrupt_time,
            alias: config.interrupt_alias.clone(),
            tick: config.interrupt_tick(),
            fallback,
            requested_by: bot_user,
        },
    );
    tokio::spawn(scheduler.run(shutdown.clone()));

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => {
            if let Err(why) = result {
                error!("Error al ejecutar cliente: {:?}", why);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Error al registrar Ctrl+C: {:?}", e);
            }
            info!("⚠️ Señal de shutdown recibida, cerrando...");
        }
    }

    // Apagado ordenado: detener reproducciones antes de soltar el gateway
    shutdown.cancel();
    player.shutdown().await;
    shard_manager.shutdown_all().await;

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
