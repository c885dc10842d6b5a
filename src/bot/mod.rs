//! # Bot Module
//!
//! Integración con Discord: comandos slash, transporte de voz y avisos.
//!
//! ## Architecture
//!
//! [`JukeboxBot`] implementa el [`EventHandler`] de serenity y delega cada
//! comando al [`AudioPlayer`] de la guild correspondiente. La voz va por
//! [`voice::SongbirdTransport`] y los avisos por [`notifier::DiscordNotifier`],
//! que recién puede publicar tras el evento `ready`.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;
pub mod voice;

use crate::{
    audio::player::AudioPlayer,
    config::Config,
    sources::{AliasBook, AttachmentStore},
    storage::playlists::PlaylistStore,
};
use notifier::DiscordNotifier;

/// Handler principal de eventos de Discord.
///
/// ## Fields
///
/// - `player`: reproductores por guild
/// - `aliases`: sonidos guardados en el directorio de sonidos
/// - `attachments`: descargas de adjuntos subidos con `/upload`
/// - `playlists`: playlists persistidas
/// - `notifier`: recibe el contexto de serenity en `ready`
pub struct JukeboxBot {
    config: Arc<Config>,
    pub player: Arc<AudioPlayer>,
    pub aliases: AliasBook,
    pub attachments: AttachmentStore,
    pub playlists: PlaylistStore,
    notifier: Arc<DiscordNotifier>,
}

impl JukeboxBot {
    pub fn new(
        config: Config,
        player: Arc<AudioPlayer>,
        aliases: AliasBook,
        attachments: AttachmentStore,
        playlists: PlaylistStore,
        notifier: Arc<DiscordNotifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            player,
            aliases,
            attachments,
            playlists,
            notifier,
        }
    }

    /// Registra los comandos slash, por guild en desarrollo o globales
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.notifier.attach(ctx.clone()).await;

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }
}
