use anyhow::Result;
use chrono::Utc;
use serenity::{
    all::{ResolvedOption, ResolvedValue},
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    audio::{item::Item, notify::Notice, player::PlayerError},
    bot::JukeboxBot,
    sources::{title_from_url, AttachmentStore, ResolveError},
    storage::{playlists::PlaylistError, snapshot::BackupKind},
    ui::embeds,
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Debes estar en un canal de voz")]
    NoVoiceChannel,
    #[error("No existe el sonido \"{0}\". Usa `/aliases` para ver la lista")]
    UnknownAlias(String),
    #[error("\"{0}\" no es un archivo de audio soportado")]
    NotAudio(String),
    #[error("Falta la opción `{0}`")]
    MissingOption(&'static str),
    #[error("Comando no reconocido: {0}")]
    Unknown(String),
    #[error(transparent)]
    Player(#[from] PlayerError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
}

/// Quién pide y desde dónde
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Canal de texto donde se usó el comando
    pub text_channel: ChannelId,
    /// Canal de voz del usuario, destino de la reproducción
    pub voice_channel: Option<ChannelId>,
}

impl Request {
    fn destination(&self) -> Result<ChannelId, CommandError> {
        self.voice_channel.ok_or(CommandError::NoVoiceChannel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { alias: String },
    Upload { url: String, filename: String },
    Search { query: String },
    Youtube { url: String },
    Skip,
    Next { index: i64 },
    Queue { page: usize },
    Aliases,
    Save,
    Load { backup: BackupKind },
    Stop,
    Resolver { name: Option<String> },
    Playlist(PlaylistCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistCommand {
    Create { name: String },
    Add { name: String, url: String },
    Delete { name: String },
    Whitelist { name: String, user: UserId },
    Blacklist { name: String, user: UserId },
    Play { name: String },
    List,
}

/// Opciones ya resueltas de una interacción
pub struct Options<'a>(Vec<ResolvedOption<'a>>);

impl<'a> Options<'a> {
    pub fn new(options: Vec<ResolvedOption<'a>>) -> Self {
        Self(options)
    }

    fn find(&self, name: &str) -> Option<&ResolvedValue<'a>> {
        self.0.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    fn string(&self, name: &'static str) -> Result<String, CommandError> {
        match self.find(name) {
            Some(ResolvedValue::String(value)) => Ok(value.to_string()),
            _ => Err(CommandError::MissingOption(name)),
        }
    }

    fn optional_string(&self, name: &str) -> Option<String> {
        match self.find(name) {
            Some(ResolvedValue::String(value)) => Some(value.to_string()),
            _ => None,
        }
    }

    fn integer(&self, name: &str) -> Option<i64> {
        match self.find(name) {
            Some(ResolvedValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    fn user(&self, name: &'static str) -> Result<UserId, CommandError> {
        match self.find(name) {
            Some(ResolvedValue::User(user, _)) => Ok(user.id),
            _ => Err(CommandError::MissingOption(name)),
        }
    }

    fn subcommand(self) -> Option<(&'a str, Options<'a>)> {
        self.0.into_iter().find_map(|o| match o.value {
            ResolvedValue::SubCommand(options) => Some((o.name, Options(options))),
            _ => None,
        })
    }
}

impl Command {
    pub fn parse(name: &str, options: Options<'_>) -> Result<Self, CommandError> {
        Ok(match name {
            "play" => Self::Play {
                alias: options.string("alias")?,
            },
            "upload" => match options.find("file") {
                Some(ResolvedValue::Attachment(file)) => Self::Upload {
                    url: file.url.clone(),
                    filename: file.filename.clone(),
                },
                _ => return Err(CommandError::MissingOption("file")),
            },
            "search" => Self::Search {
                query: options.string("query")?,
            },
            "youtube" => Self::Youtube {
                url: options.string("url")?,
            },
            "skip" => Self::Skip,
            "next" => Self::Next {
                index: options.integer("index").ok_or(CommandError::MissingOption("index"))?,
            },
            "queue" => Self::Queue {
                page: options
                    .integer("page")
                    .map_or(1, |page| usize::try_from(page).unwrap_or(1)),
            },
            "aliases" => Self::Aliases,
            "save" => Self::Save,
            "load" => Self::Load {
                backup: match options.optional_string("backup").as_deref() {
                    Some("crash") => BackupKind::Crash,
                    _ => BackupKind::Queue,
                },
            },
            "stop" => Self::Stop,
            "resolver" => Self::Resolver {
                name: options.optional_string("name"),
            },
            "playlist" => Self::Playlist(PlaylistCommand::parse(options)?),
            other => return Err(CommandError::Unknown(other.to_string())),
        })
    }
}

impl PlaylistCommand {
    fn parse(options: Options<'_>) -> Result<Self, CommandError> {
        let (sub, options) = options
            .subcommand()
            .ok_or(CommandError::MissingOption("subcomando"))?;

        Ok(match sub {
            "create" => Self::Create {
                name: options.string("name")?,
            },
            "add" => Self::Add {
                name: options.string("name")?,
                url: options.string("url")?,
            },
            "delete" => Self::Delete {
                name: options.string("name")?,
            },
            "whitelist" => Self::Whitelist {
                name: options.string("name")?,
                user: options.user("user")?,
            },
            "blacklist" => Self::Blacklist {
                name: options.string("name")?,
                user: options.user("user")?,
            },
            "play" => Self::Play {
                name: options.string("name")?,
            },
            "list" => Self::List,
            other => return Err(CommandError::Unknown(format!("playlist {other}"))),
        })
    }
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta ya que descargas y búsquedas pueden tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let request = Request {
        guild_id,
        user_id: command.user.id,
        text_channel: command.channel_id,
        voice_channel: get_user_voice_channel(ctx, guild_id, command.user.id),
    };

    let parsed = Command::parse(&command.data.name, Options::new(command.data.options()));
    let outcome = match parsed {
        Ok(parsed) => execute(bot, &request, parsed).await,
        Err(e) => Err(e),
    };

    let notice = outcome.unwrap_or_else(|e| {
        warn!("Comando /{} rechazado: {}", command.data.name, e);
        embeds::error_notice(&e.to_string())
    });

    let mut response = EditInteractionResponse::new();
    if !notice.text.is_empty() {
        response = response.content(&notice.text);
    }
    if let Some(embed) = &notice.embed {
        response = response.embed(embeds::create_embed(embed));
    }
    command.edit_response(&ctx.http, response).await?;

    Ok(())
}

/// Ejecuta un comando ya interpretado y devuelve la respuesta para el usuario
pub async fn execute(
    bot: &JukeboxBot,
    request: &Request,
    command: Command,
) -> Result<Notice, CommandError> {
    let player = bot.player.guild(request.guild_id);

    match command {
        Command::Play { alias } => {
            let item = bot
                .aliases
                .item(&alias, request.destination()?, request.user_id)
                .await?
                .ok_or(CommandError::UnknownAlias(alias))?;
            let position = player.enqueue(item.clone())?;
            Ok(embeds::item_added_notice(&item, position))
        }
        Command::Upload { url, filename } => {
            let channel = request.destination()?;
            if !AttachmentStore::accepts(&filename) {
                return Err(CommandError::NotAudio(filename));
            }
            let path = bot.attachments.fetch(&url, &filename).await?;
            let item = Item::attachment(filename, path, channel, request.user_id);
            let position = player.enqueue(item.clone())?;
            Ok(embeds::item_added_notice(&item, position))
        }
        Command::Search { query } => {
            let channel = request.destination()?;
            let entry = bot.player.resolvers().active().search(&query).await?;
            let item = Item::remote(entry.title, entry.url, channel, request.user_id);
            let position = player.enqueue(item.clone())?;
            Ok(embeds::item_added_notice(&item, position))
        }
        Command::Youtube { url } => {
            let channel = request.destination()?;
            let mut entries = bot.player.resolvers().active().expand(&url).await?;
            if entries.len() == 1 {
                let entry = entries.remove(0);
                let item = Item::remote(entry.title, entry.url, channel, request.user_id);
                let position = player.enqueue(item.clone())?;
                return Ok(embeds::item_added_notice(&item, position));
            }
            if entries.is_empty() {
                return Err(ResolveError::NoResults(url).into());
            }

            let requested = entries.len();
            let items = entries
                .into_iter()
                .map(|entry| Item::remote(entry.title, entry.url, channel, request.user_id))
                .collect();
            let added = player.enqueue_many(items);
            Ok(embeds::batch_added_notice(added, requested, "la playlist"))
        }
        Command::Skip => {
            let skipped = player.skip()?;
            Ok(Notice::success(format!("Saltado: **{}**", skipped.title)))
        }
        Command::Next { index } => {
            let moved = player.move_to_front(index)?;
            Ok(Notice::success(format!("**{}** sonará a continuación", moved.title)))
        }
        Command::Queue { page } => Ok(embeds::queue_notice(&player.list(), page, Utc::now())),
        Command::Aliases => {
            let names = bot.aliases.list().await?;
            Ok(embeds::names_notice(
                "🔊 Sonidos Disponibles",
                &names,
                "No hay sonidos guardados",
            ))
        }
        Command::Save => {
            let saved = player.save_queue().await?;
            Ok(Notice::success(format!("Cola guardada ({saved} canciones)")))
        }
        Command::Load { backup } => {
            let loaded = player.load_queue(backup).await?;
            Ok(Notice::success(format!("Cola restaurada ({loaded} canciones)")))
        }
        Command::Stop => {
            let cleared = player.stop_all().await;
            Ok(Notice::success(format!(
                "Reproducción detenida, {cleared} canciones quitadas de la cola"
            )))
        }
        Command::Resolver { name } => {
            let registry = bot.player.resolvers();
            match name {
                Some(name) => {
                    let active = registry.set_active(&name)?;
                    Ok(Notice::success(format!("Resolver activo: `{active}`")))
                }
                None => Ok(Notice::text(format!(
                    "🔌 Resolver activo: `{}` (disponibles: {})",
                    registry.active_name(),
                    registry.available().join(", ")
                ))),
            }
        }
        Command::Playlist(sub) => execute_playlist(bot, request, sub).await,
    }
}

async fn execute_playlist(
    bot: &JukeboxBot,
    request: &Request,
    command: PlaylistCommand,
) -> Result<Notice, CommandError> {
    let store = &bot.playlists;
    let user = request.user_id;

    match command {
        PlaylistCommand::Create { name } => {
            let playlist = store.create(&name, user).await?;
            Ok(Notice::success(format!("Playlist **{}** creada", playlist.name)))
        }
        PlaylistCommand::Add { name, url } => {
            let song = Item::remote(title_from_url(&url), url, request.text_channel, user);
            let total = store.add_song(&name, user, song).await?;
            Ok(Notice::success(format!(
                "Agregada a **{name}** ({total} canciones)"
            )))
        }
        PlaylistCommand::Delete { name } => {
            store.delete(&name, user).await?;
            Ok(Notice::success(format!("Playlist **{name}** borrada")))
        }
        PlaylistCommand::Whitelist { name, user: target } => {
            store.whitelist(&name, user, target).await?;
            Ok(Notice::success(format!("<@{target}> puede editar **{name}**")))
        }
        PlaylistCommand::Blacklist { name, user: target } => {
            store.blacklist(&name, user, target).await?;
            Ok(Notice::success(format!("<@{target}> ya no puede editar **{name}**")))
        }
        PlaylistCommand::Play { name } => {
            let songs = store.songs_for(&name, request.destination()?, user).await?;
            let requested = songs.len();
            let added = bot.player.guild(request.guild_id).enqueue_many(songs);
            Ok(embeds::batch_added_notice(
                added,
                requested,
                &format!("**{name}**"),
            ))
        }
        PlaylistCommand::List => {
            let names = store.list().await;
            Ok(embeds::names_notice(
                "📋 Playlists",
                &names,
                "No hay playlists guardadas",
            ))
        }
    }
}

// Funciones auxiliares

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            decoder::ProcessDecoder,
            notify::LogNotifier,
            player::{testing, AudioPlayer},
            queue::QueueError,
        },
        bot::notifier::DiscordNotifier,
        config::Config,
        sources::AliasBook,
        storage::{playlists::PlaylistStore, snapshot::SnapshotError},
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const OWNER: UserId = UserId::new(10);
    const FRIEND: UserId = UserId::new(20);

    struct Setup {
        bot: JukeboxBot,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let sounds = dir.path().join("sounds");
        std::fs::create_dir_all(&sounds).unwrap();
        std::fs::write(sounds.join("bocina.ogg"), b"bocina").unwrap();

        let (deps, _, _) = testing::deps(
            dir.path(),
            ProcessDecoder::new("cat", vec!["{input}".to_string()]),
            Arc::new(LogNotifier),
        );
        let client = reqwest::Client::new();
        let bot = JukeboxBot::new(
            Config::default(),
            Arc::new(AudioPlayer::new(deps)),
            AliasBook::new(sounds),
            AttachmentStore::new(client, dir.path().join("uploads")),
            PlaylistStore::new(dir.path().join("playlists")).await.unwrap(),
            Arc::new(DiscordNotifier::default()),
        );
        Setup { bot, _dir: dir }
    }

    fn request(user_id: UserId, voice_channel: Option<ChannelId>) -> Request {
        Request {
            guild_id: GuildId::new(1),
            user_id,
            text_channel: ChannelId::new(100),
            voice_channel,
        }
    }

    #[tokio::test]
    async fn test_play_requires_voice_and_known_alias() {
        let s = setup().await;

        let err = execute(&s.bot, &request(OWNER, None), Command::Play { alias: "bocina".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoVoiceChannel));

        let in_voice = request(OWNER, Some(ChannelId::new(5)));
        let err = execute(&s.bot, &in_voice, Command::Play { alias: "trompeta".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownAlias(alias) if alias == "trompeta"));

        let notice = execute(&s.bot, &in_voice, Command::Play { alias: "BOCINA".into() })
            .await
            .unwrap();
        let embed = notice.embed.unwrap();
        assert_eq!(embed.description, "**bocina**");
        assert_eq!(embed.fields[0], ("📍 Posición".to_string(), "#1".to_string()));
    }

    #[tokio::test]
    async fn test_next_out_of_range_is_reported() {
        let s = setup().await;
        let err = execute(&s.bot, &request(OWNER, None), Command::Next { index: 3 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Player(PlayerError::Queue(QueueError::OutOfRange { index: 3, len: 0 }))
        ));
    }

    #[tokio::test]
    async fn test_load_without_backup_is_reported() {
        let s = setup().await;
        let err = execute(
            &s.bot,
            &request(OWNER, None),
            Command::Load {
                backup: BackupKind::Crash,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Player(PlayerError::Snapshot(SnapshotError::Missing(_)))
        ));
    }

    #[tokio::test]
    async fn test_resolver_query_and_unknown_switch() {
        let s = setup().await;
        let notice = execute(&s.bot, &request(OWNER, None), Command::Resolver { name: None })
            .await
            .unwrap();
        assert_eq!(notice.text, "🔌 Resolver activo: `fake` (disponibles: fake)");

        let err = execute(
            &s.bot,
            &request(OWNER, None),
            Command::Resolver {
                name: Some("napster".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Resolve(ResolveError::UnknownResolver { .. })));
    }

    #[tokio::test]
    async fn test_playlist_edit_rights_follow_whitelist() {
        let s = setup().await;
        let owner = request(OWNER, None);
        let friend = request(FRIEND, Some(ChannelId::new(7)));
        let run = |req: Request, cmd: PlaylistCommand| {
            let bot = &s.bot;
            async move { execute(bot, &req, Command::Playlist(cmd)).await }
        };

        run(owner, PlaylistCommand::Create { name: "Fiesta".into() })
            .await
            .unwrap();

        let add = || PlaylistCommand::Add {
            name: "fiesta".into(),
            url: "https://youtu.be/abc".into(),
        };
        let err = run(friend, add()).await.unwrap_err();
        assert!(matches!(err, CommandError::Playlist(PlaylistError::Unauthorized(_))));

        run(
            owner,
            PlaylistCommand::Whitelist {
                name: "fiesta".into(),
                user: FRIEND,
            },
        )
        .await
        .unwrap();
        run(friend, add()).await.unwrap();

        let notice = run(friend, PlaylistCommand::Play { name: "fiesta".into() })
            .await
            .unwrap();
        assert!(notice.plain().contains("**1** canciones"));

        let listed = run(owner, PlaylistCommand::List).await.unwrap();
        assert!(listed.plain().contains("`Fiesta`"));
    }
}
