use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        upload_command(),
        search_command(),
        youtube_command(),
        skip_command(),
        next_command(),
        queue_command(),
        aliases_command(),
        save_command(),
        load_command(),
        stop_command(),
        resolver_command(),
        playlist_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce un sonido guardado por su alias")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "alias", "Nombre del sonido")
                .required(true),
        )
}

fn upload_command() -> CreateCommand {
    CreateCommand::new("upload")
        .description("Reproduce un archivo de audio adjunto")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Attachment, "file", "Archivo de audio")
                .required(true),
        )
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Busca un video y agrega el primer resultado")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Término de búsqueda")
                .required(true),
        )
}

fn youtube_command() -> CreateCommand {
    CreateCommand::new("youtube")
        .description("Agrega un video o una playlist por URL")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "URL del video o playlist")
                .required(true),
        )
}

// Control de la cola

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta la canción actual")
}

fn next_command() -> CreateCommand {
    CreateCommand::new("next")
        .description("Mueve una canción de la cola al frente")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "index", "Posición en la cola")
                .min_int_value(1)
                .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1)
                .required(false),
        )
}

fn aliases_command() -> CreateCommand {
    CreateCommand::new("aliases").description("Lista los sonidos disponibles")
}

fn save_command() -> CreateCommand {
    CreateCommand::new("save").description("Guarda la cola actual")
}

fn load_command() -> CreateCommand {
    CreateCommand::new("load")
        .description("Restaura la cola desde un respaldo")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "backup", "Respaldo a cargar")
                .add_string_choice("Cola guardada", "queue")
                .add_string_choice("Respaldo de emergencia", "crash")
                .required(false),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn resolver_command() -> CreateCommand {
    CreateCommand::new("resolver")
        .description("Muestra o cambia el método de descarga")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "name", "Nombre del resolver")
                .required(false),
        )
}

// Playlists

fn playlist_command() -> CreateCommand {
    let name = || {
        CreateCommandOption::new(CommandOptionType::String, "name", "Nombre de la playlist")
            .required(true)
    };
    let user = || {
        CreateCommandOption::new(CommandOptionType::User, "user", "Usuario").required(true)
    };
    let sub = |sub: &str, description: &str| {
        CreateCommandOption::new(CommandOptionType::SubCommand, sub, description)
    };

    CreateCommand::new("playlist")
        .description("Gestiona playlists guardadas")
        .add_option(sub("create", "Crea una playlist").add_sub_option(name()))
        .add_option(
            sub("add", "Agrega una URL a la playlist")
                .add_sub_option(name())
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "url", "URL del video")
                        .required(true),
                ),
        )
        .add_option(sub("delete", "Borra una playlist").add_sub_option(name()))
        .add_option(
            sub("whitelist", "Permite a un usuario editar la playlist")
                .add_sub_option(name())
                .add_sub_option(user()),
        )
        .add_option(
            sub("blacklist", "Quita el permiso de edición a un usuario")
                .add_sub_option(name())
                .add_sub_option(user()),
        )
        .add_option(sub("play", "Agrega la playlist a la cola").add_sub_option(name()))
        .add_option(sub("list", "Lista las playlists guardadas"))
}
