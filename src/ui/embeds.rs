use chrono::{DateTime, Utc};
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    item::Item,
    notify::{Notice, NoticeEmbed, NoticeKind},
    queue::QueueListing,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

const ITEMS_PER_PAGE: usize = 10;

/// Convierte un aviso en el embed de Discord
pub fn create_embed(notice: &NoticeEmbed) -> CreateEmbed {
    let color = match notice.kind {
        NoticeKind::Success => colors::SUCCESS_GREEN,
        NoticeKind::Error => colors::ERROR_RED,
        NoticeKind::Warning => colors::WARNING_ORANGE,
        NoticeKind::Info => colors::INFO_BLUE,
        NoticeKind::Music => colors::MUSIC_PURPLE,
    };

    let mut embed = CreateEmbed::default()
        .title(&notice.title)
        .description(&notice.description)
        .color(color);

    for (name, value) in &notice.fields {
        embed = embed.field(name, value, false);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de la cola: item actual y una página de pendientes
pub fn queue_notice(listing: &QueueListing, page: usize, now: DateTime<Utc>) -> Notice {
    if listing.current.is_none() && listing.items.is_empty() {
        return Notice::embed(
            NoticeKind::Info,
            "📋 Cola de Reproducción",
            "😴 **La cola está vacía**\n\n💡 Usa `/play`, `/youtube` o `/upload` para agregar audio",
        );
    }

    let queue_page = listing.get_page(page, ITEMS_PER_PAGE);
    let description = if queue_page.items.is_empty() {
        "Sin canciones pendientes".to_string()
    } else {
        queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "**{}**. {} `{}`",
                    queue_page.first_position + i,
                    item.title,
                    item.kind()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut notice = Notice::embed(NoticeKind::Info, "📋 Cola de Reproducción", description);

    if let Some(current) = &listing.current {
        notice = notice.field("▶️ Reproduciendo", now_playing_line(current, now));
    }

    notice = notice.field(
        "Información",
        format!(
            "**Total:** {} canciones • Página {} de {}",
            listing.items.len(),
            queue_page.current_page,
            queue_page.total_pages
        ),
    );
    notice
}

fn now_playing_line(item: &Item, now: DateTime<Utc>) -> String {
    match item.elapsed(now) {
        Some(elapsed) => format!(
            "**{}** `[{}]` • <@{}>",
            item.title,
            format_duration(elapsed),
            item.requested_by
        ),
        None => format!("**{}** • <@{}>", item.title, item.requested_by),
    }
}

/// Error para el usuario, en rojo
pub fn error_notice(message: &str) -> Notice {
    Notice::embed(NoticeKind::Error, "❌ Error", message)
}

/// Aviso de item agregado a la cola
pub fn item_added_notice(item: &Item, position: usize) -> Notice {
    Notice::embed(
        NoticeKind::Success,
        "✅ Agregado a la Cola",
        format!("**{}**", item.title),
    )
    .field("📍 Posición", format!("#{position}"))
    .field("🔗 Tipo", item.kind().to_string())
}

pub fn batch_added_notice(added: usize, requested: usize, source: &str) -> Notice {
    let mut notice = Notice::embed(
        NoticeKind::Music,
        "📋 Canciones Agregadas",
        format!("**{added}** canciones de {source}"),
    );
    if added < requested {
        notice = notice.field(
            "⚠️ Cola llena",
            format!("{} canciones no entraron", requested - added),
        );
    }
    notice
}

/// Lista de nombres (aliases o playlists) en un embed
pub fn names_notice(title: &str, names: &[String], empty: &str) -> Notice {
    let description = if names.is_empty() {
        empty.to_string()
    } else {
        names
            .iter()
            .map(|name| format!("• `{name}`"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Notice::embed(NoticeKind::Info, title, description)
}

/// Formatea una duración como `m:ss` o `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};

    fn item(title: &str) -> Item {
        Item::remote(title, "https://youtu.be/x", ChannelId::new(1), UserId::new(9))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_empty_queue_notice() {
        let listing = QueueListing {
            current: None,
            items: Vec::new(),
        };
        let notice = queue_notice(&listing, 1, Utc::now());
        assert!(notice.plain().contains("vacía"));
    }

    #[test]
    fn test_queue_notice_numbers_second_page() {
        let now = Utc::now();
        let mut current = item("sonando");
        current.mark_started(now - chrono::Duration::seconds(75));

        let listing = QueueListing {
            current: Some(current),
            items: (1..=12).map(|n| item(&format!("t{n}"))).collect(),
        };
        let notice = queue_notice(&listing, 2, now);
        let embed = notice.embed.unwrap();

        assert_eq!(
            embed.description,
            "**11**. t11 `remoto (pendiente)`\n**12**. t12 `remoto (pendiente)`"
        );
        assert_eq!(embed.fields[0].0, "▶️ Reproduciendo");
        assert!(embed.fields[0].1.contains("`[1:15]`"));
        assert!(embed.fields[1].1.contains("Página 2 de 2"));
    }

    #[test]
    fn test_batch_notice_reports_overflow() {
        let notice = batch_added_notice(3, 5, "la playlist");
        let embed = notice.embed.unwrap();
        assert_eq!(embed.fields, vec![("⚠️ Cola llena".to_string(), "2 canciones no entraron".to_string())]);
    }
}
