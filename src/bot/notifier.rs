use async_trait::async_trait;
use serenity::{
    all::{ActivityData, ChannelId, Context, CreateMessage},
};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::{
    audio::notify::{Notice, Notifier},
    ui::embeds,
};

/// Notificador que publica en Discord.
///
/// El contexto de serenity recién existe tras el evento `ready`; hasta
/// entonces los avisos solo se registran en el log.
#[derive(Default)]
pub struct DiscordNotifier {
    ctx: RwLock<Option<Context>>,
}

impl DiscordNotifier {
    pub async fn attach(&self, ctx: Context) {
        *self.ctx.write().await = Some(ctx);
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn reply(&self, channel_id: ChannelId, notice: Notice) {
        let Some(ctx) = self.ctx.read().await.clone() else {
            debug!("Aviso sin contexto para {}: {}", channel_id, notice.plain());
            return;
        };

        let mut message = CreateMessage::new();
        if !notice.text.is_empty() {
            message = message.content(&notice.text);
        }
        if let Some(embed) = &notice.embed {
            message = message.embed(embeds::create_embed(embed));
        }

        if let Err(e) = channel_id.send_message(&ctx.http, message).await {
            error!("Error al enviar mensaje a {}: {:?}", channel_id, e);
        }
    }

    async fn set_now_playing(&self, title: Option<String>) {
        let Some(ctx) = self.ctx.read().await.clone() else {
            return;
        };
        match title {
            Some(title) => ctx.set_activity(Some(ActivityData::listening(title))),
            None => ctx.set_activity(None),
        }
    }
}
