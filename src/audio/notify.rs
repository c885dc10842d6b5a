use async_trait::async_trait;
use serenity::model::id::ChannelId;
use tracing::info;

/// Tono visual de una notificación
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Warning,
    Info,
    Music,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeEmbed {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
}

/// Respuesta para el usuario: texto y, opcionalmente, un embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub embed: Option<NoticeEmbed>,
}

impl Notice {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embed: None,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::text(format!("✅ {}", text.into()))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::text(format!("❌ {}", text.into()))
    }

    pub fn embed(kind: NoticeKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            embed: Some(NoticeEmbed {
                kind,
                title: title.into(),
                description: description.into(),
                fields: Vec::new(),
            }),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(embed) = self.embed.as_mut() {
            embed.fields.push((name.into(), value.into()));
        }
        self
    }

    /// Texto plano equivalente, para logs y pruebas
    pub fn plain(&self) -> String {
        match &self.embed {
            Some(embed) if self.text.is_empty() => {
                format!("{}\n{}", embed.title, embed.description)
            }
            _ => self.text.clone(),
        }
    }
}

/// Salida de notificaciones hacia la plataforma de chat
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reply(&self, channel_id: ChannelId, notice: Notice);

    /// Indicador global de "reproduciendo ahora"; `None` lo limpia
    async fn set_now_playing(&self, title: Option<String>);
}

/// Notificador que solo escribe en el log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn reply(&self, channel_id: ChannelId, notice: Notice) {
        info!("💬 [{}] {}", channel_id, notice.plain());
    }

    async fn set_now_playing(&self, title: Option<String>) {
        match title {
            Some(title) => info!("🎵 Reproduciendo ahora: {}", title),
            None => info!("⏹️ Sin reproducción"),
        }
    }
}
