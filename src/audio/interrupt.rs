//! Interrupción diaria: a una hora fija se antepone un sonido prioritario en
//! cada guild con actividad, cortando lo que esté sonando y reanudándolo
//! después.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{item::Item, player::AudioPlayer};
use crate::sources::AliasBook;

/// Fuente de la hora local; las pruebas usan un reloj fijo
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Hora diaria que dispara una sola vez por día calendario.
///
/// Solo dispara dentro de `window` tras la hora indicada: si el proceso no
/// consultó a tiempo, ese día ya no dispara.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    at: NaiveTime,
    window: chrono::Duration,
    last_fired: Option<NaiveDate>,
}

impl DailySchedule {
    pub fn new(at: NaiveTime, window: Duration) -> Self {
        Self {
            at,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::minutes(1)),
            last_fired: None,
        }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        let today = now.date();
        if self.last_fired == Some(today) {
            return false;
        }

        let slot = today.and_time(self.at);
        if now < slot || now - slot > self.window {
            return false;
        }

        self.last_fired = Some(today);
        true
    }
}

#[derive(Debug, Clone)]
pub struct InterruptSettings {
    pub at: NaiveTime,
    pub alias: String,
    pub tick: Duration,
    /// Guild y canal a usar cuando la guild todavía no reprodujo nada
    pub fallback: Option<(GuildId, ChannelId)>,
    /// Identidad con la que se encola el sonido (el propio bot)
    pub requested_by: UserId,
}

pub struct InterruptScheduler {
    player: Arc<AudioPlayer>,
    aliases: AliasBook,
    clock: Arc<dyn Clock>,
    schedule: DailySchedule,
    settings: InterruptSettings,
}

impl InterruptScheduler {
    pub fn new(
        player: Arc<AudioPlayer>,
        aliases: AliasBook,
        clock: Arc<dyn Clock>,
        settings: InterruptSettings,
    ) -> Self {
        Self {
            // Dos ticks de margen: un tick apenas antes de la hora seguido
            // de uno atrasado no debe perder el día
            schedule: DailySchedule::new(settings.at, settings.tick * 2),
            player,
            aliases,
            clock,
            settings,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "⏰ Interrupción diaria programada a las {} con \"{}\"",
            self.schedule.at().format("%H:%M"),
            self.settings.alias
        );

        let mut interval = tokio::time::interval(self.settings.tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!("Programador de interrupciones detenido");
    }

    /// Consulta el reloj y dispara si toca; devuelve en cuántas guilds
    pub async fn tick(&mut self) -> usize {
        if !self.schedule.poll(self.clock.now()) {
            return 0;
        }
        self.fire().await
    }

    async fn fire(&self) -> usize {
        let path = match self.aliases.lookup(&self.settings.alias).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                warn!("Alias de interrupción \"{}\" no existe", self.settings.alias);
                return 0;
            }
            Err(e) => {
                error!("No se pudo leer el directorio de sonidos: {}", e);
                return 0;
            }
        };

        let mut fired = 0;
        for (guild_id, channel_id) in self.targets() {
            let item = Item::alias(
                self.settings.alias.clone(),
                path.clone(),
                channel_id,
                self.settings.requested_by,
            );
            match self.player.guild(guild_id).fire_interrupt(item).await {
                Ok(()) => fired += 1,
                Err(e) => error!("Interrupción fallida en guild {}: {}", guild_id, e),
            }
        }
        fired
    }

    /// Guilds con canal conocido, más la guild de respaldo configurada
    fn targets(&self) -> Vec<(GuildId, ChannelId)> {
        let mut targets: Vec<(GuildId, ChannelId)> = self
            .player
            .players()
            .iter()
            .filter_map(|p| p.last_channel().map(|channel| (p.guild_id(), channel)))
            .collect();

        if let Some((guild_id, channel_id)) = self.settings.fallback {
            if !targets.iter().any(|(g, _)| *g == guild_id) {
                targets.push((guild_id, channel_id));
            }
        }
        targets
    }
}
