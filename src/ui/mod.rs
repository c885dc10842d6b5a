//! Presentación de avisos como embeds de Discord.

pub mod embeds;
