//! # Audio Module
//!
//! Cola y coordinación de reproducción por guild.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Store
//! - Cola FIFO protegida por un único `parking_lot::Mutex`
//! - Nunca se mantiene el lock a través de un `.await`
//!
//! ### [`player`] - Playback Coordinator
//! - Un bucle consumidor por guild: `Idle → Resolving → Connecting → Streaming`
//! - Respaldo de la cola antes de cada reproducción
//! - Ruta de emergencia cuando se cae la conexión de voz
//!
//! ### [`session`] - Session Manager
//! - Como máximo una conexión de voz por guild, con reintentos acotados
//!
//! ### [`decoder`] - Decode Pipeline
//! - `ffmpeg` como proceso externo produciendo PCM f32le estéreo a 48kHz
//! - El proceso se mata y se recoge en toda salida
//!
//! ### [`interrupt`] - Scheduled Interrupt
//! - Sonido prioritario a una hora fija, una vez por día

pub mod decoder;
pub mod interrupt;
pub mod item;
pub mod notify;
pub mod player;
pub mod queue;
pub mod session;
