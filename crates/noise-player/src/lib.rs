//! Real-time white-noise streaming.
//!
//! A generator thread fills a lock-free ring ([`ring`]); a playback thread running at
//! real-time priority drains it one hardware period at a time into an [`sink::AudioSink`],
//! padding with silence whenever the generator falls behind. See [`session::Session`] for
//! the wiring.

pub mod config;
pub mod cpal_sink;
pub mod device;
pub mod driver;
pub mod producer;
pub mod realtime;
pub mod ring;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod stats;

#[cfg(test)]
mod testing;
