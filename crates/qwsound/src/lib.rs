#![allow(clippy::too_many_arguments, clippy::needless_range_loop)]

pub mod binaural;
pub mod mixer;
pub mod snd_ambient;
pub mod snd_channels;
pub mod snd_main;
pub mod snd_registry;
pub mod snd_spatial;
pub mod sound_types;

pub use mixer::{Mixer, MixerError, NullMixer};
pub use snd_main::{SoundState, UpdateFrame};
