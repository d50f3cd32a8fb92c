// snd_ambient.rs — environmental loop fading
//
// Each ambient type (water, sky, ...) owns at most one looping backend
// channel. Targets come from the listener's leaf each frame; the played
// volume relaxes toward the target instead of jumping. Loops are started
// lazily the first time their faded-in volume becomes audible.

use log::warn;

use crate::mixer::{ChannelMode, ChannelRef, Mixer};
use crate::snd_registry::SfxRegistry;
use crate::sound_types::{AMBIENT_CUTOFF, NUM_AMBIENTS};

pub struct AmbientState {
    /// Bound once at startup; unbound types never play.
    pub sfx: [Option<usize>; NUM_AMBIENTS],
    channels: [Option<ChannelRef>; NUM_AMBIENTS],
    /// Smoothed volumes on the leaf 0..255 scale.
    volume: [f32; NUM_AMBIENTS],
}

/// Move `current` toward `target` by at most `step`, never overshooting.
pub fn relax_volume(current: f32, target: f32, step: f32) -> f32 {
    if current < target {
        (current + step).min(target)
    } else if current > target {
        (current - step).max(target)
    } else {
        current
    }
}

impl Default for AmbientState {
    fn default() -> Self {
        Self::new()
    }
}

impl AmbientState {
    pub fn new() -> Self {
        Self {
            sfx: [None; NUM_AMBIENTS],
            channels: [None; NUM_AMBIENTS],
            volume: [0.0; NUM_AMBIENTS],
        }
    }

    pub fn bind(&mut self, ambient: usize, sfx_index: Option<usize>) {
        self.sfx[ambient] = sfx_index;
    }

    pub fn current_volume(&self, ambient: usize) -> f32 {
        self.volume[ambient]
    }

    pub fn channel(&self, ambient: usize) -> Option<ChannelRef> {
        self.channels[ambient]
    }

    /// Hard-stop every ambient loop and reset the fade state.
    pub fn stop_all(&mut self, mixer: &mut dyn Mixer) {
        for i in 0..NUM_AMBIENTS {
            if let Some(channel) = self.channels[i].take() {
                mixer.stop_channel(channel);
            }
            self.volume[i] = 0.0;
        }
    }

    /// One frame of ambient fading. `leaf_levels` is `None` while the
    /// listener is outside any leaf; that, an inactive play state, or a
    /// zero global level all force the targets to silence. Running loops
    /// are never hard-stopped here, they only relax toward zero volume.
    pub fn update(
        &mut self,
        mixer: &mut dyn Mixer,
        registry: &mut SfxRegistry,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
        load_mode: ChannelMode,
        active: bool,
        leaf_levels: Option<[f32; NUM_AMBIENTS]>,
        ambient_level: f32,
        fade_rate: f32,
        frametime: f32,
    ) {
        let levels = match leaf_levels {
            Some(levels) if active && ambient_level != 0.0 => Some(levels),
            _ => None,
        };

        for i in 0..NUM_AMBIENTS {
            let sfx_index = match self.sfx[i] {
                Some(idx) => idx,
                None => continue,
            };

            let mut target = match levels {
                Some(levels) => ambient_level * levels[i],
                None => 0.0,
            };
            if target < AMBIENT_CUTOFF {
                target = 0.0;
            }
            self.volume[i] = relax_volume(self.volume[i], target, frametime * fade_rate);

            let playing = self.channels[i].map(|c| mixer.is_playing(c)).unwrap_or(false);
            if self.volume[i] > 0.0 && !playing {
                let sound = match registry.ensure_loaded(sfx_index, load_mode, mixer, load_file) {
                    Some(sound) => sound,
                    None => continue,
                };
                let channel = match mixer.play_sound(sound) {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("ambient {} play failed: {}", i, e);
                        self.channels[i] = None;
                        continue;
                    }
                };
                let mut start = || -> Result<(), crate::mixer::MixerError> {
                    mixer.set_mode(channel, ChannelMode::LOOPING)?;
                    mixer.set_loop_count(channel, -1)?;
                    mixer.set_paused(channel, false)
                };
                if let Err(e) = start() {
                    warn!("ambient {} start failed: {}", i, e);
                }
                self.channels[i] = Some(channel);
            }

            if let Some(channel) = self.channels[i] {
                if let Err(e) = mixer.set_volume(channel, self.volume[i] / 255.0) {
                    warn!("ambient {} volume failed: {}", i, e);
                }
            }
        }
    }
}
