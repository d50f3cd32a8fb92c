// snd_registry.rs — interned sound effects and load-on-demand
//
// Sounds are referenced everywhere by index into this table, so growing
// the table never invalidates a holder.

use log::{info, warn};

use crate::mixer::{ChannelMode, Mixer, SoundRef};
use crate::sound_types::{Sfx, MAX_QPATH, MIN_3D_DIST, NOMINAL_CLIP_DIST, SFX_GROW, SFX_INITIAL};

pub struct SfxRegistry {
    pub known_sfx: Vec<Sfx>,
}

impl Default for SfxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SfxRegistry {
    pub fn new() -> Self {
        Self {
            known_sfx: Vec::with_capacity(SFX_INITIAL),
        }
    }

    pub fn num_sfx(&self) -> usize {
        self.known_sfx.len()
    }

    pub fn get(&self, sfx_index: usize) -> Option<&Sfx> {
        self.known_sfx.get(sfx_index)
    }

    /// Intern `name`, returning the index of the existing or new entry.
    /// Returns `None` only when the table cannot grow; no more sounds can
    /// be tracked then, which is not fatal.
    pub fn find_name(&mut self, name: &str) -> Option<usize> {
        if name.is_empty() {
            panic!("find_name: empty name");
        }
        if name.len() >= MAX_QPATH {
            panic!("Sound name too long: {}", name);
        }

        for (i, sfx) in self.known_sfx.iter().enumerate() {
            if sfx.name == name {
                return Some(i);
            }
        }

        // Grow in fixed increments so a failed reservation is reported
        // before any entry moves.
        if self.known_sfx.len() == self.known_sfx.capacity() {
            if let Err(e) = self.known_sfx.try_reserve_exact(SFX_GROW) {
                warn!("find_name: couldn't grow sfx table for {}: {}", name, e);
                return None;
            }
        }

        self.known_sfx.push(Sfx {
            name: name.to_string(),
            sound: None,
            loaded: false,
        });
        Some(self.known_sfx.len() - 1)
    }

    /// Load the backend sound for an entry, once. A failed attempt is
    /// remembered so missing assets are reported a single time and never
    /// retried.
    pub fn ensure_loaded(
        &mut self,
        sfx_index: usize,
        mode: ChannelMode,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> Option<SoundRef> {
        let sfx = self.known_sfx.get_mut(sfx_index)?;
        if sfx.loaded {
            return sfx.sound;
        }

        let path = format!("sound/{}", sfx.name);
        let data = match load_file(&path) {
            Some(data) => data,
            None => {
                warn!("couldn't load {}", path);
                sfx.loaded = true;
                sfx.sound = None;
                return None;
            }
        };

        match mixer.create_sound(&data, mode) {
            Ok(sound) => {
                if mode.contains(ChannelMode::SPATIAL_3D) {
                    if let Err(e) =
                        mixer.set_sound_min_max_distance(sound, MIN_3D_DIST, NOMINAL_CLIP_DIST)
                    {
                        warn!("set default 3D distance for '{}' failed: {}", sfx.name, e);
                    }
                }
                sfx.sound = Some(sound);
            }
            Err(e) => {
                warn!("create sound '{}' failed: {}", sfx.name, e);
                sfx.sound = None;
            }
        }
        sfx.loaded = true;
        sfx.sound
    }

    /// Release every backend sound and forget all entries.
    pub fn clear(&mut self, mixer: &mut dyn Mixer) {
        let mut released = 0;
        for sfx in self.known_sfx.iter_mut() {
            if let Some(sound) = sfx.sound.take() {
                mixer.release_sound(sound);
                released += 1;
            }
            sfx.loaded = false;
        }
        if released > 0 {
            info!("released {} sounds", released);
        }
        self.known_sfx.clear();
    }
}
