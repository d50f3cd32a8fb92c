// snd_channels.rs — tracked playback channels
//
// A fixed-size table mapping live backend channels to their source entity
// and spatial state. A slot with no backend channel is free; every other
// field of a free slot is stale and ignored.

use qwsound_common::math::Vec3;

use crate::mixer::{ChannelRef, DspRef, Mixer};
use crate::sound_types::{ENTCHANNEL_ANY, MAX_TRACKED_CHANNELS};

#[derive(Clone, Default)]
pub struct TrackedChannel {
    pub channel: Option<ChannelRef>,
    pub spatializer: Option<DspRef>,
    pub entnum: i32,
    pub entchannel: i32,
    pub sfx_index: Option<usize>,
    pub is_static: bool,
    pub origin: Vec3,
    pub prev_origin: Vec3,
    /// Emission point relative to the owning entity's reference point.
    pub origin_offset: Vec3,
    /// Cleared on (re)attachment so the first frame never derives a velocity.
    pub have_prev_origin: bool,
}

impl TrackedChannel {
    /// Detach and release the spatializer DSP, if one is attached.
    pub fn release_spatializer(&mut self, mixer: &mut dyn Mixer) {
        if let Some(dsp) = self.spatializer.take() {
            if let Some(channel) = self.channel {
                mixer.detach_channel_dsp(channel, dsp);
            }
            mixer.release_dsp(dsp);
        }
    }
}

pub struct ChannelPool {
    pub slots: Vec<TrackedChannel>,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRACKED_CHANNELS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![TrackedChannel::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.channel.is_some()).count()
    }

    /// Free one slot: stop its backend channel, release its spatializer,
    /// clear everything.
    pub fn release_slot(&mut self, index: usize, mixer: &mut dyn Mixer) {
        let slot = &mut self.slots[index];
        if let Some(channel) = slot.channel {
            mixer.stop_channel(channel);
        }
        slot.release_spatializer(mixer);
        *slot = TrackedChannel::default();
    }

    /// Reclaim a slot whose backend channel already ended on its own.
    fn reclaim_slot(&mut self, index: usize, mixer: &mut dyn Mixer) {
        let slot = &mut self.slots[index];
        slot.release_spatializer(mixer);
        *slot = TrackedChannel::default();
    }

    /// Find the tracked slot for (entnum, entchannel); `ENTCHANNEL_ANY`
    /// matches any sub-channel of the entity. The scan doubles as a lazy
    /// reclamation pass: any slot found to have finished playing is freed
    /// on the way through.
    pub fn find_by_source(
        &mut self,
        entnum: i32,
        entchannel: i32,
        mixer: &mut dyn Mixer,
    ) -> Option<usize> {
        for i in 0..self.slots.len() {
            let channel = match self.slots[i].channel {
                Some(channel) => channel,
                None => continue,
            };
            if !mixer.is_playing(channel) {
                self.reclaim_slot(i, mixer);
                continue;
            }
            if self.slots[i].entnum != entnum {
                continue;
            }
            if entchannel != ENTCHANNEL_ANY && self.slots[i].entchannel != entchannel {
                continue;
            }
            return Some(i);
        }
        None
    }

    /// Claim a slot: a structurally free one, else one whose channel has
    /// stopped, else one voice-limited into inaudibility (force-stopped).
    /// The tier order decides which sounds get dropped under pressure.
    pub fn alloc(&mut self, mixer: &mut dyn Mixer) -> Option<usize> {
        for i in 0..self.slots.len() {
            if self.slots[i].channel.is_none() {
                return Some(i);
            }
        }

        for i in 0..self.slots.len() {
            if let Some(channel) = self.slots[i].channel {
                if !mixer.is_playing(channel) {
                    self.reclaim_slot(i, mixer);
                    return Some(i);
                }
            }
        }

        for i in 0..self.slots.len() {
            if let Some(channel) = self.slots[i].channel {
                if mixer.is_virtual(channel) {
                    mixer.stop_channel(channel);
                    self.reclaim_slot(i, mixer);
                    return Some(i);
                }
            }
        }

        None
    }

    /// Stop and free every slot owned by (entnum, entchannel);
    /// `ENTCHANNEL_ANY` releases all of the entity's sub-channels.
    /// A source with nothing tracked is a no-op.
    pub fn release_matching(&mut self, entnum: i32, entchannel: i32, mixer: &mut dyn Mixer) {
        for i in 0..self.slots.len() {
            if self.slots[i].channel.is_none() {
                continue;
            }
            if self.slots[i].entnum != entnum {
                continue;
            }
            if entchannel != ENTCHANNEL_ANY && self.slots[i].entchannel != entchannel {
                continue;
            }
            self.release_slot(i, mixer);
        }
    }

    pub fn release_all(&mut self, mixer: &mut dyn Mixer) {
        for i in 0..self.slots.len() {
            if self.slots[i].channel.is_some() || self.slots[i].spatializer.is_some() {
                self.release_slot(i, mixer);
            }
        }
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}
