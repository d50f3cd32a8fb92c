// mixer.rs — the narrow interface this layer requires from the audio backend
//
// The real mixing engine lives behind this trait; the sound layer only
// issues commands and polls state flags. All calls are synchronous and a
// failed call must leave the backend consistent.

use bitflags::bitflags;
use qwsound_common::math::Vec3;
use thiserror::Error;

/// Opaque backend sound object (decoded, playable data).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoundRef(pub u32);

/// Opaque backend playback channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef(pub u32);

/// Opaque DSP unit instantiated from a plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DspRef(pub u32);

/// Opaque handle to a loaded plugin or one of its nested DSP descriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PluginRef(pub u32);

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("mixer init failed: {0}")]
    InitFailed(String),
    #[error("sound create failed: {0}")]
    CreateFailed(String),
    #[error("stale or unknown backend handle")]
    BadHandle,
    #[error("plugin unavailable: {0}")]
    PluginMissing(String),
    #[error("{0}")]
    Backend(String),
}

bitflags! {
    /// Channel / sound playback mode. Without `SPATIAL_3D` a channel is
    /// plain stereo (2D).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelMode: u32 {
        const SPATIAL_3D     = 1 << 0;
        const LINEAR_ROLLOFF = 1 << 1;
        const LOOPING        = 1 << 2;
    }
}

/// One pose in spatializer space (meters; x right, y up, z forward).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Attributes3d {
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

/// Structured parameter block consumed by spatializer DSPs: the emitter's
/// absolute pose plus the same pose re-expressed in the listener's basis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dsp3dAttributes {
    pub absolute: Attributes3d,
    pub relative: Attributes3d,
}

/// Output/driver description for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct OutputInfo {
    pub output: String,
    pub driver: String,
    pub sample_rate: i32,
    pub speaker_channels: i32,
}

pub trait Mixer {
    // ---- lifecycle ----

    fn init(&mut self, max_channels: usize) -> Result<(), MixerError>;
    fn shutdown(&mut self);
    /// Pump the backend once (command flush / virtual-voice bookkeeping).
    fn flush(&mut self);

    // ---- sounds ----

    /// Decode and create a playable sound object from file bytes.
    fn create_sound(&mut self, data: &[u8], mode: ChannelMode) -> Result<SoundRef, MixerError>;
    fn release_sound(&mut self, sound: SoundRef);
    fn sound_length_ms(&self, sound: SoundRef) -> Option<u32>;
    fn set_sound_min_max_distance(
        &mut self,
        sound: SoundRef,
        min: f32,
        max: f32,
    ) -> Result<(), MixerError>;

    // ---- channels ----

    /// Start a sound paused; the caller configures the channel and then
    /// unpauses it.
    fn play_sound(&mut self, sound: SoundRef) -> Result<ChannelRef, MixerError>;
    /// Idempotent; stopping an unknown or already-stopped channel is a no-op.
    fn stop_channel(&mut self, channel: ChannelRef);
    fn set_paused(&mut self, channel: ChannelRef, paused: bool) -> Result<(), MixerError>;
    fn set_volume(&mut self, channel: ChannelRef, volume: f32) -> Result<(), MixerError>;
    fn set_mode(&mut self, channel: ChannelRef, mode: ChannelMode) -> Result<(), MixerError>;
    fn mode(&self, channel: ChannelRef) -> Result<ChannelMode, MixerError>;
    /// -1 loops forever.
    fn set_loop_count(&mut self, channel: ChannelRef, count: i32) -> Result<(), MixerError>;
    /// False for unknown handles or on any backend failure.
    fn is_playing(&self, channel: ChannelRef) -> bool;
    /// True when the channel is alive but inaudible under voice limiting.
    fn is_virtual(&self, channel: ChannelRef) -> bool;
    fn set_3d_attributes(
        &mut self,
        channel: ChannelRef,
        position: &Vec3,
        velocity: &Vec3,
    ) -> Result<(), MixerError>;
    fn set_3d_min_max_distance(
        &mut self,
        channel: ChannelRef,
        min: f32,
        max: f32,
    ) -> Result<(), MixerError>;

    // ---- listener and globals ----

    fn set_listener(
        &mut self,
        position: &Vec3,
        velocity: &Vec3,
        forward: &Vec3,
        up: &Vec3,
    ) -> Result<(), MixerError>;
    fn set_3d_settings(
        &mut self,
        doppler_scale: f32,
        distance_factor: f32,
        rolloff_scale: f32,
    ) -> Result<(), MixerError>;
    fn set_master_volume(&mut self, volume: f32) -> Result<(), MixerError>;
    fn set_master_mute(&mut self, mute: bool) -> Result<(), MixerError>;
    fn channels_playing(&self) -> usize;
    fn output_info(&self) -> OutputInfo;

    // ---- plugin DSPs (optional capability) ----

    fn load_plugin(&mut self, filename: &str) -> Result<PluginRef, MixerError> {
        Err(MixerError::PluginMissing(filename.to_string()))
    }
    fn unload_plugin(&mut self, _root: PluginRef) {}
    /// Look up a nested DSP description of a loaded plugin by its
    /// advertised name.
    fn find_plugin_dsp(&self, _root: PluginRef, _name: &str) -> Option<PluginRef> {
        None
    }
    fn create_plugin_dsp(&mut self, _plugin: PluginRef) -> Result<DspRef, MixerError> {
        Err(MixerError::PluginMissing("no plugin support".to_string()))
    }
    fn release_dsp(&mut self, _dsp: DspRef) {}
    fn attach_channel_dsp(&mut self, _channel: ChannelRef, _dsp: DspRef) -> Result<(), MixerError> {
        Err(MixerError::BadHandle)
    }
    fn detach_channel_dsp(&mut self, _channel: ChannelRef, _dsp: DspRef) {}
    fn attach_master_dsp(&mut self, _dsp: DspRef) -> Result<(), MixerError> {
        Err(MixerError::BadHandle)
    }
    fn detach_master_dsp(&mut self, _dsp: DspRef) {}
    fn set_dsp_int(&mut self, _dsp: DspRef, _index: u32, _value: i32) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_dsp_float(&mut self, _dsp: DspRef, _index: u32, _value: f32) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_dsp_3d_attributes(
        &mut self,
        _dsp: DspRef,
        _attrs: &Dsp3dAttributes,
    ) -> Result<(), MixerError> {
        Ok(())
    }
}

/// Silent backend: every command succeeds and nothing ever plays.
/// Used when the host runs with sound disabled.
#[derive(Default)]
pub struct NullMixer {
    next_sound: u32,
    next_channel: u32,
}

impl NullMixer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mixer for NullMixer {
    fn init(&mut self, _max_channels: usize) -> Result<(), MixerError> {
        Ok(())
    }
    fn shutdown(&mut self) {}
    fn flush(&mut self) {}

    fn create_sound(&mut self, _data: &[u8], _mode: ChannelMode) -> Result<SoundRef, MixerError> {
        self.next_sound += 1;
        Ok(SoundRef(self.next_sound))
    }
    fn release_sound(&mut self, _sound: SoundRef) {}
    fn sound_length_ms(&self, _sound: SoundRef) -> Option<u32> {
        None
    }
    fn set_sound_min_max_distance(
        &mut self,
        _sound: SoundRef,
        _min: f32,
        _max: f32,
    ) -> Result<(), MixerError> {
        Ok(())
    }

    fn play_sound(&mut self, _sound: SoundRef) -> Result<ChannelRef, MixerError> {
        self.next_channel += 1;
        Ok(ChannelRef(self.next_channel))
    }
    fn stop_channel(&mut self, _channel: ChannelRef) {}
    fn set_paused(&mut self, _channel: ChannelRef, _paused: bool) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_volume(&mut self, _channel: ChannelRef, _volume: f32) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_mode(&mut self, _channel: ChannelRef, _mode: ChannelMode) -> Result<(), MixerError> {
        Ok(())
    }
    fn mode(&self, _channel: ChannelRef) -> Result<ChannelMode, MixerError> {
        Ok(ChannelMode::empty())
    }
    fn set_loop_count(&mut self, _channel: ChannelRef, _count: i32) -> Result<(), MixerError> {
        Ok(())
    }
    fn is_playing(&self, _channel: ChannelRef) -> bool {
        false
    }
    fn is_virtual(&self, _channel: ChannelRef) -> bool {
        false
    }
    fn set_3d_attributes(
        &mut self,
        _channel: ChannelRef,
        _position: &Vec3,
        _velocity: &Vec3,
    ) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_3d_min_max_distance(
        &mut self,
        _channel: ChannelRef,
        _min: f32,
        _max: f32,
    ) -> Result<(), MixerError> {
        Ok(())
    }

    fn set_listener(
        &mut self,
        _position: &Vec3,
        _velocity: &Vec3,
        _forward: &Vec3,
        _up: &Vec3,
    ) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_3d_settings(
        &mut self,
        _doppler_scale: f32,
        _distance_factor: f32,
        _rolloff_scale: f32,
    ) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_master_volume(&mut self, _volume: f32) -> Result<(), MixerError> {
        Ok(())
    }
    fn set_master_mute(&mut self, _mute: bool) -> Result<(), MixerError> {
        Ok(())
    }
    fn channels_playing(&self) -> usize {
        0
    }
    fn output_info(&self) -> OutputInfo {
        OutputInfo {
            output: "nosound".to_string(),
            ..OutputInfo::default()
        }
    }
}
