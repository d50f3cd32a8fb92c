// binaural.rs — optional binaural spatializer plugin
//
// When the plugin is present, 3D sounds bypass the mixer's own panner:
// each channel plays in 2D and carries a spatializer DSP that receives
// absolute and listener-relative 3D attribute blocks every frame. A
// second DSP on the master bus (the externalizer) shapes the overall
// out-of-head impression.

use log::{info, warn};
use qwsound_common::math::Vec3;

use crate::mixer::{Attributes3d, ChannelMode, Dsp3dAttributes, DspRef, Mixer, PluginRef};
use crate::snd_channels::TrackedChannel;
use crate::snd_spatial::{
    relative_attributes, to_spatializer_pos, SpatializerListener, DEFAULT_FORWARD, DEFAULT_UP,
};
use crate::sound_types::QU_PER_METER;

pub const PLUGIN_FILENAME: &str = "binauralspatial";
pub const SPATIALIZER_DSP_NAME: &str = "Binaural Spatializer";
pub const EXTERNALIZER_DSP_NAME: &str = "Binaural Externalizer";

// Parameter indices published by the spatializer DSP.
pub const PARAM_MIN_DISTANCE: u32 = 0; // float, meters
pub const PARAM_MAX_DISTANCE: u32 = 1; // float, meters
pub const PARAM_DISTANCE_MODEL: u32 = 2; // int
pub const PARAM_ATTRIBUTES_3D: u32 = 3; // structured block
pub const PARAM_OUTPUT_FORMAT: u32 = 4; // int

pub const OUTPUT_FORMAT_BINAURAL: i32 = 2;
pub const DISTANCE_MODEL_LINEAR: i32 = 1;

// Externalizer parameters, both 0..100.
pub const EXT_PARAM_AMOUNT: u32 = 0;
pub const EXT_PARAM_CHARACTER: u32 = 1;

#[derive(Default)]
pub struct BinauralState {
    pub available: bool,
    root: Option<PluginRef>,
    spatializer: Option<PluginRef>,
    externalizer: Option<PluginRef>,
    master_externalizer: Option<DspRef>,
}

impl BinauralState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn externalizer_active(&self) -> bool {
        self.master_externalizer.is_some()
    }

    /// Probe the backend for the plugin and its DSP descriptions.
    /// Absence is routine, not an error.
    pub fn load(&mut self, mixer: &mut dyn Mixer) {
        *self = Self::default();
        let root = match mixer.load_plugin(PLUGIN_FILENAME) {
            Ok(root) => root,
            Err(e) => {
                info!("binaural: plugin not loaded ({})", e);
                return;
            }
        };
        self.root = Some(root);
        self.spatializer = mixer.find_plugin_dsp(root, SPATIALIZER_DSP_NAME);
        self.externalizer = mixer.find_plugin_dsp(root, EXTERNALIZER_DSP_NAME);
        if self.spatializer.is_some() {
            self.available = true;
            info!("binaural: spatializer plugin loaded");
        } else {
            warn!("binaural: plugin loaded but spatializer DSP not found");
        }
    }

    /// Detach everything and forget the plugin.
    pub fn unload(&mut self, mixer: &mut dyn Mixer) {
        self.detach_externalizer(mixer);
        if let Some(root) = self.root.take() {
            mixer.unload_plugin(root);
        }
        *self = Self::default();
    }

    /// Put a spatializer DSP on a freshly started channel: the channel
    /// drops to 2D and the DSP takes over distance and direction.
    pub fn attach_spatializer(
        &self,
        slot: &mut TrackedChannel,
        mixer: &mut dyn Mixer,
        origin_qu: &Vec3,
        min_dist_qu: f32,
        max_dist_qu: f32,
        listener: &SpatializerListener,
    ) {
        let plugin = match (self.available, self.spatializer, slot.channel) {
            (true, Some(plugin), Some(_)) => plugin,
            _ => return,
        };
        let channel = slot.channel.unwrap();

        match mixer.mode(channel) {
            Ok(mode) => {
                if let Err(e) = mixer.set_mode(channel, mode - ChannelMode::SPATIAL_3D) {
                    warn!("binaural: switch to 2D failed: {}", e);
                }
            }
            Err(e) => warn!("binaural: mode query failed: {}", e),
        }

        let dsp = match mixer.create_plugin_dsp(plugin) {
            Ok(dsp) => dsp,
            Err(e) => {
                warn!("binaural: spatializer create failed: {}", e);
                return;
            }
        };
        if let Err(e) = mixer.attach_channel_dsp(channel, dsp) {
            warn!("binaural: spatializer attach failed: {}", e);
            mixer.release_dsp(dsp);
            return;
        }
        slot.spatializer = Some(dsp);

        let qu_to_m = 1.0 / QU_PER_METER;
        log_param(mixer.set_dsp_int(dsp, PARAM_OUTPUT_FORMAT, OUTPUT_FORMAT_BINAURAL));
        log_param(mixer.set_dsp_float(dsp, PARAM_MIN_DISTANCE, min_dist_qu * qu_to_m));
        log_param(mixer.set_dsp_float(dsp, PARAM_MAX_DISTANCE, max_dist_qu * qu_to_m));
        log_param(mixer.set_dsp_int(dsp, PARAM_DISTANCE_MODEL, DISTANCE_MODEL_LINEAR));

        let absolute = Attributes3d {
            position: to_spatializer_pos(origin_qu),
            velocity: [0.0; 3],
            forward: DEFAULT_FORWARD,
            up: DEFAULT_UP,
        };
        let attrs = Dsp3dAttributes {
            absolute,
            relative: relative_attributes(&absolute.position, &absolute.velocity, listener),
        };
        log_param(mixer.set_dsp_3d_attributes(dsp, &attrs));
    }

    fn attach_externalizer(&mut self, mixer: &mut dyn Mixer, amount: f32, character: f32) {
        let plugin = match (self.available, self.externalizer, self.master_externalizer) {
            (true, Some(plugin), None) => plugin,
            _ => return,
        };
        let dsp = match mixer.create_plugin_dsp(plugin) {
            Ok(dsp) => dsp,
            Err(e) => {
                warn!("binaural: externalizer create failed: {}", e);
                return;
            }
        };
        if let Err(e) = mixer.attach_master_dsp(dsp) {
            warn!("binaural: externalizer attach failed: {}", e);
            mixer.release_dsp(dsp);
            return;
        }
        self.master_externalizer = Some(dsp);
        log_param(mixer.set_dsp_float(dsp, EXT_PARAM_AMOUNT, amount));
        log_param(mixer.set_dsp_float(dsp, EXT_PARAM_CHARACTER, character));
        info!(
            "binaural: externalizer on master bus (amount={:.0}, character={:.0})",
            amount, character
        );
    }

    pub fn detach_externalizer(&mut self, mixer: &mut dyn Mixer) {
        if let Some(dsp) = self.master_externalizer.take() {
            mixer.detach_master_dsp(dsp);
            mixer.release_dsp(dsp);
            info!("binaural: externalizer detached");
        }
    }

    /// Reconcile the master externalizer with its cvar state and push the
    /// tone parameters.
    pub fn update_externalizer(
        &mut self,
        mixer: &mut dyn Mixer,
        enabled: bool,
        amount: f32,
        character: f32,
    ) {
        if !enabled {
            self.detach_externalizer(mixer);
            return;
        }
        if self.master_externalizer.is_none() {
            self.attach_externalizer(mixer, amount, character);
        }
        if let Some(dsp) = self.master_externalizer {
            log_param(mixer.set_dsp_float(dsp, EXT_PARAM_AMOUNT, amount));
            log_param(mixer.set_dsp_float(dsp, EXT_PARAM_CHARACTER, character));
        }
    }
}

fn log_param(result: Result<(), crate::mixer::MixerError>) {
    if let Err(e) = result {
        warn!("binaural: parameter set failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::mock::MockMixer;

    fn slot_with_channel(mixer: &mut MockMixer) -> TrackedChannel {
        let sound = mixer.create_sound(&[0u8; 4], ChannelMode::SPATIAL_3D).unwrap();
        let channel = mixer.play_sound(sound).unwrap();
        TrackedChannel {
            channel: Some(channel),
            ..TrackedChannel::default()
        }
    }

    #[test]
    fn load_requires_spatializer_dsp() {
        let mut mixer = MockMixer::new();
        let mut binaural = BinauralState::new();
        binaural.load(&mut mixer);
        assert!(!binaural.available);

        let mut mixer = MockMixer::with_plugin();
        binaural.load(&mut mixer);
        assert!(binaural.available);
    }

    #[test]
    fn attach_spatializer_switches_channel_to_2d_and_configures_dsp() {
        let mut mixer = MockMixer::with_plugin();
        let mut binaural = BinauralState::new();
        binaural.load(&mut mixer);

        let mut slot = slot_with_channel(&mut mixer);
        let channel = slot.channel.unwrap();
        binaural.attach_spatializer(
            &mut slot,
            &mut mixer,
            &[QU_PER_METER, 0.0, 0.0],
            80.0,
            1000.0,
            &SpatializerListener::default(),
        );

        let dsp = slot.spatializer.expect("spatializer attached");
        assert!(!mixer.channel(channel).mode.contains(ChannelMode::SPATIAL_3D));
        assert_eq!(mixer.channel(channel).dsps, vec![dsp]);
        let state = mixer.dsp(dsp);
        assert_eq!(state.ints[&PARAM_OUTPUT_FORMAT], OUTPUT_FORMAT_BINAURAL);
        assert_eq!(state.ints[&PARAM_DISTANCE_MODEL], DISTANCE_MODEL_LINEAR);
        assert!((state.floats[&PARAM_MIN_DISTANCE] - 80.0 / QU_PER_METER).abs() < 1e-4);
        assert!((state.floats[&PARAM_MAX_DISTANCE] - 1000.0 / QU_PER_METER).abs() < 1e-4);
        let attrs = state.attrs.expect("initial attribute block");
        assert!((attrs.absolute.position[2] - 1.0).abs() < 1e-4);
        assert_eq!(attrs.absolute.velocity, [0.0; 3]);
    }

    #[test]
    fn attach_spatializer_without_plugin_is_noop() {
        let mut mixer = MockMixer::new();
        let binaural = BinauralState::new();
        let mut slot = slot_with_channel(&mut mixer);
        binaural.attach_spatializer(
            &mut slot,
            &mut mixer,
            &[0.0; 3],
            80.0,
            1000.0,
            &SpatializerListener::default(),
        );
        assert!(slot.spatializer.is_none());
    }

    #[test]
    fn externalizer_follows_enable_toggle() {
        let mut mixer = MockMixer::with_plugin();
        let mut binaural = BinauralState::new();
        binaural.load(&mut mixer);

        binaural.update_externalizer(&mut mixer, true, 50.0, 60.0);
        assert!(binaural.externalizer_active());
        assert_eq!(mixer.master_dsps.len(), 1);
        let dsp = mixer.master_dsps[0];
        assert_eq!(mixer.dsp(dsp).floats[&EXT_PARAM_AMOUNT], 50.0);
        assert_eq!(mixer.dsp(dsp).floats[&EXT_PARAM_CHARACTER], 60.0);

        // Parameter changes propagate while attached.
        binaural.update_externalizer(&mut mixer, true, 25.0, 60.0);
        assert_eq!(mixer.dsp(dsp).floats[&EXT_PARAM_AMOUNT], 25.0);

        binaural.update_externalizer(&mut mixer, false, 25.0, 60.0);
        assert!(!binaural.externalizer_active());
        assert!(mixer.master_dsps.is_empty());
        assert!(mixer.dsp(dsp).released);
    }

    #[test]
    fn unload_detaches_externalizer() {
        let mut mixer = MockMixer::with_plugin();
        let mut binaural = BinauralState::new();
        binaural.load(&mut mixer);
        binaural.update_externalizer(&mut mixer, true, 50.0, 50.0);
        binaural.unload(&mut mixer);
        assert!(!binaural.available);
        assert!(mixer.master_dsps.is_empty());
    }
}
