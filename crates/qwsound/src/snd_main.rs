// snd_main.rs — sound system lifecycle, play/stop requests, per-frame update
//
// One SoundState owns the registry, the tracked-channel pool, the ambient
// fader and the listener pose. The mixing backend is passed into every
// operation as `&mut dyn Mixer`; gameplay and the frame loop call in from
// the same thread.

use log::{debug, info, warn};
use qwsound_common::cvar::{CvarContext, CVAR_ARCHIVE};
use qwsound_common::math::{vector_subtract, Vec3};

use crate::binaural::BinauralState;
use crate::mixer::{ChannelMode, Mixer};
use crate::snd_ambient::AmbientState;
use crate::snd_channels::{ChannelPool, TrackedChannel};
use crate::snd_registry::SfxRegistry;
use crate::snd_spatial::{
    sanitize_basis, spatializer_listener, update_moving_sounds, update_spatializers,
    ListenerState, MotionParams, SpatializerListener,
};
use crate::sound_types::{
    valid_entity, AMBIENT_SKY, AMBIENT_WATER, MAX_TRACKED_CHANNELS, MIN_3D_DIST,
    NOMINAL_CLIP_DIST, NUM_AMBIENTS, STATIC_ATTEN_DIV,
};

/// Everything the per-frame update needs from the engine. Entity storage
/// and the collision model are external; their lookups come in as
/// closures.
pub struct UpdateFrame<'a> {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// Listener velocity; ignored while not `active`.
    pub velocity: Vec3,
    /// Elapsed simulation time for this frame, seconds.
    pub frametime: f32,
    /// False in menus, during loads, and other non-play states.
    pub active: bool,
    /// Entity number of the local player; its own sounds are not
    /// respatialized.
    pub local_entnum: i32,
    /// Ambient loop levels (0..255) for the listener's leaf, or `None`
    /// when the listener is outside the world.
    pub leaf_ambient_levels: Option<[f32; NUM_AMBIENTS]>,
    pub get_entity_origin: &'a dyn Fn(i32) -> Vec3,
}

pub struct SoundState {
    pub cvars: CvarContext,
    pub registry: SfxRegistry,
    pub pool: ChannelPool,
    pub ambient: AmbientState,
    pub binaural: BinauralState,
    pub listener: ListenerState,
    pub motion: MotionParams,
    listener_sp: SpatializerListener,
    sound_started: bool,
    snd_blocked: i32,
    local_entnum: i32,
    play_hash: i32,
}

impl Default for SoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundState {
    pub fn new() -> Self {
        let mut state = Self {
            cvars: CvarContext::new(),
            registry: SfxRegistry::new(),
            pool: ChannelPool::new(),
            ambient: AmbientState::new(),
            binaural: BinauralState::new(),
            listener: ListenerState::default(),
            motion: MotionParams::default(),
            listener_sp: SpatializerListener::default(),
            sound_started: false,
            snd_blocked: 0,
            local_entnum: 0,
            play_hash: 345,
        };
        state.register_cvars();
        state
    }

    pub fn sound_started(&self) -> bool {
        self.sound_started
    }

    fn register_cvars(&mut self) {
        let c = &mut self.cvars;
        c.get("bgmvolume", "1", CVAR_ARCHIVE);
        c.get("s_initsound", "1", 0);
        c.get("s_volume", "0.7", CVAR_ARCHIVE);
        c.get("s_nosound", "0", 0);
        c.get("s_precache", "1", 0);
        c.get("s_ambientlevel", "0.3", 0);
        c.get("s_ambientfade", "100", 0);
        c.get("s_noextraupdate", "0", 0);
        c.get("s_show", "0", 0);
        c.get("s_doppler", "1", CVAR_ARCHIVE);
        c.get("s_doppler_factor", "1.0", CVAR_ARCHIVE);
        c.get("s_externalizer", "1", CVAR_ARCHIVE);
        c.get("s_externalizer_amount", "50", CVAR_ARCHIVE);
        c.get("s_externalizer_character", "50", CVAR_ARCHIVE);
    }

    /// Sound creation mode: with the binaural plugin every sound plays 2D
    /// under a spatializer DSP, otherwise the mixer's 3D panner is used.
    fn load_mode(&self) -> ChannelMode {
        if self.binaural.available {
            ChannelMode::empty()
        } else {
            ChannelMode::SPATIAL_3D | ChannelMode::LINEAR_ROLLOFF
        }
    }

    fn doppler_scale(&self) -> f32 {
        if self.cvars.variable_value("s_doppler") != 0.0 {
            self.cvars.variable_value("s_doppler_factor")
        } else {
            0.0
        }
    }

    // ---- lifecycle ----

    pub fn s_init(
        &mut self,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) {
        info!("------- sound initialization -------");
        if self.cvars.variable_value("s_initsound") == 0.0
            || self.cvars.variable_value("s_nosound") != 0.0
        {
            info!("sound initialization skipped");
            return;
        }

        self.binaural.load(mixer);

        if let Err(e) = mixer.init(MAX_TRACKED_CHANNELS) {
            warn!("mixer init failed: {}", e);
            self.binaural = BinauralState::new();
            return;
        }
        self.sound_started = true;

        let distance_factor = if self.binaural.available {
            1.0
        } else {
            crate::sound_types::QU_PER_METER
        };
        if let Err(e) = mixer.set_3d_settings(self.doppler_scale(), distance_factor, 1.0) {
            warn!("set 3D settings failed: {}", e);
        }

        let out = mixer.output_info();
        info!("sound system initialized");
        info!("  Output : {}", out.output);
        info!(
            "  Driver : {}",
            if out.driver.is_empty() { "(none)" } else { out.driver.as_str() }
        );
        info!(
            "  Doppler: {} (factor {:.2})",
            if self.cvars.variable_value("s_doppler") != 0.0 { "on" } else { "off" },
            self.cvars.variable_value("s_doppler_factor")
        );

        self.update_externalizer(mixer);

        let water = self.s_precache_sound("ambience/water1.wav", mixer, load_file);
        self.ambient.bind(AMBIENT_WATER, water);
        let sky = self.s_precache_sound("ambience/wind2.wav", mixer, load_file);
        self.ambient.bind(AMBIENT_SKY, sky);

        self.s_stop_all_sounds(mixer);
    }

    pub fn s_shutdown(&mut self, mixer: &mut dyn Mixer) {
        if !self.sound_started {
            return;
        }
        self.pool.release_all(mixer);
        self.ambient.stop_all(mixer);
        self.ambient = AmbientState::new();
        self.registry.clear(mixer);
        self.binaural.unload(mixer);
        mixer.shutdown();
        self.sound_started = false;
        info!("sound system shut down");
    }

    pub fn s_restart(
        &mut self,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) {
        self.s_shutdown(mixer);
        self.s_init(mixer, load_file);
    }

    // ---- registration ----

    /// Intern a sound and, unless precaching is disabled, load it now.
    pub fn s_precache_sound(
        &mut self,
        name: &str,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> Option<usize> {
        if !self.sound_started || self.cvars.variable_value("s_nosound") != 0.0 {
            return None;
        }
        let sfx_index = self.registry.find_name(name)?;
        if self.cvars.variable_value("s_precache") != 0.0 {
            let mode = self.load_mode();
            self.registry.ensure_loaded(sfx_index, mode, mixer, load_file);
        }
        Some(sfx_index)
    }

    /// Intern a sound without loading it.
    pub fn s_touch_sound(&mut self, name: &str) {
        if !self.sound_started {
            return;
        }
        self.registry.find_name(name);
    }

    // ---- play requests ----

    /// Start a tracked sound. A nonzero `entchannel` first stops whatever
    /// that entity was playing on it. Returns false when the sound did not
    /// start; callers must not care beyond that.
    pub fn s_start_sound(
        &mut self,
        entnum: i32,
        entchannel: i32,
        sfx_index: usize,
        origin: &Vec3,
        fvol: f32,
        attenuation: f32,
        mixer: &mut dyn Mixer,
        get_entity_origin: &dyn Fn(i32) -> Vec3,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> bool {
        if entchannel < 0 {
            panic!("s_start_sound: entchannel < 0");
        }
        if !self.sound_started || self.cvars.variable_value("s_nosound") != 0.0 {
            return false;
        }
        let mode = self.load_mode();
        let sound = match self.registry.ensure_loaded(sfx_index, mode, mixer, load_file) {
            Some(sound) => sound,
            None => return false,
        };

        // One sound at a time per (entity, sub-channel).
        if entchannel != 0 {
            self.pool.release_matching(entnum, entchannel, mixer);
        }

        let slot_index = match self.pool.alloc(mixer) {
            Some(slot_index) => slot_index,
            None => {
                debug!("no channel slot for entity {} channel {}", entnum, entchannel);
                return false;
            }
        };

        let channel = match mixer.play_sound(sound) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("start sound {} failed: {}", sfx_index, e);
                return false;
            }
        };

        let origin_offset = if valid_entity(entnum) && entnum != self.local_entnum {
            vector_subtract(origin, &get_entity_origin(entnum))
        } else {
            [0.0; 3]
        };
        self.pool.slots[slot_index] = TrackedChannel {
            channel: Some(channel),
            spatializer: None,
            entnum,
            entchannel,
            sfx_index: Some(sfx_index),
            is_static: false,
            origin: *origin,
            prev_origin: *origin,
            origin_offset,
            have_prev_origin: false,
        };

        if entnum == self.local_entnum || attenuation <= 0.0 {
            if let Err(e) = mixer.set_mode(channel, ChannelMode::empty()) {
                warn!("start sound set 2D failed: {}", e);
            }
        } else {
            let min_dist = MIN_3D_DIST;
            let mut max_dist = NOMINAL_CLIP_DIST / attenuation;
            if max_dist < min_dist {
                max_dist = min_dist + 1.0;
            }
            if self.binaural.available {
                self.binaural.attach_spatializer(
                    &mut self.pool.slots[slot_index],
                    mixer,
                    origin,
                    min_dist,
                    max_dist,
                    &self.listener_sp,
                );
            } else {
                if let Err(e) = mixer.set_3d_attributes(channel, origin, &[0.0; 3]) {
                    warn!("start sound 3D attributes failed: {}", e);
                }
                if let Err(e) = mixer.set_3d_min_max_distance(channel, min_dist, max_dist) {
                    warn!("start sound 3D distance failed: {}", e);
                }
            }
        }

        if let Err(e) = mixer.set_volume(channel, fvol) {
            warn!("start sound volume failed: {}", e);
        }
        if let Err(e) = mixer.set_paused(channel, false) {
            warn!("start sound unpause failed: {}", e);
        }
        true
    }

    /// Start a looping world-anchored emitter, tied to no entity.
    /// `vol` is on the 0..255 scale.
    pub fn s_static_sound(
        &mut self,
        sfx_index: usize,
        origin: &Vec3,
        vol: f32,
        attenuation: f32,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> bool {
        if !self.sound_started || self.cvars.variable_value("s_nosound") != 0.0 {
            return false;
        }
        let mode = self.load_mode();
        let sound = match self.registry.ensure_loaded(sfx_index, mode, mixer, load_file) {
            Some(sound) => sound,
            None => return false,
        };

        let slot_index = match self.pool.alloc(mixer) {
            Some(slot_index) => slot_index,
            None => {
                debug!("no channel slot for static sound {}", sfx_index);
                return false;
            }
        };

        let channel = match mixer.play_sound(sound) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("static sound {} failed: {}", sfx_index, e);
                return false;
            }
        };

        self.pool.slots[slot_index] = TrackedChannel {
            channel: Some(channel),
            spatializer: None,
            entnum: 0,
            entchannel: 0,
            sfx_index: Some(sfx_index),
            is_static: true,
            origin: *origin,
            prev_origin: *origin,
            origin_offset: [0.0; 3],
            have_prev_origin: true,
        };

        let min_dist = MIN_3D_DIST;
        let max_dist = if attenuation > 0.0 {
            let d = (NOMINAL_CLIP_DIST * STATIC_ATTEN_DIV) / attenuation;
            if d < min_dist {
                min_dist + 1.0
            } else {
                d
            }
        } else {
            100000.0 // essentially infinite
        };

        if self.binaural.available {
            if let Err(e) = mixer.set_mode(channel, ChannelMode::LOOPING) {
                warn!("static sound set mode failed: {}", e);
            }
            if let Err(e) = mixer.set_loop_count(channel, -1) {
                warn!("static sound loop count failed: {}", e);
            }
            self.binaural.attach_spatializer(
                &mut self.pool.slots[slot_index],
                mixer,
                origin,
                min_dist,
                max_dist,
                &self.listener_sp,
            );
        } else {
            let mode =
                ChannelMode::SPATIAL_3D | ChannelMode::LINEAR_ROLLOFF | ChannelMode::LOOPING;
            if let Err(e) = mixer.set_mode(channel, mode) {
                warn!("static sound set mode failed: {}", e);
            }
            if let Err(e) = mixer.set_loop_count(channel, -1) {
                warn!("static sound loop count failed: {}", e);
            }
            if let Err(e) = mixer.set_3d_attributes(channel, origin, &[0.0; 3]) {
                warn!("static sound 3D attributes failed: {}", e);
            }
            if let Err(e) = mixer.set_3d_min_max_distance(channel, min_dist, max_dist) {
                warn!("static sound 3D distance failed: {}", e);
            }
        }

        if let Err(e) = mixer.set_volume(channel, vol / 255.0) {
            warn!("static sound volume failed: {}", e);
        }
        if let Err(e) = mixer.set_paused(channel, false) {
            warn!("static sound unpause failed: {}", e);
        }
        true
    }

    /// Play a UI / menu sound: 2D, untracked, full volume.
    pub fn s_local_sound(
        &mut self,
        name: &str,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) {
        if !self.sound_started || self.cvars.variable_value("s_nosound") != 0.0 {
            return;
        }
        let sfx_index = match self.registry.find_name(name) {
            Some(sfx_index) => sfx_index,
            None => {
                warn!("local sound: can't cache {}", name);
                return;
            }
        };
        let mode = self.load_mode();
        let sound = match self.registry.ensure_loaded(sfx_index, mode, mixer, load_file) {
            Some(sound) => sound,
            None => return,
        };
        let channel = match mixer.play_sound(sound) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("local sound {} failed: {}", name, e);
                return;
            }
        };
        if let Err(e) = mixer.set_mode(channel, ChannelMode::empty()) {
            warn!("local sound set 2D failed: {}", e);
        }
        if let Err(e) = mixer.set_volume(channel, 1.0) {
            warn!("local sound volume failed: {}", e);
        }
        if let Err(e) = mixer.set_paused(channel, false) {
            warn!("local sound unpause failed: {}", e);
        }
    }

    /// Console-style helper: play a named sound 2D with a synthetic
    /// source entity. Appends ".wav" when no extension is given.
    pub fn s_play_name(
        &mut self,
        name: &str,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) {
        if !self.sound_started || self.cvars.variable_value("s_nosound") != 0.0 {
            return;
        }
        let full = if name.contains('.') {
            name.to_string()
        } else {
            format!("{}.wav", name)
        };
        let sfx_index = match self.registry.find_name(&full) {
            Some(sfx_index) => sfx_index,
            None => return,
        };
        let entnum = self.play_hash;
        self.play_hash += 1;
        let origin = self.listener.origin;
        self.s_start_sound(
            entnum,
            0,
            sfx_index,
            &origin,
            1.0,
            0.0,
            mixer,
            &|_| [0.0; 3],
            load_file,
        );
    }

    // ---- stop requests ----

    /// Stop whatever (entnum, entchannel) is playing;
    /// `ENTCHANNEL_ANY` stops all of the entity's sounds. Unknown sources
    /// are a no-op.
    pub fn s_stop_sound(&mut self, entnum: i32, entchannel: i32, mixer: &mut dyn Mixer) {
        if !self.sound_started {
            return;
        }
        self.pool.release_matching(entnum, entchannel, mixer);
    }

    pub fn s_stop_all_sounds(&mut self, mixer: &mut dyn Mixer) {
        if !self.sound_started {
            return;
        }
        self.pool.release_all(mixer);
        self.ambient.stop_all(mixer);
    }

    // ---- per-frame update ----

    pub fn s_update(
        &mut self,
        frame: &UpdateFrame,
        mixer: &mut dyn Mixer,
        load_file: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) {
        if !self.sound_started || self.snd_blocked > 0 {
            return;
        }
        self.local_entnum = frame.local_entnum;

        let velocity = if frame.active { frame.velocity } else { [0.0; 3] };
        self.listener = ListenerState {
            origin: frame.origin,
            forward: frame.forward,
            right: frame.right,
            up: frame.up,
            velocity,
        };
        if self.binaural.available {
            self.listener_sp =
                spatializer_listener(&frame.origin, &velocity, &frame.forward, &frame.up);
        }

        let mut forward = frame.forward;
        let mut up = frame.up;
        sanitize_basis(&mut forward, &mut up);
        if let Err(e) = mixer.set_listener(&frame.origin, &velocity, &forward, &up) {
            warn!("set listener failed: {}", e);
        }
        if let Err(e) =
            mixer.set_3d_settings(self.doppler_scale(), crate::sound_types::QU_PER_METER, 1.0)
        {
            warn!("set 3D settings failed: {}", e);
        }
        if let Err(e) = mixer.set_master_volume(self.cvars.variable_value("s_volume")) {
            warn!("master volume failed: {}", e);
        }

        let load_mode = self.load_mode();
        self.ambient.update(
            mixer,
            &mut self.registry,
            load_file,
            load_mode,
            frame.active,
            frame.leaf_ambient_levels,
            self.cvars.variable_value("s_ambientlevel"),
            self.cvars.variable_value("s_ambientfade"),
            frame.frametime,
        );

        update_moving_sounds(
            &mut self.pool,
            mixer,
            frame.frametime,
            frame.local_entnum,
            frame.get_entity_origin,
            &self.motion,
        );

        if self.binaural.available {
            update_spatializers(
                &mut self.pool,
                mixer,
                frame.frametime,
                &self.listener_sp,
                frame.get_entity_origin,
                &self.motion,
            );
            self.update_externalizer(mixer);
        }

        if self.cvars.variable_value("s_show") != 0.0 {
            info!("----({} channels)----", mixer.channels_playing());
        }

        mixer.flush();
    }

    /// Extra backend pump between frames; disabled by `s_noextraupdate`.
    pub fn s_extra_update(&mut self, mixer: &mut dyn Mixer) {
        if !self.sound_started
            || self.cvars.variable_value("s_noextraupdate") != 0.0
            || self.snd_blocked > 0
        {
            return;
        }
        mixer.flush();
    }

    fn update_externalizer(&mut self, mixer: &mut dyn Mixer) {
        let enabled = self.cvars.variable_value("s_externalizer") != 0.0;
        let amount = self.cvars.variable_value("s_externalizer_amount");
        let character = self.cvars.variable_value("s_externalizer_character");
        self.binaural.update_externalizer(mixer, enabled, amount, character);
    }

    // ---- focus handling ----

    /// Nested mute of the master bus, for when the host loses focus.
    pub fn s_block_sound(&mut self, mixer: &mut dyn Mixer) {
        self.snd_blocked += 1;
        if self.snd_blocked == 1 && self.sound_started {
            if let Err(e) = mixer.set_master_mute(true) {
                warn!("master mute failed: {}", e);
            }
        }
    }

    pub fn s_unblock_sound(&mut self, mixer: &mut dyn Mixer) {
        if self.snd_blocked <= 0 {
            return;
        }
        self.snd_blocked -= 1;
        if self.snd_blocked == 0 && self.sound_started {
            if let Err(e) = mixer.set_master_mute(false) {
                warn!("master unmute failed: {}", e);
            }
        }
    }

    // ---- diagnostics ----

    /// Report every interned sound and its load status.
    pub fn s_sound_list(&self, mixer: &dyn Mixer) {
        info!("--- Loaded Sounds ---");
        let mut loaded = 0;
        for sfx in self.registry.known_sfx.iter() {
            if !sfx.loaded {
                info!("  [ ] {}", sfx.name);
                continue;
            }
            match sfx.sound {
                None => info!("  [!] {} (load failed)", sfx.name),
                Some(sound) => {
                    let len_ms = mixer.sound_length_ms(sound).unwrap_or(0);
                    info!("  [*] {} ({:.1}s)", sfx.name, len_ms as f32 / 1000.0);
                    loaded += 1;
                }
            }
        }
        info!("Total: {} sounds ({} loaded)", self.registry.num_sfx(), loaded);
    }

    /// Report backend, volume, and pool occupancy.
    pub fn s_sound_info(&self, mixer: &dyn Mixer) {
        if !self.sound_started {
            info!("sound system not initialized");
            return;
        }
        let out = mixer.output_info();
        info!("Sound Info:");
        info!("  Output       : {}", out.output);
        info!("  Driver       : {}", out.driver);
        info!("  Sample rate  : {} Hz", out.sample_rate);
        info!("  Speaker ch   : {}", out.speaker_channels);
        info!("  Playing      : {}", mixer.channels_playing());
        info!("  Volume       : {:.2}", self.cvars.variable_value("s_volume"));
        info!(
            "  Doppler      : {} (factor {:.2})",
            if self.cvars.variable_value("s_doppler") != 0.0 { "on" } else { "off" },
            self.cvars.variable_value("s_doppler_factor")
        );
        info!(
            "  Channels     : {} / {} tracked",
            self.pool.in_use(),
            self.pool.capacity()
        );
        info!("  Sounds known : {}", self.registry.num_sfx());
        if self.binaural.available {
            info!(
                "  Binaural     : spatializer OK, externalizer {}",
                if self.binaural.externalizer_active() { "active" } else { "off" }
            );
        }
    }
}
