// snd_spatial.rs — per-frame spatial state for the listener and every
// tracked channel
//
// Positions flow in world units; the alternate spatializer wants meters
// in its own axis convention (x right, y up, z forward), so everything
// crossing that boundary goes through the conversion helpers here.

use log::warn;
use qwsound_common::math::{
    cross_product, dot_product, vector_add, vector_scale, vector_subtract, Vec3,
};
use rayon::prelude::*;

use crate::mixer::{Attributes3d, ChannelMode, Dsp3dAttributes, Mixer};
use crate::snd_channels::ChannelPool;
use crate::sound_types::{
    valid_entity, MAX_SOUND_VELOCITY_QU, QU_PER_METER, TELEPORT_DIST_QU,
};

/// Canonical orientation substituted for a degenerate listener pose,
/// expressed in spatializer space (+Z forward, +Y up).
pub const DEFAULT_FORWARD: Vec3 = [0.0, 0.0, 1.0];
pub const DEFAULT_UP: Vec3 = [0.0, 1.0, 0.0];

/// Current listener pose in world units.
#[derive(Clone, Copy, Default)]
pub struct ListenerState {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub velocity: Vec3,
}

/// Listener pose re-expressed for the spatializer plugin: meters, plugin
/// axes, with the derived right axis cached for relative projections.
#[derive(Clone, Copy, Default)]
pub struct SpatializerListener {
    pub attrs: Attributes3d,
    pub right: Vec3,
}

/// Tuned motion thresholds; defaults preserved from the engine they were
/// tuned in.
#[derive(Clone, Copy)]
pub struct MotionParams {
    /// Displacement beyond this in one frame is a teleport.
    pub teleport_dist: f32,
    /// Estimated speeds are clamped here, preserving direction.
    pub max_speed: f32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            teleport_dist: TELEPORT_DIST_QU,
            max_speed: MAX_SOUND_VELOCITY_QU,
        }
    }
}

/// Normalize in place; false when the vector is too short to carry a
/// direction.
pub fn normalize_in_place(v: &mut Vec3) -> bool {
    let len_sq = dot_product(v, v);
    if len_sq < 1e-6 {
        return false;
    }
    let inv = 1.0 / len_sq.sqrt();
    v[0] *= inv;
    v[1] *= inv;
    v[2] *= inv;
    true
}

/// Normalize `forward` and `up`, falling back to the canonical default
/// orientation when either is degenerate, then Gram–Schmidt `up` against
/// `forward`.
pub fn sanitize_basis(forward: &mut Vec3, up: &mut Vec3) {
    if !normalize_in_place(forward) || !normalize_in_place(up) {
        *forward = DEFAULT_FORWARD;
        *up = DEFAULT_UP;
        return;
    }
    let dot = dot_product(forward, up);
    up[0] -= dot * forward[0];
    up[1] -= dot * forward[1];
    up[2] -= dot * forward[2];
    normalize_in_place(up);
}

#[inline]
pub fn to_spatializer_pos(q: &Vec3) -> Vec3 {
    let s = 1.0 / QU_PER_METER;
    [-q[1] * s, q[2] * s, q[0] * s]
}

#[inline]
pub fn to_spatializer_vel(q: &Vec3) -> Vec3 {
    to_spatializer_pos(q)
}

#[inline]
pub fn to_spatializer_dir(q: &Vec3) -> Vec3 {
    [-q[1], q[2], q[0]]
}

/// Build the spatializer-space listener from the world-unit pose.
pub fn spatializer_listener(
    origin: &Vec3,
    velocity: &Vec3,
    forward: &Vec3,
    up: &Vec3,
) -> SpatializerListener {
    let mut fwd = to_spatializer_dir(forward);
    let mut upv = to_spatializer_dir(up);
    sanitize_basis(&mut fwd, &mut upv);
    let right = cross_product(&upv, &fwd);
    SpatializerListener {
        attrs: Attributes3d {
            position: to_spatializer_pos(origin),
            velocity: to_spatializer_vel(velocity),
            forward: fwd,
            up: upv,
        },
        right,
    }
}

/// Re-express an absolute spatializer-space pose in the listener's own
/// right/up/forward basis. The relative half always reports the canonical
/// forward/up.
pub fn relative_attributes(
    abs_pos: &Vec3,
    abs_vel: &Vec3,
    listener: &SpatializerListener,
) -> Attributes3d {
    let delta = vector_subtract(abs_pos, &listener.attrs.position);
    let vdelta = vector_subtract(abs_vel, &listener.attrs.velocity);
    Attributes3d {
        position: [
            dot_product(&delta, &listener.right),
            dot_product(&delta, &listener.attrs.up),
            dot_product(&delta, &listener.attrs.forward),
        ],
        velocity: [
            dot_product(&vdelta, &listener.right),
            dot_product(&vdelta, &listener.attrs.up),
            dot_product(&vdelta, &listener.attrs.forward),
        ],
        forward: DEFAULT_FORWARD,
        up: DEFAULT_UP,
    }
}

/// One frame of velocity estimation for a channel that moved from
/// `prev_origin` to `cur_origin`. Returns the velocity and whether the
/// previous-position flag survives: a displacement past the teleport
/// threshold is a discontinuity, so the estimate is zeroed and the next
/// frame starts over without a previous position.
pub fn estimate_velocity(
    cur_origin: &Vec3,
    prev_origin: &Vec3,
    have_prev: bool,
    frametime: f32,
    motion: &MotionParams,
) -> (Vec3, bool) {
    if !have_prev || frametime <= 0.0 {
        return ([0.0; 3], true);
    }
    let movement = vector_subtract(cur_origin, prev_origin);
    let dist_sq = dot_product(&movement, &movement);
    if dist_sq > motion.teleport_dist * motion.teleport_dist {
        return ([0.0; 3], false);
    }
    let mut vel = vector_scale(&movement, 1.0 / frametime);
    let speed_sq = dot_product(&vel, &vel);
    if speed_sq > motion.max_speed * motion.max_speed {
        let scale = motion.max_speed / speed_sq.sqrt();
        vel = vector_scale(&vel, scale);
    }
    (vel, true)
}

/// Spatial snapshot taken sequentially, resolved in parallel.
struct MotionSnapshot {
    slot: usize,
    cur_origin: Vec3,
    prev_origin: Vec3,
    have_prev: bool,
}

struct MotionResult {
    slot: usize,
    origin: Vec3,
    velocity: Vec3,
    have_prev: bool,
}

fn resolve_motion(
    snapshots: Vec<MotionSnapshot>,
    frametime: f32,
    motion: &MotionParams,
) -> Vec<MotionResult> {
    snapshots
        .par_iter()
        .map(|s| {
            let (velocity, have_prev) =
                estimate_velocity(&s.cur_origin, &s.prev_origin, s.have_prev, frametime, motion);
            MotionResult {
                slot: s.slot,
                origin: s.cur_origin,
                velocity,
                have_prev,
            }
        })
        .collect()
}

fn store_motion(pool: &mut ChannelPool, r: &MotionResult) {
    let slot = &mut pool.slots[r.slot];
    slot.origin = r.origin;
    slot.prev_origin = r.origin;
    slot.have_prev_origin = r.have_prev;
}

/// Per-frame sweep over channels using the built-in 3D panner: recompute
/// entity-bound positions, estimate velocities, push 3D attributes, and
/// free any slot whose channel has stopped.
pub fn update_moving_sounds(
    pool: &mut ChannelPool,
    mixer: &mut dyn Mixer,
    frametime: f32,
    local_entnum: i32,
    get_entity_origin: &dyn Fn(i32) -> Vec3,
    motion: &MotionParams,
) {
    // Phase 1, sequential: poll the backend, reclaim dead slots, snapshot
    // the movers.
    let mut snapshots = Vec::new();
    for i in 0..pool.slots.len() {
        let channel = match pool.slots[i].channel {
            Some(channel) => channel,
            None => continue,
        };
        if pool.slots[i].spatializer.is_some() {
            continue; // owned by the spatializer sweep
        }
        if !mixer.is_playing(channel) {
            pool.release_slot(i, mixer);
            continue;
        }
        let slot = &pool.slots[i];
        if slot.is_static {
            continue;
        }
        if !valid_entity(slot.entnum) || slot.entnum == local_entnum {
            continue;
        }
        match mixer.mode(channel) {
            Ok(mode) if mode.contains(ChannelMode::SPATIAL_3D) => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("channel mode query failed: {}", e);
                continue;
            }
        }
        let cur_origin = vector_add(&get_entity_origin(slot.entnum), &slot.origin_offset);
        snapshots.push(MotionSnapshot {
            slot: i,
            cur_origin,
            prev_origin: slot.prev_origin,
            have_prev: slot.have_prev_origin,
        });
    }

    // Phase 2, parallel: pure velocity math over the snapshot.
    let results = resolve_motion(snapshots, frametime, motion);

    // Phase 3, sequential: write back and push to the backend.
    for r in &results {
        store_motion(pool, r);
        if let Some(channel) = pool.slots[r.slot].channel {
            if let Err(e) = mixer.set_3d_attributes(channel, &r.origin, &r.velocity) {
                warn!("update of 3D sound failed: {}", e);
            }
        }
    }
}

/// Per-frame sweep over channels routed through spatializer DSPs: same
/// motion estimation, but attributes go to the DSP parameter block in
/// spatializer units, absolute plus listener-relative.
pub fn update_spatializers(
    pool: &mut ChannelPool,
    mixer: &mut dyn Mixer,
    frametime: f32,
    listener: &SpatializerListener,
    get_entity_origin: &dyn Fn(i32) -> Vec3,
    motion: &MotionParams,
) {
    let mut snapshots = Vec::new();
    for i in 0..pool.slots.len() {
        let channel = match pool.slots[i].channel {
            Some(channel) => channel,
            None => continue,
        };
        if pool.slots[i].spatializer.is_none() {
            continue;
        }
        if !mixer.is_playing(channel) {
            pool.release_slot(i, mixer);
            continue;
        }
        let slot = &pool.slots[i];
        let cur_origin = if !slot.is_static && valid_entity(slot.entnum) {
            vector_add(&get_entity_origin(slot.entnum), &slot.origin_offset)
        } else {
            slot.origin
        };
        snapshots.push(MotionSnapshot {
            slot: i,
            cur_origin,
            prev_origin: slot.prev_origin,
            have_prev: slot.have_prev_origin,
        });
    }

    let results = resolve_motion(snapshots, frametime, motion);

    for r in &results {
        store_motion(pool, r);
        let slot = &pool.slots[r.slot];
        if let Some(dsp) = slot.spatializer {
            let absolute = Attributes3d {
                position: to_spatializer_pos(&r.origin),
                velocity: to_spatializer_vel(&r.velocity),
                forward: DEFAULT_FORWARD,
                up: DEFAULT_UP,
            };
            let attrs = Dsp3dAttributes {
                absolute,
                relative: relative_attributes(&absolute.position, &absolute.velocity, listener),
            };
            if let Err(e) = mixer.set_dsp_3d_attributes(dsp, &attrs) {
                warn!("spatializer 3D attribute update failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::mock::MockMixer;
    use crate::snd_channels::TrackedChannel;
    use qwsound_common::math::vector_length;

    const EPS: f32 = 1e-4;

    fn assert_vec3_near(a: &Vec3, b: &Vec3) {
        for i in 0..3 {
            assert!(
                (a[i] - b[i]).abs() < EPS,
                "component {}: {:?} vs {:?}",
                i,
                a,
                b
            );
        }
    }

    // ========== Listener basis ==========

    #[test]
    fn sanitize_basis_substitutes_default_for_degenerate_forward() {
        let mut fwd = [0.0, 0.0, 0.0];
        let mut up = [0.0, 1.0, 0.0];
        sanitize_basis(&mut fwd, &mut up);
        assert_eq!(fwd, DEFAULT_FORWARD);
        assert_eq!(up, DEFAULT_UP);
    }

    #[test]
    fn sanitize_basis_orthogonalizes_up_against_forward() {
        let mut fwd = [2.0, 0.0, 0.0];
        let mut up = [1.0, 1.0, 0.0];
        sanitize_basis(&mut fwd, &mut up);
        assert_vec3_near(&fwd, &[1.0, 0.0, 0.0]);
        assert_vec3_near(&up, &[0.0, 1.0, 0.0]);
        assert!(dot_product(&fwd, &up).abs() < EPS);
    }

    #[test]
    fn spatializer_listener_right_is_up_cross_forward() {
        // Facing world +x with world +z up.
        let l = spatializer_listener(
            &[0.0; 3],
            &[0.0; 3],
            &[1.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0],
        );
        // +x world forward maps to +z spatializer space.
        assert_vec3_near(&l.attrs.forward, &[0.0, 0.0, 1.0]);
        assert_vec3_near(&l.attrs.up, &[0.0, 1.0, 0.0]);
        assert_vec3_near(&l.right, &[1.0, 0.0, 0.0]);
    }

    // ========== Unit and axis conversion ==========

    #[test]
    fn spatializer_position_remaps_axes_and_scales_to_meters() {
        let p = to_spatializer_pos(&[QU_PER_METER, 2.0 * QU_PER_METER, -3.0 * QU_PER_METER]);
        assert_vec3_near(&p, &[-2.0, -3.0, 1.0]);
    }

    #[test]
    fn relative_attributes_projects_onto_listener_basis() {
        // Listener at origin of spatializer space, canonical basis.
        let listener = SpatializerListener {
            attrs: Attributes3d {
                position: [0.0; 3],
                velocity: [0.0; 3],
                forward: DEFAULT_FORWARD,
                up: DEFAULT_UP,
            },
            right: cross_product(&DEFAULT_UP, &DEFAULT_FORWARD),
        };
        let rel = relative_attributes(&[1.0, 2.0, 3.0], &[0.0, 0.0, -1.0], &listener);
        assert_vec3_near(&rel.position, &[1.0, 2.0, 3.0]);
        assert_vec3_near(&rel.velocity, &[0.0, 0.0, -1.0]);
        assert_eq!(rel.forward, DEFAULT_FORWARD);
        assert_eq!(rel.up, DEFAULT_UP);
    }

    #[test]
    fn relative_attributes_shifts_by_listener_position() {
        let listener = SpatializerListener {
            attrs: Attributes3d {
                position: [10.0, 0.0, 0.0],
                velocity: [0.0; 3],
                forward: DEFAULT_FORWARD,
                up: DEFAULT_UP,
            },
            right: cross_product(&DEFAULT_UP, &DEFAULT_FORWARD),
        };
        let rel = relative_attributes(&[10.0, 0.0, 5.0], &[0.0; 3], &listener);
        assert_vec3_near(&rel.position, &[0.0, 0.0, 5.0]);
    }

    // ========== Velocity estimation ==========

    #[test]
    fn velocity_is_displacement_over_dt() {
        let motion = MotionParams::default();
        let (vel, have_prev) =
            estimate_velocity(&[10.0, 0.0, 0.0], &[0.0; 3], true, 0.1, &motion);
        assert_vec3_near(&vel, &[100.0, 0.0, 0.0]);
        assert!(have_prev);
    }

    #[test]
    fn no_previous_position_yields_zero_velocity() {
        let motion = MotionParams::default();
        let (vel, have_prev) =
            estimate_velocity(&[10.0, 0.0, 0.0], &[0.0; 3], false, 0.1, &motion);
        assert_eq!(vel, [0.0; 3]);
        assert!(have_prev);
    }

    #[test]
    fn zero_dt_yields_zero_velocity() {
        let motion = MotionParams::default();
        let (vel, _) = estimate_velocity(&[10.0, 0.0, 0.0], &[0.0; 3], true, 0.0, &motion);
        assert_eq!(vel, [0.0; 3]);
    }

    #[test]
    fn teleport_zeroes_velocity_and_drops_prev_for_two_frames() {
        let motion = MotionParams::default();
        let p0 = [0.0; 3];
        let p1 = [motion.teleport_dist + 1.0, 0.0, 0.0];

        // Teleport frame: zero velocity, previous position dropped.
        let (vel, have_prev) = estimate_velocity(&p1, &p0, true, 0.016, &motion);
        assert_eq!(vel, [0.0; 3]);
        assert!(!have_prev);

        // Next frame runs without a previous position: still zero.
        let (vel, have_prev) = estimate_velocity(&p1, &p1, have_prev, 0.016, &motion);
        assert_eq!(vel, [0.0; 3]);
        assert!(have_prev);
    }

    #[test]
    fn speed_clamp_preserves_direction() {
        let motion = MotionParams::default();
        // 600 units in 0.1s along (3,4,0) => 6000 u/s, over the clamp.
        let (vel, _) = estimate_velocity(&[360.0, 480.0, 0.0], &[0.0; 3], true, 0.1, &motion);
        let speed = vector_length(&vel);
        assert!((speed - motion.max_speed).abs() < 0.1);
        let mut dir = vel;
        normalize_in_place(&mut dir);
        assert_vec3_near(&dir, &[0.6, 0.8, 0.0]);
    }

    #[test]
    fn speed_at_clamp_boundary_is_untouched() {
        let motion = MotionParams {
            teleport_dist: 1000.0,
            max_speed: 100.0,
        };
        let (vel, _) = estimate_velocity(&[10.0, 0.0, 0.0], &[0.0; 3], true, 0.1, &motion);
        assert_vec3_near(&vel, &[100.0, 0.0, 0.0]);
    }

    // ========== Moving-sound sweep ==========

    fn tracked_3d(mixer: &mut MockMixer, entnum: i32) -> TrackedChannel {
        let sound = mixer.create_sound(&[0u8; 4], ChannelMode::SPATIAL_3D).unwrap();
        let channel = mixer.play_sound(sound).unwrap();
        TrackedChannel {
            channel: Some(channel),
            entnum,
            entchannel: 1,
            ..TrackedChannel::default()
        }
    }

    #[test]
    fn moving_sweep_tracks_entity_and_offset() {
        let mut pool = ChannelPool::with_capacity(4);
        let mut mixer = MockMixer::new();
        let mut slot = tracked_3d(&mut mixer, 7);
        slot.origin_offset = [0.0, 0.0, 8.0];
        let channel = slot.channel.unwrap();
        pool.slots[0] = slot;

        let lookup = |entnum: i32| -> Vec3 {
            assert_eq!(entnum, 7);
            [100.0, 50.0, 0.0]
        };
        update_moving_sounds(&mut pool, &mut mixer, 0.05, 1, &lookup, &MotionParams::default());

        assert_vec3_near(&pool.slots[0].origin, &[100.0, 50.0, 8.0]);
        assert_vec3_near(&mixer.channel(channel).position, &[100.0, 50.0, 8.0]);
        // First frame after attachment carries no velocity.
        assert_eq!(mixer.channel(channel).velocity, [0.0; 3]);
        assert!(pool.slots[0].have_prev_origin);
    }

    #[test]
    fn moving_sweep_derives_velocity_on_second_frame() {
        let mut pool = ChannelPool::with_capacity(4);
        let mut mixer = MockMixer::new();
        let slot = tracked_3d(&mut mixer, 7);
        let channel = slot.channel.unwrap();
        pool.slots[0] = slot;

        let origin = std::cell::Cell::new([0.0f32, 0.0, 0.0]);
        let lookup = |_: i32| origin.get();
        update_moving_sounds(&mut pool, &mut mixer, 0.1, 1, &lookup, &MotionParams::default());
        origin.set([20.0, 0.0, 0.0]);
        update_moving_sounds(&mut pool, &mut mixer, 0.1, 1, &lookup, &MotionParams::default());

        assert_vec3_near(&mixer.channel(channel).velocity, &[200.0, 0.0, 0.0]);
    }

    #[test]
    fn moving_sweep_skips_static_local_and_2d_channels() {
        let mut pool = ChannelPool::with_capacity(8);
        let mut mixer = MockMixer::new();

        let mut stat = tracked_3d(&mut mixer, 0);
        stat.is_static = true;
        stat.origin = [5.0, 5.0, 5.0];
        let static_ch = stat.channel.unwrap();
        pool.slots[0] = stat;

        let local = tracked_3d(&mut mixer, 1);
        let local_ch = local.channel.unwrap();
        pool.slots[1] = local;

        let sound2d = mixer.create_sound(&[0u8; 4], ChannelMode::empty()).unwrap();
        let ch2d = mixer.play_sound(sound2d).unwrap();
        pool.slots[2] = TrackedChannel {
            channel: Some(ch2d),
            entnum: 9,
            ..TrackedChannel::default()
        };

        let lookup = |_: i32| -> Vec3 { [999.0, 999.0, 999.0] };
        update_moving_sounds(&mut pool, &mut mixer, 0.05, 1, &lookup, &MotionParams::default());

        assert_eq!(mixer.channel(static_ch).position, [0.0; 3]);
        assert_eq!(mixer.channel(local_ch).position, [0.0; 3]);
        assert_eq!(mixer.channel(ch2d).position, [0.0; 3]);
        assert_vec3_near(&pool.slots[0].origin, &[5.0, 5.0, 5.0]);
    }

    #[test]
    fn moving_sweep_reclaims_stopped_channels() {
        let mut pool = ChannelPool::with_capacity(4);
        let mut mixer = MockMixer::new();
        let slot = tracked_3d(&mut mixer, 7);
        let channel = slot.channel.unwrap();
        pool.slots[0] = slot;
        mixer.finish_channel(channel);

        let lookup = |_: i32| -> Vec3 { [0.0; 3] };
        update_moving_sounds(&mut pool, &mut mixer, 0.05, 1, &lookup, &MotionParams::default());
        assert!(pool.slots[0].channel.is_none());
    }

    // ========== Spatializer sweep ==========

    #[test]
    fn spatializer_sweep_pushes_absolute_and_relative_attributes() {
        let mut pool = ChannelPool::with_capacity(4);
        let mut mixer = MockMixer::with_plugin();
        let mut slot = tracked_3d(&mut mixer, 7);
        let dsp = mixer
            .create_plugin_dsp(crate::mixer::mock::MOCK_PLUGIN_SPATIALIZER)
            .unwrap();
        slot.spatializer = Some(dsp);
        pool.slots[0] = slot;

        let listener = spatializer_listener(
            &[0.0; 3],
            &[0.0; 3],
            &[1.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0],
        );
        let lookup = |_: i32| -> Vec3 { [QU_PER_METER, 0.0, 0.0] };
        update_spatializers(
            &mut pool,
            &mut mixer,
            0.05,
            &listener,
            &lookup,
            &MotionParams::default(),
        );

        let attrs = mixer.dsp(dsp).attrs.expect("attributes pushed");
        // One meter ahead along world +x => one meter along spatializer +z.
        assert_vec3_near(&attrs.absolute.position, &[0.0, 0.0, 1.0]);
        assert_vec3_near(&attrs.relative.position, &[0.0, 0.0, 1.0]);
        assert_eq!(attrs.relative.forward, DEFAULT_FORWARD);
    }

    #[test]
    fn spatializer_sweep_releases_dsp_of_stopped_channel() {
        let mut pool = ChannelPool::with_capacity(4);
        let mut mixer = MockMixer::with_plugin();
        let mut slot = tracked_3d(&mut mixer, 7);
        let channel = slot.channel.unwrap();
        let dsp = mixer
            .create_plugin_dsp(crate::mixer::mock::MOCK_PLUGIN_SPATIALIZER)
            .unwrap();
        slot.spatializer = Some(dsp);
        pool.slots[0] = slot;
        mixer.finish_channel(channel);

        let listener = SpatializerListener::default();
        let lookup = |_: i32| -> Vec3 { [0.0; 3] };
        update_spatializers(
            &mut pool,
            &mut mixer,
            0.05,
            &listener,
            &lookup,
            &MotionParams::default(),
        );
        assert!(pool.slots[0].channel.is_none());
        assert!(pool.slots[0].spatializer.is_none());
        assert!(mixer.dsp(dsp).released);
    }
}
