use bevy::{input::mouse::MouseMotion, prelude::*};

/// A free flying camera for inspecting the terrain.
///
/// Activate it with `T`, then move with the arrow keys, `PageUp`/`PageDown` and the mouse.
/// `Home` and `End` decrease and increase the speed.
#[derive(Component)]
pub struct DebugCamera {
    pub active: bool,
    pub translation_speed: f32,
    pub rotation_speed: f32,
    pub acceleration: f32,
    yaw: f32,
    pitch: f32,
}

impl Default for DebugCamera {
    fn default() -> Self {
        Self {
            active: true,
            translation_speed: 100.0,
            rotation_speed: 0.2,
            acceleration: 1.03,
            yaw: -135.0_f32.to_radians(),
            pitch: -20.0_f32.to_radians(),
        }
    }
}

impl DebugCamera {
    /// The transform of a debug camera at the position, using its initial orientation.
    pub fn transform(&self, translation: Vec3) -> Transform {
        Transform::from_translation(translation).with_rotation(self.rotation())
    }

    fn rotation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }
}

pub(crate) fn debug_camera_control(
    time: Res<Time>,
    keys: Option<Res<ButtonInput<KeyCode>>>,
    mut motion_events: EventReader<MouseMotion>,
    mut cameras: Query<(&mut Transform, &mut DebugCamera)>,
) {
    let Some(keys) = keys else {
        return;
    };

    let rotation_delta = motion_events
        .read()
        .fold(Vec2::ZERO, |delta, motion| delta - motion.delta);

    for (mut transform, mut camera) in &mut cameras {
        if keys.just_pressed(KeyCode::KeyT) {
            camera.active = !camera.active;
        }
        if !camera.active {
            continue;
        }

        let mut translation_delta = Vec3::ZERO;

        if keys.pressed(KeyCode::ArrowLeft) {
            translation_delta.x -= 1.0;
        }
        if keys.pressed(KeyCode::ArrowRight) {
            translation_delta.x += 1.0;
        }
        if keys.pressed(KeyCode::PageUp) {
            translation_delta.y += 1.0;
        }
        if keys.pressed(KeyCode::PageDown) {
            translation_delta.y -= 1.0;
        }
        if keys.pressed(KeyCode::ArrowUp) {
            translation_delta.z -= 1.0;
        }
        if keys.pressed(KeyCode::ArrowDown) {
            translation_delta.z += 1.0;
        }
        if keys.pressed(KeyCode::Home) {
            camera.translation_speed /= camera.acceleration;
        }
        if keys.pressed(KeyCode::End) {
            camera.translation_speed *= camera.acceleration;
        }

        // rotation speed is in degrees per pixel of mouse motion
        camera.yaw += (rotation_delta.x * camera.rotation_speed).to_radians();
        camera.pitch = (camera.pitch + (rotation_delta.y * camera.rotation_speed).to_radians())
            .clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
        transform.rotation = camera.rotation();

        let velocity =
            transform.rotation * translation_delta.normalize_or_zero() * camera.translation_speed;
        transform.translation += velocity * time.delta_secs();
    }
}
