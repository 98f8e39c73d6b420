use glam::{Mat4, Vec2, Vec3};

use crate::arena::{Arena, Handle};
use crate::config::MAX_LIGHTS;
use crate::coords::{Transform2D, Transform3D};
use crate::device::{Fog, GraphicsApi, Light};
use crate::render::Resources;

use super::display_list::DisplayList;
use super::model::Model;
use super::queue::RenderQueue;

pub type ModelHandle = Handle<Model>;

/// Orthographic camera. `fov` is the visible height in world units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera2D {
    pub position: Vec2,
    pub angle: f32,
    pub fov: f32,
}

impl Default for Camera2D {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            angle: 0.0,
            fov: 1000.0,
        }
    }
}

impl Camera2D {
    pub fn camera_transform(&self) -> Transform2D {
        Transform2D::new(self.position, self.angle, Vec2::splat(self.fov))
    }
}

/// Perspective camera. `fov` is vertical, in radians; the view looks along
/// the orientation's +Z with +Y up.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera3D {
    pub transform: Transform3D,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera3D {
    fn default() -> Self {
        Self {
            transform: Transform3D::IDENTITY,
            fov: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera3D {
    pub fn projection_matrix(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov, aspect_ratio, self.near, self.far)
    }

    /// Placement matrix; the renderer reads the eye position from its
    /// translation column.
    pub fn camera_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.transform.orientation, self.transform.position)
    }

    /// Points the camera at `target` from where it stands.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.transform.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return;
        }
        let side = up.cross(forward).normalize_or_zero();
        let up = forward.cross(side);
        self.transform.orientation = glam::Quat::from_mat3(&glam::Mat3::from_cols(side, up, forward));
    }
}

/// Top-level container turning models, cameras, lights and fog into a
/// display list each frame.
#[derive(Debug, Default)]
pub struct Scene {
    pub camera_2d: Camera2D,
    pub camera_3d: Camera3D,
    pub flat_shading: bool,
    is_3d: bool,
    lights: Vec<Light>,
    fog: Option<Fog>,
    models: Arena<Model>,
    order: Vec<ModelHandle>,
    queue: RenderQueue,
    warned_lights: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_3d(&mut self, is_3d: bool) {
        self.is_3d = is_3d;
    }

    #[inline]
    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    // ── models ────────────────────────────────────────────────────────────

    /// Adds `model` on top of everything already registered.
    pub fn add_model(&mut self, model: Model) -> ModelHandle {
        let h = self.models.insert(model);
        self.order.push(h);
        h
    }

    /// Adds `model` beneath everything already registered.
    pub fn add_model_on_bottom(&mut self, model: Model) -> ModelHandle {
        let h = self.models.insert(model);
        self.order.insert(0, h);
        h
    }

    pub fn remove_model(&mut self, h: ModelHandle) -> Option<Model> {
        let model = self.models.remove(h)?;
        self.order.retain(|&o| o != h);
        Some(model)
    }

    pub fn model(&self, h: ModelHandle) -> Option<&Model> {
        self.models.get(h)
    }

    pub fn model_mut(&mut self, h: ModelHandle) -> Option<&mut Model> {
        self.models.get_mut(h)
    }

    #[inline]
    pub fn model_count(&self) -> usize {
        self.order.len()
    }

    // ── lighting ──────────────────────────────────────────────────────────

    /// Lights past `MAX_LIGHTS` are dropped with a one-time warning.
    pub fn add_light(&mut self, light: Light) {
        if self.lights.len() >= MAX_LIGHTS {
            if !self.warned_lights {
                self.warned_lights = true;
                log::warn!("scene: light limit ({MAX_LIGHTS}) reached; extra lights dropped");
            }
            return;
        }
        self.lights.push(light);
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
    }

    #[inline]
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn set_fog(&mut self, fog: Option<Fog>) {
        self.fog = fog;
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Appends this frame's ops to `list`. Instance data is uploaded through
    /// `api` on the way.
    pub fn draw(
        &mut self,
        api: &mut dyn GraphicsApi,
        res: &mut Resources,
        aspect_ratio: f32,
        list: &mut DisplayList,
    ) {
        if self.flat_shading {
            list.append_op(super::Op::FlatShading);
        } else {
            list.append_op(super::Op::SmoothShading);
        }

        if self.is_3d {
            list.set_projection_matrix(self.camera_3d.projection_matrix(aspect_ratio));
            list.set_camera_projection(self.camera_3d.camera_matrix());
            for &light in &self.lights {
                list.light(light);
            }
            if let Some(fog) = self.fog {
                list.fog(fog);
            }
        } else {
            list.set_camera_transform(self.camera_2d.camera_transform());
        }

        self.queue.start_render();
        for &h in &self.order {
            if let Some(model) = self.models.get(h) {
                model.draw(&mut self.queue, api, res);
            }
        }
        self.queue.draw(list);
        self.queue.end_render();

        list.append_op(super::Op::ClearLights);
        list.append_op(super::Op::ClearFog);
        list.set_material(res.white_material());
    }

    /// Returns GPU storage held by models and the queue's instance pool.
    pub fn release(&mut self, api: &mut dyn GraphicsApi, res: &mut Resources) {
        for (_, model) in self.models.iter() {
            model.release(api, res);
        }
        self.queue.release(api, res);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::device::RecordingApi;
    use crate::render::BufferKind;
    use crate::scene::{Fragment, Op};

    fn triangle_model(res: &mut Resources, api: &mut RecordingApi) -> Model {
        let vb = res.create_buffer(BufferKind::Static);
        res.buffer_mut(vb).set_array(api, &[Vec3::ZERO, Vec3::X, Vec3::Y]);
        let ib = res.create_buffer(BufferKind::Static);
        res.buffer_mut(ib).set_array(api, &[0u16, 1, 2]);
        let mut m = Model::new("tri");
        m.add_fragment(Fragment::new(res.white_material(), vb, ib));
        m
    }

    #[test]
    fn scene_2d_frames_with_camera_and_cleanup() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut scene = Scene::new();
        scene.add_model(triangle_model(&mut res, &mut api));

        let mut list = DisplayList::new();
        scene.draw(&mut api, &mut res, 4.0 / 3.0, &mut list);
        let ops = list.ops();
        assert_eq!(ops[0], Op::SmoothShading);
        assert_eq!(ops[1], Op::SetCameraTransform(scene.camera_2d.camera_transform()));
        assert!(ops.iter().any(|o| matches!(o, Op::TriangleListBuffer(_))));
        let tail = &ops[ops.len() - 3..];
        assert_eq!(
            tail,
            &[
                Op::ClearLights,
                Op::ClearFog,
                Op::SetMaterial(res.white_material())
            ]
        );
        assert_eq!(list.transform_balance(), 0);
    }

    #[test]
    fn scene_3d_emits_projection_lights_and_fog() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut scene = Scene::new();
        scene.set_3d(true);
        scene.add_light(Light::ambient(Color::WHITE));
        scene.set_fog(Some(Fog::linear(Color::BLACK, 10.0, 100.0)));

        let mut list = DisplayList::new();
        scene.draw(&mut api, &mut res, 1.0, &mut list);
        let ops = list.ops();
        assert!(matches!(ops[1], Op::SetProjectionMatrix(_)));
        assert!(matches!(ops[2], Op::SetCameraProjection(_)));
        assert!(matches!(ops[3], Op::Light(_)));
        assert!(matches!(ops[4], Op::Fog(_)));
    }

    #[test]
    fn lights_are_capped() {
        let mut scene = Scene::new();
        for _ in 0..MAX_LIGHTS + 3 {
            scene.add_light(Light::ambient(Color::WHITE));
        }
        assert_eq!(scene.lights().len(), MAX_LIGHTS);
    }

    #[test]
    fn bottom_models_draw_first() {
        let mut scene = Scene::new();
        let top = scene.add_model(Model::new("top"));
        let bottom = scene.add_model_on_bottom(Model::new("bottom"));
        assert_eq!(scene.order, vec![bottom, top]);
        assert_eq!(scene.remove_model(top).map(|m| m.name), Some("top".to_owned()));
        assert_eq!(scene.model_count(), 1);
    }

    #[test]
    fn look_at_faces_target() {
        let mut cam = Camera3D::default();
        cam.transform.position = Vec3::new(0.0, 0.0, -10.0);
        cam.look_at(Vec3::ZERO, Vec3::Y);
        let forward = cam.camera_matrix().z_axis.truncate();
        assert!((forward - Vec3::Z).length() < 1e-5);
    }
}
