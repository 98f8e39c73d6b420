use glam::{Mat4, Vec2, Vec3};
use strata_engine::config::{RendererSettings, ScreenInfo};
use strata_engine::coords::{Color, Transform3D};
use strata_engine::device::gpu::{DeviceInit, WgpuApi};
use strata_engine::device::{
    ApiCall, Capability, CullFace, GraphicsApi, Light, ReadbackStatus, RecordingApi,
};
use strata_engine::render::{Material, Renderer, Resources, VertexPCNT};
use strata_engine::scene::{DisplayList, MeshWriter, Model, Scene, load_model};

fn quad_vertices() -> Vec<VertexPCNT> {
    [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]
        .into_iter()
        .map(|[x, y]| VertexPCNT {
            position: [x, y, 0.0],
            color: Color::WHITE,
            normal: [0.0, 0.0, 1.0],
            texel: [(x + 1.0) * 0.5, (y + 1.0) * 0.5],
        })
        .collect()
}

/// Clockwise as seen from +Z, where the camera sits.
const PANEL_INDICES: [i32; 6] = [0, 2, 1, 0, 3, 2];

fn panel_mesh() -> Vec<u8> {
    MeshWriter::new()
        .begin_model("panel", &Transform3D::IDENTITY, 1)
        .fragment("panel", &quad_vertices(), &PANEL_INDICES)
        .children(0)
        .finish()
}

fn load_panel<A: GraphicsApi>(api: &mut A, res: &mut Resources) -> Model {
    res.add_material(Material::solid("panel", Color::WHITE));
    load_model(api, res, &panel_mesh()).expect("panel mesh loads")
}

fn lit_scene() -> Scene {
    let mut scene = Scene::new();
    scene.set_3d(true);
    scene.camera_3d.transform.position = Vec3::new(0.0, 0.0, 4.0);
    scene.camera_3d.look_at(Vec3::ZERO, Vec3::Y);
    scene.add_light(Light::ambient(Color::rgb(0.2, 0.2, 0.2)));
    scene.add_light(Light::directional(Vec3::NEG_Z, Color::WHITE, Color::BLACK));
    scene
}

fn frame<A: GraphicsApi>(r: &mut Renderer<A>, scene: &mut Scene, res: &mut Resources) {
    r.pre_render();
    let aspect = r.aspect_ratio();
    let mut list = DisplayList::new();
    scene.draw(r.api_mut(), res, aspect, &mut list);
    r.render_display_list(&mut list, res);
    r.post_render();
}

fn element_draws(calls: &[ApiCall]) -> Vec<(u32, u32)> {
    calls
        .iter()
        .filter_map(|c| match c {
            ApiCall::DrawElements {
                count, instances, ..
            } => Some((*count, *instances)),
            _ => None,
        })
        .collect()
}

#[test]
fn loaded_mesh_draws_its_indices() {
    let mut api = RecordingApi::new();
    let mut res = Resources::new();
    let model = load_panel(&mut api, &mut res);

    let f = &model.fragments()[0];
    assert_eq!(res.buffer(f.vertices).position_count(), 4);
    assert_eq!(res.buffer(f.indices).index_count(), 6);

    let mut scene = lit_scene();
    scene.add_model(model);
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(640, 480));
    frame(&mut r, &mut scene, &mut res);

    assert_eq!(element_draws(r.api().calls()), vec![(6, 1)]);
    assert!(
        r.api()
            .calls()
            .contains(&ApiCall::SetEnabled(Capability::Lighting, true))
    );
    assert_eq!(r.api().calls().last(), Some(&ApiCall::Present));
}

#[test]
fn hidden_instances_drop_out_of_the_batch() {
    let mut api = RecordingApi::new();
    let mut res = Resources::new();
    let mut model = load_panel(&mut api, &mut res);
    let handles: Vec<_> = (0..3).map(|_| model.make_instance()).collect();
    model.show_instance(handles[0], Mat4::from_translation(Vec3::X), Color::WHITE);
    model.show_instance(handles[2], Mat4::from_translation(Vec3::NEG_X), Color::WHITE);

    let mut scene = lit_scene();
    let h = scene.add_model(model);
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(640, 480));

    frame(&mut r, &mut scene, &mut res);
    assert_eq!(element_draws(r.api().calls()), vec![(6, 2)]);

    let group = scene
        .model_mut(h)
        .and_then(Model::instances_mut)
        .expect("instanced model");
    group.hide(handles[0]);
    assert_eq!(group.visible_count(), 1);

    r.api_mut().clear_calls();
    frame(&mut r, &mut scene, &mut res);
    assert_eq!(element_draws(r.api().calls()), vec![(6, 1)]);

    if let Some(group) = scene.model_mut(h).and_then(Model::instances_mut) {
        group.hide(handles[2]);
    }
    r.api_mut().clear_calls();
    frame(&mut r, &mut scene, &mut res);
    assert!(element_draws(r.api().calls()).is_empty());
}

#[test]
fn repeated_frames_do_not_grow_state_traffic() {
    let mut api = RecordingApi::new();
    let mut res = Resources::new();
    let model = load_panel(&mut api, &mut res);
    let mut scene = lit_scene();
    scene.add_model(model);
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(320, 240));

    frame(&mut r, &mut scene, &mut res);
    let first = r.stats().clone();
    r.api_mut().clear_calls();
    frame(&mut r, &mut scene, &mut res);
    let second = r.stats().clone();

    assert_eq!(first.ops, second.ops);
    assert_eq!(first.draw_calls, second.draw_calls);
    assert!(second.state_calls <= first.state_calls);
}

#[test]
fn release_deletes_loaded_buffers() {
    let mut api = RecordingApi::new();
    let mut res = Resources::new();
    let model = load_panel(&mut api, &mut res);
    let mut scene = lit_scene();
    scene.add_model(model);
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(320, 240));
    frame(&mut r, &mut scene, &mut res);

    scene.release(r.api_mut(), &mut res);
    res.release(r.api_mut());
    r.release();

    let calls = r.api().calls();
    let created = calls
        .iter()
        .filter(|c| matches!(c, ApiCall::CreateBuffer(..)))
        .count();
    let deleted = calls
        .iter()
        .filter(|c| matches!(c, ApiCall::DeleteBuffer(..)))
        .count();
    assert!(deleted > 0);
    assert!(deleted <= created);
}

#[test]
fn clockwise_panel_faces_the_camera_after_the_mirror() {
    let mut api = RecordingApi::new();
    let mut res = Resources::new();
    let model = load_panel(&mut api, &mut res);
    let mut scene = lit_scene();
    scene.add_model(model);
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(640, 480));
    frame(&mut r, &mut scene, &mut res);

    let calls = r.api().calls();
    let draw = calls
        .iter()
        .position(|c| matches!(c, ApiCall::DrawElements { .. }))
        .expect("panel draw");
    let before = &calls[..draw];
    let last = |f: fn(&ApiCall) -> Option<Mat4>| before.iter().rev().find_map(f);
    let projection = last(|c| match c {
        ApiCall::LoadProjection(m) => Some(*m),
        _ => None,
    })
    .expect("projection");
    let model_view = last(|c| match c {
        ApiCall::LoadModelView(m) => Some(*m),
        _ => None,
    })
    .expect("model view");
    let cull = before.iter().rev().find_map(|c| match c {
        ApiCall::SetCullFace(f) => Some(*f),
        _ => None,
    });
    assert_eq!(cull, Some(CullFace::Back));
    assert!(before.contains(&ApiCall::SetEnabled(Capability::CullFace, true)));

    // Front faces are counter-clockwise in normalized device coordinates.
    let verts = quad_vertices();
    let ndc: Vec<Vec2> = PANEL_INDICES[..3]
        .iter()
        .map(|&i| {
            let p = Vec3::from(verts[i as usize].position).extend(1.0);
            let clip = projection * model_view * p;
            clip.truncate().truncate() / clip.w
        })
        .collect();
    let area = (ndc[1] - ndc[0]).perp_dot(ndc[2] - ndc[0]);
    assert!(area > 0.0, "panel winds clockwise on screen (area {area})");
}

/// Runs only where an adapter is available.
#[test]
fn gpu_frame_reads_back_covered_pixels() {
    let Ok(api) = WgpuApi::new_blocking(DeviceInit::sized(64, 64)) else {
        eprintln!("no wgpu adapter; skipping");
        return;
    };
    let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::new(64, 64));
    let mut res = Resources::new();
    let model = load_panel(r.api_mut(), &mut res);
    let mut scene = lit_scene();
    scene.add_model(model);

    frame(&mut r, &mut scene, &mut res);
    r.request_screenshot();

    let image = loop {
        match r.poll_screenshot() {
            Some(ReadbackStatus::Ready(image)) => break image,
            Some(ReadbackStatus::Pending) => std::thread::yield_now(),
            other => panic!("unexpected readback status {other:?}"),
        }
    };
    assert_eq!((image.width, image.height), (64, 64));
    assert_eq!(image.pixel(32, 32).map(|p| p[3]), Some(255));
    assert_eq!(image.pixel(0, 0), Some([0, 0, 0, 0]));
}
