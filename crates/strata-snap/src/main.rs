//! Renders one mesh offscreen and writes the frame to a PNG.

mod args;
mod demo;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use strata_engine::config::{RendererSettings, ScreenInfo};
use strata_engine::coords::Color;
use strata_engine::device::gpu::{DeviceInit, WgpuApi};
use strata_engine::device::{Light, ReadbackStatus, RgbaImage};
use strata_engine::logging::{LoggingConfig, init_logging};
use strata_engine::render::{Material, Renderer, Resources};
use strata_engine::scene::{DirSource, DisplayList, Model, Scene, load_model, load_model_file};

use crate::args::Args;

const READBACK_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let args = Args::parse();
    let (width, height) = (args.size.width, args.size.height);

    let api = WgpuApi::new_blocking(DeviceInit::sized(width, height))?;
    let info = api.adapter_info();
    log::info!("snap: adapter {} ({:?})", info.name, info.backend);

    let mut renderer = Renderer::new(
        api,
        RendererSettings::default(),
        ScreenInfo::new(width, height),
    );
    let mut res = Resources::new();
    res.add_material(Material::solid(demo::CUBE_MATERIAL, Color::WHITE));

    let mut model = match &args.mesh {
        Some(path) => {
            let mut files = DirSource::new(".");
            load_model_file(renderer.api_mut(), &mut res, &mut files, path)?
        }
        None => load_model(renderer.api_mut(), &mut res, &demo::cube_mesh())
            .context("built-in cube")?,
    };

    let mut scene = Scene::new();
    scene.set_3d(true);
    frame_model(&mut scene, &mut model, &res);
    scene.add_light(Light::ambient(Color::rgb(0.15, 0.15, 0.2)));
    scene.add_light(Light::directional(
        glam::Vec3::new(-0.4, -1.0, -0.6),
        Color::rgb(0.9, 0.9, 0.85),
        Color::BLACK,
    ));
    scene.add_model(model);

    for frame in 0..args.frames {
        renderer.pre_render();
        let aspect = renderer.aspect_ratio();
        let mut list = DisplayList::new();
        scene.draw(renderer.api_mut(), &mut res, aspect, &mut list);
        renderer.render_display_list(&mut list, &mut res);
        let stats = renderer.post_render();
        log::debug!(
            "snap: frame {frame}: {} ops, {} draws, {} material changes",
            stats.ops,
            stats.draw_calls,
            stats.material_changes
        );
    }

    renderer.request_screenshot();
    let image = wait_for_screenshot(&mut renderer)?;
    save_png(&image, &args.out)?;
    log::info!(
        "snap: wrote {}x{} to {}",
        image.width,
        image.height,
        args.out.display()
    );

    scene.release(renderer.api_mut(), &mut res);
    res.release(renderer.api_mut());
    renderer.release();
    Ok(())
}

/// Backs the camera off until the model's bounds fit the field of view.
fn frame_model(scene: &mut Scene, model: &mut Model, res: &Resources) {
    let bounds = model.build_bounding_box(res);
    let center = (bounds.min + bounds.max) * 0.5;
    let radius = ((bounds.max - bounds.min).length() * 0.5).max(0.01);

    let camera = &mut scene.camera_3d;
    let distance = radius / (camera.fov * 0.5).sin();
    camera.far = camera.far.max(distance * 4.0);
    camera.transform.position = center + glam::Vec3::new(0.6, 0.5, 1.0).normalize() * distance;
    camera.look_at(center, glam::Vec3::Y);
}

fn wait_for_screenshot(renderer: &mut Renderer<WgpuApi>) -> Result<RgbaImage> {
    let start = Instant::now();
    loop {
        match renderer.poll_screenshot() {
            Some(ReadbackStatus::Ready(image)) => return Ok(image),
            Some(ReadbackStatus::Failed(reason)) => bail!("readback failed: {reason}"),
            Some(ReadbackStatus::Pending) => {}
            None => bail!("no screenshot was requested"),
        }
        if start.elapsed() > READBACK_TIMEOUT {
            bail!("readback timed out after {READBACK_TIMEOUT:?}");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    image::save_buffer(
        path,
        &image.pixels,
        image.width,
        image.height,
        image::ColorType::Rgba8,
    )
    .with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_engine::device::RecordingApi;

    #[test]
    fn framing_keeps_the_model_in_front_of_the_camera() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut model = load_model(&mut api, &mut res, &demo::cube_mesh()).unwrap();
        let mut scene = Scene::new();
        frame_model(&mut scene, &mut model, &res);

        let camera = &scene.camera_3d;
        let distance = camera.transform.position.length();
        assert!(distance > 0.5 * 3f32.sqrt());
        assert!(camera.far >= distance);
        assert_eq!(model.fragments().len(), 1);
    }
}
