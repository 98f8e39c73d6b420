use std::fmt;

use crate::config::{RendererSettings, SchemeKind, ScreenInfo};
use crate::device::{GraphicsApi, ProgramSelection};

use super::material::Material;

/// Line width every scheme starts a frame with.
pub const BASE_LINE_WIDTH: f32 = 2.0;

/// Strategy the renderer delegates scheme-specific pipeline setup to.
///
/// Chosen once when the renderer is built. `set_material` runs before the
/// renderer applies the material's fixed state.
pub trait RenderScheme: fmt::Debug {
    fn name(&self) -> &'static str;

    fn pre_render(&mut self, api: &mut dyn GraphicsApi, settings: &RendererSettings);

    fn set_material(&mut self, api: &mut dyn GraphicsApi, material: &Material);

    fn post_render(&mut self, _api: &mut dyn GraphicsApi) {}

    fn resize(&mut self, _api: &mut dyn GraphicsApi, _screen: &ScreenInfo) {}
}

/// Builds the scheme named by `kind`.
pub fn make_scheme(kind: SchemeKind) -> Box<dyn RenderScheme> {
    match kind {
        SchemeKind::FixedFunction => Box::new(FixedFunctionScheme),
        SchemeKind::Shader => Box::new(ShaderScheme::default()),
    }
}

// ── fixed function ────────────────────────────────────────────────────────

/// No programs; materials are expressed through pipeline state alone.
#[derive(Debug, Default)]
pub struct FixedFunctionScheme;

impl RenderScheme for FixedFunctionScheme {
    fn name(&self) -> &'static str {
        "fixed-function"
    }

    fn pre_render(&mut self, api: &mut dyn GraphicsApi, _settings: &RendererSettings) {
        api.select_program(None);
        api.set_line_width(BASE_LINE_WIDTH);
    }

    fn set_material(&mut self, _api: &mut dyn GraphicsApi, _material: &Material) {}
}

// ── shader ────────────────────────────────────────────────────────────────

/// Picks a program variant per material: lit or unlit, textured or not,
/// with or without glow output.
#[derive(Debug, Default)]
pub struct ShaderScheme {
    current: Option<ProgramSelection>,
    switches: u64,
}

impl ShaderScheme {
    /// Program switches since construction.
    #[inline]
    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn selection_for(material: &Material) -> ProgramSelection {
        ProgramSelection {
            lit: material.is_lit(),
            textured: material.texture.is_some(),
            glow: material.glow,
        }
    }
}

impl RenderScheme for ShaderScheme {
    fn name(&self) -> &'static str {
        "shader"
    }

    fn pre_render(&mut self, api: &mut dyn GraphicsApi, _settings: &RendererSettings) {
        // Program state from the last frame is not trusted.
        self.current = None;
        api.set_line_width(BASE_LINE_WIDTH);
    }

    fn set_material(&mut self, api: &mut dyn GraphicsApi, material: &Material) {
        let want = Self::selection_for(material);
        if self.current == Some(want) {
            return;
        }
        api.select_program(Some(want));
        self.current = Some(want);
        self.switches += 1;
    }

    fn post_render(&mut self, api: &mut dyn GraphicsApi) {
        api.select_program(None);
        self.current = None;
    }

    fn resize(&mut self, _api: &mut dyn GraphicsApi, screen: &ScreenInfo) {
        log::debug!("shader scheme: resized to {}x{}", screen.width, screen.height);
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::device::{ApiCall, RecordingApi};
    use crate::render::material::DrawMode;

    #[test]
    fn make_scheme_follows_kind() {
        assert_eq!(make_scheme(SchemeKind::FixedFunction).name(), "fixed-function");
        assert_eq!(make_scheme(SchemeKind::Shader).name(), "shader");
    }

    #[test]
    fn fixed_function_thickens_lines() {
        let mut api = RecordingApi::new();
        FixedFunctionScheme.pre_render(&mut api, &RendererSettings::default());
        assert!(api.calls().contains(&ApiCall::SetLineWidth(BASE_LINE_WIDTH)));
        assert!(api.calls().contains(&ApiCall::SelectProgram(None)));
    }

    #[test]
    fn shader_scheme_switches_only_on_variant_change() {
        let mut api = RecordingApi::new();
        let mut s = ShaderScheme::default();
        s.pre_render(&mut api, &RendererSettings::default());
        let lit = Material::new("a", DrawMode::Lit, Color::WHITE);
        let lit_too = Material::new("b", DrawMode::Lit, Color::BLACK);
        let flat = Material::new("c", DrawMode::Add, Color::WHITE);
        s.set_material(&mut api, &lit);
        s.set_material(&mut api, &lit_too);
        s.set_material(&mut api, &flat);
        assert_eq!(s.switches(), 2);
        assert_eq!(
            api.count(|c| matches!(c, ApiCall::SelectProgram(Some(_)))),
            2
        );
    }

    #[test]
    fn shader_scheme_forgets_program_each_frame() {
        let mut api = RecordingApi::new();
        let mut s = ShaderScheme::default();
        let m = Material::default();
        s.set_material(&mut api, &m);
        s.post_render(&mut api);
        s.pre_render(&mut api, &RendererSettings::default());
        s.set_material(&mut api, &m);
        assert_eq!(s.switches(), 2);
    }
}
