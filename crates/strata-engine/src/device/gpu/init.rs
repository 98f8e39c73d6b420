/// Initialization parameters for the headless wgpu backend.
///
/// Keep this structure small. Add flags only when a concrete platform or
/// backend requirement shows up.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    /// Adapter selection hint.
    pub power_preference: wgpu::PowerPreference,

    /// Allow wgpu to pick a software adapter when no hardware one exists.
    ///
    /// Useful on CI machines without a GPU.
    pub allow_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Offscreen target size in pixels.
    pub width: u32,
    pub height: u32,

    /// Offscreen color format. Readback understands the 8-bit RGBA and BGRA
    /// families only.
    pub color_format: wgpu::TextureFormat,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            allow_fallback_adapter: true,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            width: 1024,
            height: 768,
            color_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

impl DeviceInit {
    /// Same defaults, different target size.
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}
