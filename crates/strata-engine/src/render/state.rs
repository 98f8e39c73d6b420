use crate::device::{
    BlendMode, Capability, CompareFunc, CullFace, GraphicsApi, StencilFunc, StencilOps,
};

/// Boolean axes tracked by the cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BoolState {
    DepthTest,
    DepthMask,
    Blend,
    CullFace,
    StencilTest,
    AlphaTest,
    PolygonOffsetFill,
    Fog,
    Lighting,
    ColorMaterial,
    ScissorTest,
    LineSmooth,
}

const BOOL_STATES: usize = 12;

impl BoolState {
    pub const ALL: [BoolState; BOOL_STATES] = [
        BoolState::DepthTest,
        BoolState::DepthMask,
        BoolState::Blend,
        BoolState::CullFace,
        BoolState::StencilTest,
        BoolState::AlphaTest,
        BoolState::PolygonOffsetFill,
        BoolState::Fog,
        BoolState::Lighting,
        BoolState::ColorMaterial,
        BoolState::ScissorTest,
        BoolState::LineSmooth,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }

    /// Capability toggled for this axis; `None` for the depth write mask.
    const fn capability(self) -> Option<Capability> {
        Some(match self {
            BoolState::DepthTest => Capability::DepthTest,
            BoolState::DepthMask => return None,
            BoolState::Blend => Capability::Blend,
            BoolState::CullFace => Capability::CullFace,
            BoolState::StencilTest => Capability::StencilTest,
            BoolState::AlphaTest => Capability::AlphaTest,
            BoolState::PolygonOffsetFill => Capability::PolygonOffsetFill,
            BoolState::Fog => Capability::Fog,
            BoolState::Lighting => Capability::Lighting,
            BoolState::ColorMaterial => Capability::ColorMaterial,
            BoolState::ScissorTest => Capability::ScissorTest,
            BoolState::LineSmooth => Capability::LineSmooth,
        })
    }
}

/// Snapshot of every cached axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderState {
    pub flags: [bool; BOOL_STATES],
    pub cull_face: CullFace,
    pub depth_func: CompareFunc,
    pub alpha_threshold: f32,
    /// `(factor, units)`
    pub polygon_offset: (f32, f32),
    pub blend: BlendMode,
    pub stencil_ops: StencilOps,
    pub stencil_func: StencilFunc,
}

impl Default for RenderState {
    /// GL context defaults, except depth writes which start enabled.
    fn default() -> Self {
        let mut flags = [false; BOOL_STATES];
        flags[BoolState::DepthMask.index()] = true;
        Self {
            flags,
            cull_face: CullFace::Back,
            depth_func: CompareFunc::Less,
            alpha_threshold: 0.0,
            polygon_offset: (0.0, 0.0),
            blend: BlendMode::ALPHA,
            stencil_ops: StencilOps::KEEP,
            stencil_func: StencilFunc::ALWAYS,
        }
    }
}

impl RenderState {
    #[inline]
    pub fn get(&self, key: BoolState) -> bool {
        self.flags[key.index()]
    }
}

/// Deduplicates state-toggle calls.
///
/// Setters only record the requested value. `flush` diffs the request
/// against what was last applied and emits one call per changed axis. After
/// `invalidate` (or before the first flush) nothing is assumed about the
/// device, so the next flush emits every axis.
#[derive(Debug, Default)]
pub struct RenderStateCache {
    desired: RenderState,
    applied: Option<RenderState>,
    emitted: u64,
}

impl RenderStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&mut self, key: BoolState, value: bool) {
        self.desired.flags[key.index()] = value;
    }

    #[inline]
    pub fn set_cull_face(&mut self, face: CullFace) {
        self.desired.cull_face = face;
    }

    #[inline]
    pub fn set_depth_func(&mut self, func: CompareFunc) {
        self.desired.depth_func = func;
    }

    #[inline]
    pub fn set_alpha_threshold(&mut self, threshold: f32) {
        self.desired.alpha_threshold = threshold;
    }

    #[inline]
    pub fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        self.desired.polygon_offset = (factor, units);
    }

    #[inline]
    pub fn set_blend(&mut self, mode: BlendMode) {
        self.desired.blend = mode;
    }

    #[inline]
    pub fn set_stencil_ops(&mut self, ops: StencilOps) {
        self.desired.stencil_ops = ops;
    }

    #[inline]
    pub fn set_stencil_func(&mut self, func: StencilFunc) {
        self.desired.stencil_func = func;
    }

    /// Requested state, flushed or not.
    #[inline]
    pub fn desired(&self) -> &RenderState {
        &self.desired
    }

    /// State the device is known to hold.
    #[inline]
    pub fn applied(&self) -> Option<&RenderState> {
        self.applied.as_ref()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.applied.as_ref() != Some(&self.desired)
    }

    /// Total calls emitted since construction.
    #[inline]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Forgets the applied snapshot; the next flush re-emits everything.
    pub fn invalidate(&mut self) {
        self.applied = None;
    }

    /// Converges the device on the requested state. Returns the number of
    /// calls emitted.
    pub fn flush(&mut self, api: &mut dyn GraphicsApi) -> usize {
        let want = self.desired;
        let have = self.applied;
        let changed = |same: bool| have.is_none() || !same;
        let mut n = 0;

        for key in BoolState::ALL {
            let on = want.get(key);
            if !changed(have.is_some_and(|h| h.get(key) == on)) {
                continue;
            }
            match key.capability() {
                Some(cap) => api.set_enabled(cap, on),
                None => api.set_depth_mask(on),
            }
            n += 1;
        }

        if changed(have.is_some_and(|h| h.cull_face == want.cull_face)) {
            api.set_cull_face(want.cull_face);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.depth_func == want.depth_func)) {
            api.set_depth_func(want.depth_func);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.alpha_threshold == want.alpha_threshold)) {
            api.set_alpha_threshold(want.alpha_threshold);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.polygon_offset == want.polygon_offset)) {
            let (factor, units) = want.polygon_offset;
            api.set_polygon_offset(factor, units);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.blend == want.blend)) {
            api.set_blend(want.blend);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.stencil_ops == want.stencil_ops)) {
            api.set_stencil_ops(want.stencil_ops);
            n += 1;
        }
        if changed(have.is_some_and(|h| h.stencil_func == want.stencil_func)) {
            api.set_stencil_func(want.stencil_func);
            n += 1;
        }

        self.applied = Some(want);
        self.emitted += n as u64;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ApiCall, RecordingApi, StencilAction};

    fn flushed() -> (RecordingApi, RenderStateCache) {
        let mut api = RecordingApi::new();
        let mut cache = RenderStateCache::new();
        cache.flush(&mut api);
        api.clear_calls();
        (api, cache)
    }

    #[test]
    fn first_flush_emits_every_axis() {
        let mut api = RecordingApi::new();
        let mut cache = RenderStateCache::new();
        let n = cache.flush(&mut api);
        assert_eq!(n, BoolState::ALL.len() + 7);
        assert_eq!(api.calls().len(), n);
    }

    #[test]
    fn second_flush_is_silent() {
        let (mut api, mut cache) = flushed();
        cache.set(BoolState::Blend, true);
        cache.set_blend(BlendMode::ADDITIVE);
        cache.flush(&mut api);
        api.clear_calls();
        assert_eq!(cache.flush(&mut api), 0);
        assert!(api.calls().is_empty());
    }

    #[test]
    fn one_call_per_changed_key() {
        let (mut api, mut cache) = flushed();
        cache.set(BoolState::DepthTest, true);
        cache.set(BoolState::DepthTest, false);
        cache.set(BoolState::DepthTest, true);
        cache.set(BoolState::DepthMask, false);
        cache.set_cull_face(CullFace::Front);
        assert_eq!(cache.flush(&mut api), 3);
        assert_eq!(
            api.calls(),
            &[
                ApiCall::SetEnabled(Capability::DepthTest, true),
                ApiCall::SetDepthMask(false),
                ApiCall::SetCullFace(CullFace::Front),
            ]
        );
    }

    #[test]
    fn reverting_before_flush_emits_nothing() {
        let (mut api, mut cache) = flushed();
        cache.set(BoolState::Fog, true);
        cache.set(BoolState::Fog, false);
        assert!(!cache.is_dirty());
        assert_eq!(cache.flush(&mut api), 0);
    }

    #[test]
    fn invalidate_forces_full_reapply() {
        let (mut api, mut cache) = flushed();
        cache.invalidate();
        assert!(cache.is_dirty());
        assert_eq!(cache.flush(&mut api), BoolState::ALL.len() + 7);
    }

    #[test]
    fn compound_values_compare_whole() {
        let (mut api, mut cache) = flushed();
        cache.set_stencil_ops(StencilOps::on_pass(StencilAction::Invert));
        cache.set_polygon_offset(1.0, 2.0);
        cache.flush(&mut api);
        assert!(api.calls().contains(&ApiCall::SetPolygonOffset { factor: 1.0, units: 2.0 }));
        assert!(
            api.calls()
                .contains(&ApiCall::SetStencilOps(StencilOps::on_pass(StencilAction::Invert)))
        );
        assert_eq!(api.calls().len(), 2);
    }
}
