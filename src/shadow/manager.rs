//! Shadow request management
//!
//! Owns both atlases, enforces the per-frame request budget, runs layout and
//! turns placed requests into GPU shadow records.

use glam::UVec2;

use super::{
    DirectionalShadowData, LayoutStatus, ShadowAtlas, ShadowData, ShadowRequest,
    ShadowRequestKind, Viewport,
};
use crate::command::{CommandSink, GlobalBuffer, GlobalTexture, RenderTargetId};
use crate::config::ShadowSettings;
use crate::error::Result;

/// Layout result of both atlases for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowLayoutOutcome {
    pub atlas: LayoutStatus,
    pub cascade_atlas: LayoutStatus,
}

impl ShadowLayoutOutcome {
    /// Whether any request was left unplaced.
    pub fn overflowed(&self) -> bool {
        matches!(self.atlas, LayoutStatus::Overflow { .. })
            || matches!(self.cascade_atlas, LayoutStatus::Overflow { .. })
    }
}

/// Per-frame shadow request collection, layout and rendering.
pub struct ShadowManager {
    settings: ShadowSettings,
    atlas: ShadowAtlas,
    cascade_atlas: ShadowAtlas,
    shadow_data: Vec<ShadowData>,
    cascade_data: Vec<ShadowData>,
    directional_data: Vec<DirectionalShadowData>,
    allocated: bool,
}

impl ShadowManager {
    /// Create a manager with empty atlases.
    pub fn new(settings: ShadowSettings) -> Self {
        let (w, h) = settings.atlas_size;
        let (cw, ch) = settings.cascade_atlas_size;
        Self {
            atlas: ShadowAtlas::new(RenderTargetId::ShadowAtlas, w, h)
                .with_min_resolution(settings.min_shadow_resolution),
            cascade_atlas: ShadowAtlas::new(RenderTargetId::CascadeShadowAtlas, cw, ch)
                .with_min_resolution(settings.min_shadow_resolution),
            shadow_data: Vec::with_capacity(settings.max_shadow_requests),
            cascade_data: Vec::new(),
            directional_data: Vec::new(),
            allocated: false,
            settings,
        }
    }

    /// Shadow configuration.
    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    /// General atlas.
    pub fn atlas(&self) -> &ShadowAtlas {
        &self.atlas
    }

    /// Cascade atlas.
    pub fn cascade_atlas(&self) -> &ShadowAtlas {
        &self.cascade_atlas
    }

    /// Requests accepted this frame across both atlases.
    pub fn request_count(&self) -> usize {
        self.atlas.len() + self.cascade_atlas.len()
    }

    /// Requests that can still be accepted this frame.
    pub fn remaining_requests(&self) -> usize {
        self.settings
            .max_shadow_requests
            .saturating_sub(self.request_count())
    }

    /// Allocate both atlas render targets and the shadow record buffers on
    /// first use.
    ///
    /// Every record buffer holds `max_shadow_requests` records: neither atlas
    /// can accept more requests than the frame budget, and there is at most
    /// one directional record per cascade request.
    pub fn ensure_allocated(&mut self, sink: &mut dyn CommandSink) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let records = self.settings.max_shadow_requests.max(1) as u64;
        for (buffer, stride) in [
            (GlobalBuffer::ShadowData, std::mem::size_of::<ShadowData>()),
            (GlobalBuffer::CascadeShadowData, std::mem::size_of::<ShadowData>()),
            (
                GlobalBuffer::DirectionalShadowData,
                std::mem::size_of::<DirectionalShadowData>(),
            ),
        ] {
            sink.allocate_buffer(buffer, records * stride as u64)?;
        }
        for atlas in [&self.atlas, &self.cascade_atlas] {
            let size = atlas.size();
            sink.allocate_depth_target(atlas.target(), size.x, size.y)?;
            tracing::info!(
                atlas = ?atlas.target(),
                width = size.x,
                height = size.y,
                "allocated shadow atlas"
            );
        }
        self.allocated = true;
        Ok(())
    }

    /// Drop every request and record from the previous frame.
    pub fn clear(&mut self) {
        self.atlas.clear();
        self.cascade_atlas.clear();
        self.shadow_data.clear();
        self.cascade_data.clear();
        self.directional_data.clear();
    }

    /// Accept a request, routing cascades to the cascade atlas.
    ///
    /// Returns the request's index within its atlas, which becomes its GPU
    /// shadow index, or `None` once the frame budget is exhausted.
    pub fn add_shadow_request(&mut self, request: ShadowRequest) -> Option<usize> {
        if self.remaining_requests() == 0 {
            tracing::warn!(
                light = request.light_index,
                budget = self.settings.max_shadow_requests,
                "shadow request budget exhausted; light renders unshadowed"
            );
            return None;
        }
        Some(match request.kind {
            ShadowRequestKind::Cascade => self.cascade_atlas.reserve(request),
            ShadowRequestKind::Punctual => self.atlas.reserve(request),
        })
    }

    /// Accept a group of requests that must be contiguous, or none of them.
    ///
    /// Returns the index of the first request.
    pub fn add_shadow_requests(&mut self, requests: Vec<ShadowRequest>) -> Option<usize> {
        let first = requests.first()?;
        if requests.len() > self.remaining_requests() {
            tracing::warn!(
                light = first.light_index,
                slices = requests.len(),
                remaining = self.remaining_requests(),
                "not enough shadow requests left for all slices; light renders unshadowed"
            );
            return None;
        }
        let mut first_index = None;
        for request in requests {
            let index = self.add_shadow_request(request)?;
            first_index.get_or_insert(index);
        }
        first_index
    }

    /// Lay out both atlases and build the GPU shadow records.
    ///
    /// Record order equals request order in each atlas, so the indices
    /// returned by [`add_shadow_request`](Self::add_shadow_request) address them.
    pub fn process_shadow_requests(&mut self) -> ShadowLayoutOutcome {
        // Failures are already reported by the atlas; unplaced requests get
        // records flagged as unplaced below.
        let _ = self.atlas.layout(true);
        let _ = self.cascade_atlas.layout(false);

        Self::build_records(&self.atlas, &mut self.shadow_data);
        Self::build_records(&self.cascade_atlas, &mut self.cascade_data);

        self.directional_data.clear();
        let cascades = self.cascade_atlas.requests();
        let mut start = 0;
        while start < cascades.len() {
            let light = cascades[start].light_index;
            let end = cascades[start..]
                .iter()
                .position(|r| r.light_index != light)
                .map_or(cascades.len(), |offset| start + offset);
            self.directional_data.push(DirectionalShadowData::from_cascades(
                &cascades[start..end],
                start as u32,
            ));
            start = end;
        }

        let outcome = ShadowLayoutOutcome {
            atlas: self.atlas.status(),
            cascade_atlas: self.cascade_atlas.status(),
        };
        tracing::debug!(
            punctual = self.atlas.len(),
            cascades = self.cascade_atlas.len(),
            ?outcome,
            "shadow layout"
        );
        outcome
    }

    fn build_records(atlas: &ShadowAtlas, records: &mut Vec<ShadowData>) {
        let size = atlas.size();
        records.clear();
        records.extend(atlas.requests().iter().map(|request| {
            match request.atlas_viewport() {
                Some(viewport) => ShadowData::new(request, viewport, size),
                None => ShadowData::unplaced(request),
            }
        }));
    }

    /// Atlas placement of an accepted request, if layout placed it.
    pub fn viewport(&self, kind: ShadowRequestKind, index: usize) -> Option<Viewport> {
        let atlas = match kind {
            ShadowRequestKind::Punctual => &self.atlas,
            ShadowRequestKind::Cascade => &self.cascade_atlas,
        };
        atlas.requests().get(index)?.atlas_viewport()
    }

    /// Whether every request in `index..index + count` was placed.
    pub fn all_placed(&self, kind: ShadowRequestKind, index: usize, count: usize) -> bool {
        count > 0 && (index..index + count).all(|i| self.viewport(kind, i).is_some())
    }

    /// Record the shadow map draws for both atlases.
    ///
    /// Skips all work when no request was accepted this frame. Returns the
    /// number of slices drawn.
    pub fn render_shadows(&self, sink: &mut dyn CommandSink) -> usize {
        if self.request_count() == 0 {
            return 0;
        }
        self.atlas.render(sink) + self.cascade_atlas.render(sink)
    }

    /// Upload the shadow records and bind both atlases.
    pub fn push_global_params(&self, sink: &mut dyn CommandSink) {
        sink.set_global_buffer(
            GlobalBuffer::ShadowData,
            bytemuck::cast_slice(&self.shadow_data),
        );
        sink.set_global_buffer(
            GlobalBuffer::CascadeShadowData,
            bytemuck::cast_slice(&self.cascade_data),
        );
        sink.set_global_buffer(
            GlobalBuffer::DirectionalShadowData,
            bytemuck::cast_slice(&self.directional_data),
        );
        sink.bind_global_texture(GlobalTexture::Atlas(RenderTargetId::ShadowAtlas));
        sink.bind_global_texture(GlobalTexture::Atlas(RenderTargetId::CascadeShadowAtlas));
    }

    /// GPU records for the general atlas, in request order.
    pub fn shadow_data(&self) -> &[ShadowData] {
        &self.shadow_data
    }

    /// GPU records for the cascade atlas, in request order.
    pub fn cascade_data(&self) -> &[ShadowData] {
        &self.cascade_data
    }

    /// One merged record per shadowed directional light.
    pub fn directional_data(&self) -> &[DirectionalShadowData] {
        &self.directional_data
    }

    /// General atlas size.
    pub fn atlas_size(&self) -> UVec2 {
        self.atlas.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandList};
    use glam::{Mat4, Vec4};

    fn settings() -> ShadowSettings {
        ShadowSettings {
            atlas_size: (1024, 1024),
            cascade_atlas_size: (2048, 2048),
            max_shadow_requests: 8,
            ..Default::default()
        }
    }

    fn punctual(light: usize, size: u32) -> ShadowRequest {
        ShadowRequest::punctual(light, 0, Mat4::IDENTITY, Mat4::IDENTITY, size)
    }

    fn cascade(light: usize, index: u32) -> ShadowRequest {
        ShadowRequest::cascade(
            light,
            index,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            1024,
            Vec4::new(0.0, 0.0, index as f32, 10.0),
        )
    }

    #[test]
    fn test_routes_by_kind() {
        let mut manager = ShadowManager::new(settings());
        assert_eq!(manager.add_shadow_request(punctual(0, 256)), Some(0));
        assert_eq!(manager.add_shadow_request(cascade(1, 0)), Some(0));
        assert_eq!(manager.add_shadow_request(punctual(2, 256)), Some(1));
        assert_eq!(manager.atlas().len(), 2);
        assert_eq!(manager.cascade_atlas().len(), 1);
    }

    #[test]
    fn test_budget_exhaustion_returns_none() {
        let mut manager = ShadowManager::new(settings());
        for i in 0..8 {
            assert!(manager.add_shadow_request(punctual(i, 64)).is_some());
        }
        assert_eq!(manager.add_shadow_request(punctual(8, 64)), None);
        assert_eq!(manager.request_count(), 8);
    }

    #[test]
    fn test_grouped_requests_are_all_or_nothing() {
        let mut manager = ShadowManager::new(settings());
        manager.add_shadow_request(punctual(0, 64));
        manager.add_shadow_request(punctual(1, 64));
        manager.add_shadow_request(punctual(2, 64));

        let faces: Vec<_> = (0..6).map(|_| punctual(3, 64)).collect();
        assert_eq!(manager.add_shadow_requests(faces), None);
        assert_eq!(manager.request_count(), 3);

        let faces: Vec<_> = (0..5).map(|_| punctual(4, 64)).collect();
        assert_eq!(manager.add_shadow_requests(faces), Some(3));
        assert_eq!(manager.remaining_requests(), 0);
    }

    #[test]
    fn test_process_builds_records_in_request_order() {
        let mut manager = ShadowManager::new(settings());
        manager.add_shadow_request(punctual(0, 512));
        manager.add_shadow_request(punctual(1, 256));
        for i in 0..4 {
            manager.add_shadow_request(cascade(5, i));
        }

        let outcome = manager.process_shadow_requests();
        assert_eq!(outcome.atlas, LayoutStatus::Packed);
        assert_eq!(outcome.cascade_atlas, LayoutStatus::Packed);
        assert!(!outcome.overflowed());

        assert_eq!(manager.shadow_data().len(), 2);
        let second = manager.shadow_data()[1].atlas_viewport(manager.atlas_size());
        assert_eq!(second, Viewport::new(512, 0, 256, 256));

        assert_eq!(manager.cascade_data().len(), 4);
        assert_eq!(manager.directional_data().len(), 1);
        let directional = manager.directional_data()[0];
        assert_eq!(directional.cascade_count, 4);
        assert_eq!(directional.first_cascade, 0);
        assert_eq!(directional.sphere_cascades[2], [0.0, 0.0, 2.0, 100.0]);
    }

    #[test]
    fn test_cascade_overflow_marks_unplaced() {
        let mut manager = ShadowManager::new(ShadowSettings {
            cascade_atlas_size: (1024, 1024),
            ..settings()
        });
        manager.add_shadow_request(cascade(0, 0));
        manager.add_shadow_request(cascade(0, 1));

        let outcome = manager.process_shadow_requests();
        assert!(outcome.overflowed());
        assert!(manager.cascade_data()[0].is_placed());
        assert!(!manager.cascade_data()[1].is_placed());
        assert!(!manager.all_placed(ShadowRequestKind::Cascade, 0, 2));
        assert!(manager.all_placed(ShadowRequestKind::Cascade, 0, 1));
    }

    #[test]
    fn test_render_skips_when_no_requests() {
        let mut manager = ShadowManager::new(settings());
        manager.process_shadow_requests();
        let mut list = CommandList::new();
        assert_eq!(manager.render_shadows(&mut list), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_render_only_touches_used_atlases() {
        let mut manager = ShadowManager::new(settings());
        manager.add_shadow_request(punctual(0, 128));
        manager.process_shadow_requests();

        let mut list = CommandList::new();
        assert_eq!(manager.render_shadows(&mut list), 1);
        assert!(!list
            .commands()
            .contains(&Command::ClearDepth(RenderTargetId::CascadeShadowAtlas)));
        assert_eq!(list.commands().last(), Some(&Command::ResetViewport));
    }

    #[test]
    fn test_clear_resets_frame_state() {
        let mut manager = ShadowManager::new(settings());
        manager.add_shadow_request(punctual(0, 128));
        manager.process_shadow_requests();
        manager.clear();
        assert_eq!(manager.request_count(), 0);
        assert!(manager.shadow_data().is_empty());
        assert_eq!(manager.remaining_requests(), 8);
    }

    #[test]
    fn test_allocates_atlases_once() {
        let mut manager = ShadowManager::new(settings());
        let mut list = CommandList::new();
        manager.ensure_allocated(&mut list).unwrap();
        manager.ensure_allocated(&mut list).unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(
            list.commands()[0],
            Command::AllocateBuffer {
                buffer: GlobalBuffer::ShadowData,
                size: 8 * std::mem::size_of::<ShadowData>() as u64,
            }
        );
        assert_eq!(
            list.commands()[2],
            Command::AllocateBuffer {
                buffer: GlobalBuffer::DirectionalShadowData,
                size: 8 * std::mem::size_of::<DirectionalShadowData>() as u64,
            }
        );
        assert_eq!(
            list.commands()[4],
            Command::AllocateDepthTarget {
                target: RenderTargetId::CascadeShadowAtlas,
                width: 2048,
                height: 2048
            }
        );
    }

    #[test]
    fn test_record_uploads_fit_allocated_buffers() {
        let mut manager = ShadowManager::new(settings());
        let mut list = CommandList::new();
        manager.ensure_allocated(&mut list).unwrap();
        for i in 0..4 {
            manager.add_shadow_request(cascade(i, 0));
        }
        for i in 0..4 {
            manager.add_shadow_request(punctual(10 + i, 64));
        }
        assert_eq!(manager.remaining_requests(), 0);
        manager.process_shadow_requests();
        manager.push_global_params(&mut list);

        for buffer in [
            GlobalBuffer::ShadowData,
            GlobalBuffer::CascadeShadowData,
            GlobalBuffer::DirectionalShadowData,
        ] {
            let allocated = list
                .commands()
                .iter()
                .find_map(|c| match c {
                    Command::AllocateBuffer { buffer: b, size } if *b == buffer => Some(*size),
                    _ => None,
                })
                .unwrap();
            let uploaded = list.last_upload(buffer).unwrap().len() as u64;
            assert!(uploaded <= allocated, "{buffer:?}: {uploaded} > {allocated}");
        }
    }

    #[test]
    fn test_push_global_params_uploads_records() {
        let mut manager = ShadowManager::new(settings());
        manager.add_shadow_request(punctual(0, 128));
        manager.process_shadow_requests();

        let mut list = CommandList::new();
        manager.push_global_params(&mut list);
        let bytes = list.last_upload(GlobalBuffer::ShadowData).unwrap();
        assert_eq!(bytes.len(), std::mem::size_of::<ShadowData>());
        assert!(list
            .commands()
            .contains(&Command::BindGlobalTexture(GlobalTexture::Atlas(
                RenderTargetId::ShadowAtlas
            ))));
    }
}
