//! Shadow atlas shelf packing
//!
//! Requests are placed row by row in reservation order. Rows are never
//! revisited and requests are never reordered by size, so identical inputs
//! always produce identical layouts.

use glam::UVec2;

use super::ShadowRequest;
use crate::command::{CommandSink, RenderTargetId};

/// A rectangle inside an atlas, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Create a viewport.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the two rectangles share any texel.
    pub fn overlaps(&self, other: &Viewport) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Whether the rectangle lies within `[0, width) x [0, height)`.
    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

/// Outcome of the last [`ShadowAtlas::layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutStatus {
    /// No layout since the last clear.
    Pending,
    /// Everything placed at the requested size.
    Packed,
    /// Everything placed after shrinking resizable requests `2^halvings` times.
    Resized { halvings: u32 },
    /// Only the first `placed` requests fit.
    Overflow { placed: usize },
}

/// Non-fatal packing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shadow atlas {width}x{height} fits {placed} of {requested} requests")]
pub struct AtlasOverflow {
    pub placed: usize,
    pub requested: usize,
    pub width: u32,
    pub height: u32,
}

/// A depth atlas and the requests packed into it.
#[derive(Debug, Clone)]
pub struct ShadowAtlas {
    target: RenderTargetId,
    width: u32,
    height: u32,
    min_resolution: u32,
    requests: Vec<ShadowRequest>,
    status: LayoutStatus,
}

impl ShadowAtlas {
    /// Create an empty atlas.
    pub fn new(target: RenderTargetId, width: u32, height: u32) -> Self {
        Self {
            target,
            width,
            height,
            min_resolution: 1,
            requests: Vec::new(),
            status: LayoutStatus::Pending,
        }
    }

    /// Set the smallest size the resize retry may shrink a request to.
    pub fn with_min_resolution(mut self, min_resolution: u32) -> Self {
        self.min_resolution = min_resolution.max(1);
        self
    }

    /// Render target backing this atlas.
    pub fn target(&self) -> RenderTargetId {
        self.target
    }

    /// Atlas size in texels.
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Reserved requests in reservation order.
    pub fn requests(&self) -> &[ShadowRequest] {
        &self.requests
    }

    /// Number of reserved requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Outcome of the last layout.
    pub fn status(&self) -> LayoutStatus {
        self.status
    }

    /// Append a request without placing it. Returns its index in this atlas.
    pub fn reserve(&mut self, request: ShadowRequest) -> usize {
        self.requests.push(request);
        self.status = LayoutStatus::Pending;
        self.requests.len() - 1
    }

    /// Drop every request.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.status = LayoutStatus::Pending;
    }

    /// Assign non-overlapping viewports to every reserved request.
    ///
    /// With `allow_resize`, an overflowing layout is retried with every
    /// resizable request halved (down to the minimum resolution) until it
    /// fits or nothing can shrink further. On failure the requests placed
    /// before the overflow keep valid viewports and the rest have none.
    pub fn layout(&mut self, allow_resize: bool) -> Result<(), AtlasOverflow> {
        if self.requests.is_empty() {
            return Ok(());
        }

        let mut halvings = 0;
        loop {
            match self.pack(halvings) {
                Ok(()) => {
                    self.status = if halvings == 0 {
                        LayoutStatus::Packed
                    } else {
                        LayoutStatus::Resized { halvings }
                    };
                    return Ok(());
                }
                Err(placed) => {
                    let can_shrink = allow_resize
                        && self.requests.iter().any(|r| {
                            r.allow_resize && self.scaled(r, halvings) != self.scaled(r, halvings + 1)
                        });
                    if !can_shrink {
                        self.status = LayoutStatus::Overflow { placed };
                        let overflow = AtlasOverflow {
                            placed,
                            requested: self.requests.len(),
                            width: self.width,
                            height: self.height,
                        };
                        tracing::warn!(atlas = ?self.target, "{overflow}; remaining shadows are skipped");
                        return Err(overflow);
                    }
                    halvings += 1;
                }
            }
        }
    }

    /// Size a request occupies after `halvings` shrink steps.
    fn scaled(&self, request: &ShadowRequest, halvings: u32) -> UVec2 {
        if !request.allow_resize || halvings == 0 {
            return request.resolution;
        }
        let shrink = |v: u32| (v >> halvings.min(31)).max(self.min_resolution.min(v));
        UVec2::new(shrink(request.resolution.x), shrink(request.resolution.y))
    }

    /// One shelf-packing pass. Returns the number placed on failure.
    fn pack(&mut self, halvings: u32) -> Result<(), usize> {
        let sizes: Vec<UVec2> = self
            .requests
            .iter()
            .map(|r| self.scaled(r, halvings))
            .collect();

        for request in &mut self.requests {
            request.set_atlas_viewport(None);
        }

        let (mut cur_x, mut cur_y, mut cur_h) = (0u32, 0u32, 0u32);
        for (index, size) in sizes.into_iter().enumerate() {
            if size.x > self.width || size.y > self.height {
                return Err(index);
            }
            if cur_x + size.x > self.width {
                cur_x = 0;
                cur_y += cur_h;
                cur_h = 0;
            }
            if cur_y + size.y > self.height {
                return Err(index);
            }

            self.requests[index].set_atlas_viewport(Some(Viewport::new(
                cur_x, cur_y, size.x, size.y,
            )));
            cur_x += size.x;
            cur_h = cur_h.max(size.y);
        }

        Ok(())
    }

    /// Record the shadow draws for every placed request.
    ///
    /// An atlas with no reservations records nothing. Otherwise the atlas is
    /// cleared once, each placed request is drawn in atlas order, and the
    /// viewport restriction is lifted at the end. Returns the number drawn.
    pub fn render(&self, sink: &mut dyn CommandSink) -> usize {
        if self.requests.is_empty() {
            return 0;
        }

        sink.clear_depth(self.target);
        let mut rendered = 0;
        for request in &self.requests {
            let Some(viewport) = request.atlas_viewport() else {
                continue;
            };
            sink.set_viewport(viewport);
            sink.set_view_projection(request.view, request.projection);
            sink.draw_shadows(request.light_index, request.slice);
            rendered += 1;
        }
        sink.reset_viewport();
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandList};
    use glam::Mat4;

    fn request(size: u32) -> ShadowRequest {
        ShadowRequest::punctual(0, 0, Mat4::IDENTITY, Mat4::IDENTITY, size)
    }

    fn rect_request(width: u32, height: u32) -> ShadowRequest {
        let mut r = request(width);
        r.resolution = UVec2::new(width, height);
        r
    }

    fn viewports(atlas: &ShadowAtlas) -> Vec<Option<Viewport>> {
        atlas.requests().iter().map(|r| r.atlas_viewport()).collect()
    }

    fn assert_valid(atlas: &ShadowAtlas) {
        let placed: Vec<Viewport> = viewports(atlas).into_iter().flatten().collect();
        for (i, a) in placed.iter().enumerate() {
            assert!(a.fits_in(atlas.size().x, atlas.size().y), "{a:?} out of bounds");
            for b in &placed[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_row_break_coordinates() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 512, 1024);
        atlas.reserve(request(300));
        atlas.reserve(request(300));
        atlas.reserve(request(200));

        assert!(atlas.layout(false).is_ok());
        assert_eq!(
            viewports(&atlas),
            vec![
                Some(Viewport::new(0, 0, 300, 300)),
                Some(Viewport::new(0, 300, 300, 300)),
                Some(Viewport::new(300, 300, 200, 200)),
            ]
        );
        assert_eq!(atlas.status(), LayoutStatus::Packed);
    }

    #[test]
    fn test_overflow_keeps_placed_requests() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 512, 512);
        atlas.reserve(request(300));
        atlas.reserve(request(300));
        atlas.reserve(request(200));

        let err = atlas.layout(false).unwrap_err();
        assert_eq!(err.placed, 1);
        assert_eq!(err.requested, 3);
        assert_eq!(
            viewports(&atlas),
            vec![Some(Viewport::new(0, 0, 300, 300)), None, None]
        );
        assert_eq!(atlas.status(), LayoutStatus::Overflow { placed: 1 });
        assert_valid(&atlas);
    }

    #[test]
    fn test_resize_retry_halves_in_order() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 512, 512);
        atlas.reserve(request(300));
        atlas.reserve(request(300));
        atlas.reserve(request(200));

        assert!(atlas.layout(true).is_ok());
        assert_eq!(
            viewports(&atlas),
            vec![
                Some(Viewport::new(0, 0, 150, 150)),
                Some(Viewport::new(150, 0, 150, 150)),
                Some(Viewport::new(300, 0, 100, 100)),
            ]
        );
        assert_eq!(atlas.status(), LayoutStatus::Resized { halvings: 1 });
        // The desired size is kept for the next frame.
        assert_eq!(atlas.requests()[0].resolution, UVec2::splat(300));
    }

    #[test]
    fn test_resize_stops_at_min_resolution() {
        let mut atlas =
            ShadowAtlas::new(RenderTargetId::ShadowAtlas, 64, 64).with_min_resolution(32);
        for _ in 0..5 {
            atlas.reserve(request(256));
        }
        let err = atlas.layout(true).unwrap_err();
        assert_eq!(err.placed, 4);
        assert_valid(&atlas);
    }

    #[test]
    fn test_non_resizable_requests_keep_size() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::CascadeShadowAtlas, 1024, 1024);
        let mut cascade = request(1024);
        cascade.allow_resize = false;
        atlas.reserve(cascade.clone());
        atlas.reserve(cascade);
        assert!(atlas.layout(true).is_err());
    }

    #[test]
    fn test_wider_than_atlas_fails() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 256, 256);
        atlas.reserve(rect_request(512, 16));
        let err = atlas.layout(false).unwrap_err();
        assert_eq!(err.placed, 0);
        assert_eq!(viewports(&atlas), vec![None]);
    }

    #[test]
    fn test_empty_layout_is_noop() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 256, 256);
        assert!(atlas.layout(false).is_ok());
        assert_eq!(atlas.status(), LayoutStatus::Pending);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let sizes = [128, 64, 256, 64, 32, 512, 128, 128, 64, 16, 256];
        let run = || {
            let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 1024, 1024);
            for &s in &sizes {
                atlas.reserve(request(s));
            }
            atlas.layout(true).unwrap();
            viewports(&atlas)
        };
        let first = run();
        assert_eq!(first, run());
        assert_eq!(first[0], Some(Viewport::new(0, 0, 128, 128)));
        assert_eq!(first[5], Some(Viewport::new(0, 256, 512, 512)));
    }

    #[test]
    fn test_fitting_sequences_never_overlap() {
        // Equal square sizes that divide the atlas always fit when the
        // total area does.
        for size in [16u32, 32, 64, 128, 256] {
            let per_side = 512 / size;
            let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 512, 512);
            for _ in 0..per_side * per_side {
                atlas.reserve(request(size));
            }
            assert!(atlas.layout(false).is_ok(), "size {size}");
            assert_valid(&atlas);
        }

        // Mixed heights in one column width.
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 256, 1024);
        for h in [100, 200, 50, 300, 25, 349] {
            atlas.reserve(rect_request(256, h));
        }
        assert!(atlas.layout(false).is_ok());
        assert_valid(&atlas);
    }

    #[test]
    fn test_render_records_placed_requests() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 512, 512);
        let mut a = request(256);
        a.light_index = 4;
        let mut b = request(256);
        b.light_index = 9;
        b.slice = 2;
        atlas.reserve(a);
        atlas.reserve(b);
        atlas.layout(false).unwrap();

        let mut list = CommandList::new();
        assert_eq!(atlas.render(&mut list), 2);
        let commands = list.commands();
        assert_eq!(commands[0], Command::ClearDepth(RenderTargetId::ShadowAtlas));
        assert_eq!(commands[1], Command::SetViewport(Viewport::new(0, 0, 256, 256)));
        assert_eq!(
            commands[6],
            Command::DrawShadows {
                light_index: 9,
                slice: 2
            }
        );
        assert_eq!(commands.last(), Some(&Command::ResetViewport));
    }

    #[test]
    fn test_render_with_nothing_placed_still_resets() {
        let mut atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 64, 64);
        atlas.reserve(request(128));
        let _ = atlas.layout(false);

        let mut list = CommandList::new();
        assert_eq!(atlas.render(&mut list), 0);
        assert_eq!(
            list.commands(),
            &[
                Command::ClearDepth(RenderTargetId::ShadowAtlas),
                Command::ResetViewport
            ]
        );
    }

    #[test]
    fn test_render_empty_atlas_records_nothing() {
        let atlas = ShadowAtlas::new(RenderTargetId::ShadowAtlas, 64, 64);
        let mut list = CommandList::new();
        assert_eq!(atlas.render(&mut list), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_viewport_overlap() {
        let a = Viewport::new(0, 0, 10, 10);
        assert!(a.overlaps(&Viewport::new(5, 5, 10, 10)));
        assert!(!a.overlaps(&Viewport::new(10, 0, 10, 10)));
        assert!(!a.overlaps(&Viewport::new(0, 10, 10, 10)));
        assert!(a.fits_in(10, 10));
        assert!(!a.fits_in(9, 10));
    }
}
