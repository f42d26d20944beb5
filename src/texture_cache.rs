//! Texture slice cache
//!
//! Maps host textures (cookies, reflection cubemaps) onto the slices of a
//! fixed-capacity texture array. Slices are recycled least-recently-used
//! across frames; a slice touched in the current frame is never evicted.

use std::collections::HashMap;

use crate::command::{CommandSink, GlobalTexture, TextureArrayId};
use crate::config::TextureCacheSettings;
use crate::error::Result;

/// Opaque handle to a host texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// A slice copy the backend could not perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceUploadFailure {
    pub array: TextureArrayId,
    pub slice: u32,
    pub texture: TextureHandle,
}

#[derive(Debug, Clone, Copy)]
struct Slice {
    texture: Option<TextureHandle>,
    last_used: u64,
}

/// Fixed-capacity texture array allocator.
#[derive(Debug, Clone)]
pub struct TextureSliceCache {
    array: TextureArrayId,
    slices: Vec<Slice>,
    locator: HashMap<TextureHandle, u32>,
    pending_uploads: Vec<(u32, TextureHandle)>,
    frame: u64,
}

impl TextureSliceCache {
    /// Create a cache over `capacity` slices of `array`.
    pub fn new(array: TextureArrayId, capacity: u32) -> Self {
        Self {
            array,
            slices: vec![
                Slice {
                    texture: None,
                    last_used: 0,
                };
                capacity as usize
            ],
            locator: HashMap::new(),
            pending_uploads: Vec::new(),
            frame: 0,
        }
    }

    /// The texture array this cache fills.
    pub fn array(&self) -> TextureArrayId {
        self.array
    }

    /// Number of slices.
    pub fn capacity(&self) -> u32 {
        self.slices.len() as u32
    }

    /// Number of slices currently holding a texture.
    pub fn occupied(&self) -> usize {
        self.locator.len()
    }

    /// Start a new frame. Call once per frame before any [`fetch_slice`].
    ///
    /// [`fetch_slice`]: Self::fetch_slice
    pub fn new_frame(&mut self) {
        self.frame += 1;
    }

    /// Slice holding `texture`, assigning one if needed.
    ///
    /// Returns `None` when every slice is in use this frame.
    pub fn fetch_slice(&mut self, texture: TextureHandle) -> Option<u32> {
        if let Some(&index) = self.locator.get(&texture) {
            self.slices[index as usize].last_used = self.frame;
            return Some(index);
        }

        let index = self.find_victim()?;
        let slice = &mut self.slices[index as usize];
        if let Some(evicted) = slice.texture.replace(texture) {
            self.locator.remove(&evicted);
            self.pending_uploads.retain(|(s, _)| *s != index);
            tracing::trace!(?evicted, slice = index, "evicted texture slice");
        }
        slice.last_used = self.frame;
        self.locator.insert(texture, index);
        self.pending_uploads.push((index, texture));
        Some(index)
    }

    /// Free slice first, then the least recently used slice not touched this frame.
    fn find_victim(&self) -> Option<u32> {
        if let Some(free) = self.slices.iter().position(|s| s.texture.is_none()) {
            return Some(free as u32);
        }

        self.slices
            .iter()
            .enumerate()
            .filter(|(_, s)| s.last_used < self.frame)
            .min_by_key(|(i, s)| (s.last_used, *i))
            .map(|(i, _)| i as u32)
    }

    /// Record copies for every slice assigned since the last flush.
    pub fn flush_uploads(&mut self, sink: &mut dyn CommandSink) -> usize {
        let count = self.pending_uploads.len();
        for (slice, texture) in self.pending_uploads.drain(..) {
            sink.upload_texture_slice(self.array, slice, texture);
        }
        count
    }

    /// Forget `texture` if it still occupies `slice`, so the next
    /// [`fetch_slice`] assigns it again and records a fresh upload.
    ///
    /// Returns whether anything was dropped.
    ///
    /// [`fetch_slice`]: Self::fetch_slice
    pub fn evict(&mut self, slice: u32, texture: TextureHandle) -> bool {
        let Some(entry) = self.slices.get_mut(slice as usize) else {
            return false;
        };
        if entry.texture != Some(texture) {
            return false;
        }
        entry.texture = None;
        entry.last_used = 0;
        self.locator.remove(&texture);
        self.pending_uploads.retain(|(s, _)| *s != slice);
        true
    }

    /// Forget every texture. Used when the backing array is reallocated.
    pub fn invalidate(&mut self) {
        for slice in &mut self.slices {
            slice.texture = None;
            slice.last_used = 0;
        }
        self.locator.clear();
        self.pending_uploads.clear();
    }
}

/// The three texture arrays lights sample from.
#[derive(Debug, Clone)]
pub struct LightTextureCaches {
    /// 2D cookies for spot, directional and area lights.
    pub cookies: TextureSliceCache,
    /// Cube cookies for point lights.
    pub cube_cookies: TextureSliceCache,
    /// Reflection probe cubemaps.
    pub reflection_probes: TextureSliceCache,
    settings: TextureCacheSettings,
    allocated: bool,
}

impl LightTextureCaches {
    pub fn new(settings: TextureCacheSettings) -> Self {
        Self {
            cookies: TextureSliceCache::new(TextureArrayId::Cookies, settings.cookie_slices),
            cube_cookies: TextureSliceCache::new(
                TextureArrayId::CubeCookies,
                settings.cube_cookie_slices,
            ),
            reflection_probes: TextureSliceCache::new(
                TextureArrayId::ReflectionProbes,
                settings.reflection_slices,
            ),
            settings,
            allocated: false,
        }
    }

    /// Advance the LRU clock of every cache.
    pub fn new_frame(&mut self) {
        self.cookies.new_frame();
        self.cube_cookies.new_frame();
        self.reflection_probes.new_frame();
    }

    /// Allocate the backing arrays on first use.
    ///
    /// Cached slices are forgotten if the arrays had to be (re)created.
    pub fn ensure_allocated(&mut self, sink: &mut dyn CommandSink) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let s = self.settings;
        for (array, size, slices, cube) in [
            (TextureArrayId::Cookies, s.cookie_size, s.cookie_slices, false),
            (
                TextureArrayId::CubeCookies,
                s.cube_cookie_size,
                s.cube_cookie_slices,
                true,
            ),
            (
                TextureArrayId::ReflectionProbes,
                s.reflection_size,
                s.reflection_slices,
                true,
            ),
        ] {
            sink.allocate_texture_array(array, size, slices.max(1), cube)?;
        }
        self.cookies.invalidate();
        self.cube_cookies.invalidate();
        self.reflection_probes.invalidate();
        self.allocated = true;
        Ok(())
    }

    /// Record the copies for every newly assigned slice.
    pub fn flush_uploads(&mut self, sink: &mut dyn CommandSink) -> usize {
        self.cookies.flush_uploads(sink)
            + self.cube_cookies.flush_uploads(sink)
            + self.reflection_probes.flush_uploads(sink)
    }

    /// Cache filling `array`.
    pub fn cache_mut(&mut self, array: TextureArrayId) -> &mut TextureSliceCache {
        match array {
            TextureArrayId::Cookies => &mut self.cookies,
            TextureArrayId::CubeCookies => &mut self.cube_cookies,
            TextureArrayId::ReflectionProbes => &mut self.reflection_probes,
        }
    }

    /// Drop slices whose copy failed so they are uploaded again next frame.
    pub fn report_failed_uploads(&mut self, failures: &[SliceUploadFailure]) {
        for failure in failures {
            if self.cache_mut(failure.array).evict(failure.slice, failure.texture) {
                tracing::debug!(?failure, "texture slice will be uploaded again");
            }
        }
    }

    /// Bind all three arrays for shading.
    pub fn bind(&self, sink: &mut dyn CommandSink) {
        for array in [
            TextureArrayId::Cookies,
            TextureArrayId::CubeCookies,
            TextureArrayId::ReflectionProbes,
        ] {
            sink.bind_global_texture(GlobalTexture::Array(array));
        }
    }
}
