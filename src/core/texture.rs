//! Texture abstractions
//!
//! Depth render targets for the shadow atlases and the 2D / cube texture
//! arrays cookies and reflection probes are copied into.

use crate::context::WgpuContext;

/// A depth texture used as a shadow atlas.
pub struct DepthTexture {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) size: wgpu::Extent3d,
}

impl DepthTexture {
    /// The depth format used by this texture.
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Create a new depth texture.
    pub fn new(ctx: &WgpuContext, width: u32, height: u32, label: Option<&str>) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            size,
        }
    }

    /// Resize the depth texture.
    pub fn resize(&mut self, ctx: &WgpuContext, width: u32, height: u32, label: Option<&str>) {
        if self.size.width != width || self.size.height != height {
            *self = Self::new(ctx, width, height, label);
        }
    }

    /// Get the texture view.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Get the texture size.
    pub fn size(&self) -> (u32, u32) {
        (self.size.width, self.size.height)
    }

    /// Create a comparison sampler for shadow lookups.
    pub fn create_comparison_sampler(ctx: &WgpuContext) -> wgpu::Sampler {
        ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow comparison sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        })
    }
}

/// A square texture array of 2D slices, or of cubemaps (6 layers each).
pub struct Texture2DArray {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) size: u32,
    pub(crate) slices: u32,
    pub(crate) cube: bool,
    pub(crate) format: wgpu::TextureFormat,
}

impl Texture2DArray {
    /// Format of cookie and reflection arrays.
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    /// Create an array of `slices` 2D layers.
    pub fn new(ctx: &WgpuContext, size: u32, slices: u32, label: Option<&str>) -> Self {
        Self::create(ctx, size, slices, false, label)
    }

    /// Create an array of `slices` cubemaps.
    pub fn new_cube(ctx: &WgpuContext, size: u32, slices: u32, label: Option<&str>) -> Self {
        Self::create(ctx, size, slices, true, label)
    }

    fn create(ctx: &WgpuContext, size: u32, slices: u32, cube: bool, label: Option<&str>) -> Self {
        let layers = Self::layers_for(slices, cube);
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label,
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(if cube {
                wgpu::TextureViewDimension::CubeArray
            } else {
                wgpu::TextureViewDimension::D2Array
            }),
            ..Default::default()
        });

        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: label.map(|l| format!("{} sampler", l)).as_deref(),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            size,
            slices,
            cube,
            format: Self::FORMAT,
        }
    }

    /// Array layers needed for `slices` slices.
    pub fn layers_for(slices: u32, cube: bool) -> u32 {
        if cube {
            slices * 6
        } else {
            slices
        }
    }

    /// Record a copy of `source` into one slice.
    ///
    /// The source must match the slice size and format; cube sources need
    /// 6 layers.
    pub fn copy_slice(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        slice: u32,
    ) -> anyhow::Result<()> {
        self.shape()
            .check_source(slice, source.size(), source.format())?;
        let layers = Self::layers_for(1, self.cube);

        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: slice * layers,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.size,
                height: self.size,
                depth_or_array_layers: layers,
            },
        );
        Ok(())
    }

    /// Slice geometry and format, for validating copies.
    pub fn shape(&self) -> SliceShape {
        SliceShape {
            size: self.size,
            slices: self.slices,
            cube: self.cube,
            format: self.format,
        }
    }

    /// Get the array view (all slices).
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Get the sampler.
    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Get the slice edge in texels.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Get the number of slices.
    pub fn slices(&self) -> u32 {
        self.slices
    }

    /// Whether slices are cubemaps.
    pub fn is_cube(&self) -> bool {
        self.cube
    }

    /// Get the texture format.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

/// What a source texture must look like to be copied into a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceShape {
    pub size: u32,
    pub slices: u32,
    pub cube: bool,
    pub format: wgpu::TextureFormat,
}

impl SliceShape {
    /// Check that a source of `extent` and `format` fits slice `slice`.
    pub fn check_source(
        &self,
        slice: u32,
        extent: wgpu::Extent3d,
        format: wgpu::TextureFormat,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(slice < self.slices, "slice {slice} out of {}", self.slices);
        let layers = Texture2DArray::layers_for(1, self.cube);
        anyhow::ensure!(
            extent.width == self.size
                && extent.height == self.size
                && extent.depth_or_array_layers >= layers
                && format == self.format,
            "source texture {}x{}x{} {:?} does not match slice {}x{}x{} {:?}",
            extent.width,
            extent.height,
            extent.depth_or_array_layers,
            format,
            self.size,
            self.size,
            layers,
            self.format
        );
        Ok(())
    }
}
