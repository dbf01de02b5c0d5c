use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Byte size of one shader identifier, fixed for a compiled pipeline.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;

/// Opaque identifier bytes for one shader export. Callers copy these into
/// binding-table records verbatim; only the dispatch kernel interprets them
/// (it reads the leading word as its shading selector).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE]);

/// Shader-identifier lookup against a compiled ray-tracing pipeline.
/// An unknown export name is a fatal configuration error: the pipeline was
/// not built with that export.
pub trait ShaderIdentifierLookup {
    fn shader_identifier(&self, name: &str) -> Result<ShaderIdentifier>;

    fn identifier_size(&self) -> usize {
        SHADER_IDENTIFIER_SIZE
    }
}

/// Export names the dispatch kernel is compiled with, in selector order.
/// The kernel's shading-selector constants index into this list, so the
/// order here and in `shaders/raytrace.wgsl` must agree.
pub const PIPELINE_EXPORTS: [&str; 4] = ["RayGen", "Miss", "HitGroup", "PlaneHitGroup"];

/// The compiled ray-tracing pipeline: the ray-query dispatch kernel plus the
/// shader identifiers of its exports.
pub struct RayPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    identifiers: HashMap<String, ShaderIdentifier>,
}

impl RayPipeline {
    /// Compiles the dispatch kernel against the output-image format and
    /// registers the kernel's exports.
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat) -> Result<Self> {
        let source = kernel_source(output_format)?;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ray dispatch kernel"),
            source: wgpu::ShaderSource::Wgsl(source),
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("ray dispatch bind group layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::AccelerationStructure {
                            vertex_return: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: output_format,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 5,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("ray dispatch pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: None,
                    bind_group_layouts: &[&bind_group_layout],
                    immediate_size: 0,
                }),
            ),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let identifiers = PIPELINE_EXPORTS
            .iter()
            .enumerate()
            .map(|(index, name)| (name.to_string(), make_identifier(index as u32, name)))
            .collect();

        Ok(Self {
            pipeline,
            bind_group_layout,
            identifiers,
        })
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }
}

impl ShaderIdentifierLookup for RayPipeline {
    fn shader_identifier(&self, name: &str) -> Result<ShaderIdentifier> {
        self.identifiers
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownShaderExport(name.to_string()))
    }
}

fn kernel_source(output_format: wgpu::TextureFormat) -> Result<Cow<'static, str>> {
    let base = include_str!("shaders/raytrace.wgsl");
    match output_format {
        wgpu::TextureFormat::Rgba8Unorm => Ok(Cow::Borrowed(base)),
        wgpu::TextureFormat::Bgra8Unorm => {
            Ok(Cow::Owned(base.replace("rgba8unorm", "bgra8unorm")))
        }
        other => Err(Error::UnsupportedSurfaceFormat(other)),
    }
}

fn make_identifier(index: u32, name: &str) -> ShaderIdentifier {
    let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
    bytes[..4].copy_from_slice(&index.to_le_bytes());
    for (slot, byte) in bytes[4..].iter_mut().zip(name.bytes().cycle()) {
        *slot = byte;
    }
    ShaderIdentifier(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_distinct_per_export() {
        let a = make_identifier(0, "RayGen");
        let b = make_identifier(1, "Miss");
        let c = make_identifier(2, "Miss");
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn identifier_leading_word_is_the_selector() {
        let id = make_identifier(3, "PlaneHitGroup");
        assert_eq!(u32::from_le_bytes(id.0[..4].try_into().unwrap()), 3);
    }
}
