use glam::Mat4;

use crate::accel::{TlasSizes, tlas_sizes};
use crate::error::{Error, Result};

/// A value passed to a hit shader through its binding-table record: either a
/// raw GPU address (or byte offset standing in for one) or a small inline
/// constant. Each occupies one 8-byte slot in the record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RootArgument {
    Address(u64),
    Constant(u32),
}

impl RootArgument {
    pub fn to_bytes(self) -> [u8; 8] {
        match self {
            RootArgument::Address(addr) => addr.to_le_bytes(),
            RootArgument::Constant(value) => (value as u64).to_le_bytes(),
        }
    }
}

/// One scene instance: a world transform, shared ownership of a bottom-level
/// structure, the hit-group export shading it, and the root arguments its
/// hit shader consumes. Only the transform mutates after creation.
pub struct Instance {
    pub blas: wgpu::Blas,
    pub transform: Mat4,
    pub hit_group: String,
    pub root_args: Vec<RootArgument>,
    pub mask: u8,
}

/// Ordered set of scene instances. Order is load-bearing: an instance's
/// position is its hit-group record index in the shader binding table.
pub struct InstanceTable {
    instances: Vec<Instance>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
        }
    }

    pub fn add(&mut self, instance: Instance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Instance {
        self.instances.remove(index)
    }

    pub fn set_transform(&mut self, index: usize, transform: Mat4) {
        self.instances[index].transform = transform;
    }

    pub fn get(&self, index: usize) -> &Instance {
        &self.instances[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Caller-selected build mode. Mode is never inferred: a refit against a
/// changed instance set is a contract violation reported as an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlasBuildMode {
    /// First construction, or the geometry/instance set changed.
    Build,
    /// Same structure set and count, transforms only; updates the previous
    /// result in place, cheaper than a full rebuild.
    Refit,
}

/// Builds and owns the scene's top-level structure.
pub struct TlasBuilder {
    tlas: Option<wgpu::Tlas>,
    built_sizes: Option<TlasSizes>,
    built_count: Option<u32>,
}

impl TlasBuilder {
    pub fn new() -> Self {
        Self {
            tlas: None,
            built_sizes: None,
            built_count: None,
        }
    }

    /// The structure from the most recent build, bindable into the ray
    /// descriptor set once its build submission has retired.
    pub fn tlas(&self) -> Option<&wgpu::Tlas> {
        self.tlas.as_ref()
    }

    /// Emits one instance-descriptor record per table entry and records the
    /// build into the encoder. Sizing is queried for the exact instance
    /// count; all structure buffers are reallocated when it differs from
    /// the previous build. Zero instances produces an empty but valid
    /// structure.
    pub fn build(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        table: &InstanceTable,
        mode: TlasBuildMode,
    ) -> Result<&wgpu::Tlas> {
        let count = table.len() as u32;
        let sizes = tlas_sizes(count);

        match mode {
            TlasBuildMode::Build => {
                if self.tlas.is_none() || self.built_sizes != Some(sizes) {
                    log::debug!(
                        "TLAS allocation: {count} instances, scratch {} B, result {} B, descriptors {} B",
                        sizes.scratch,
                        sizes.result,
                        sizes.instance_desc,
                    );
                    self.tlas = Some(device.create_tlas(&wgpu::CreateTlasDescriptor {
                        label: Some("scene TLAS"),
                        max_instances: count,
                        flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE
                            | wgpu::AccelerationStructureFlags::ALLOW_UPDATE,
                        update_mode: wgpu::AccelerationStructureUpdateMode::PreferUpdate,
                    }));
                }
            }
            TlasBuildMode::Refit => validate_refit(self.built_count, count)?,
        }

        let Some(tlas) = self.tlas.as_mut() else {
            return Err(Error::RefitWithoutBuild);
        };

        for (index, instance) in table.iter().enumerate() {
            // The custom-data word carries the instance's hit-group record
            // index, which by table order is its own position.
            tlas[index] = Some(wgpu::TlasInstance::new(
                &instance.blas,
                pack_transform(instance.transform),
                index as u32,
                instance.mask,
            ));
        }

        encoder.build_acceleration_structures(None, Some(&*tlas));
        self.built_sizes = Some(sizes);
        self.built_count = Some(count);
        Ok(&*tlas)
    }
}

fn validate_refit(built: Option<u32>, requested: u32) -> Result<()> {
    match built {
        None => Err(Error::RefitWithoutBuild),
        Some(built) if built != requested => Err(Error::RefitShapeChanged { built, requested }),
        Some(_) => Ok(()),
    }
}

/// Row-major 4x3 transform, the layout instance-descriptor records expect.
pub fn pack_transform(transform: Mat4) -> [f32; 12] {
    let cols = transform.transpose().to_cols_array();
    let mut rows = [0.0; 12];
    rows.copy_from_slice(&cols[..12]);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn packed_transform_is_row_major_with_translation_last() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let rows = pack_transform(transform);
        assert_eq!(rows[3], 1.0);
        assert_eq!(rows[7], 2.0);
        assert_eq!(rows[11], 3.0);
        // Rotation block stays identity.
        assert_eq!(rows[0], 1.0);
        assert_eq!(rows[5], 1.0);
        assert_eq!(rows[10], 1.0);
    }

    #[test]
    fn fresh_builder_exposes_no_structure() {
        // Consumers binding the structure must observe `None` until the
        // first build and report it as their own not-built condition.
        assert!(TlasBuilder::new().tlas().is_none());
    }

    #[test]
    fn refit_requires_a_previous_build() {
        assert!(matches!(
            validate_refit(None, 4),
            Err(Error::RefitWithoutBuild)
        ));
    }

    #[test]
    fn refit_rejects_changed_instance_count() {
        assert!(matches!(
            validate_refit(Some(4), 5),
            Err(Error::RefitShapeChanged {
                built: 4,
                requested: 5
            })
        ));
        assert!(validate_refit(Some(4), 4).is_ok());
    }

    #[test]
    fn root_arguments_encode_little_endian_slots() {
        assert_eq!(
            RootArgument::Address(0x1122_3344_5566_7788).to_bytes(),
            [0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(
            RootArgument::Constant(7).to_bytes(),
            [7, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
