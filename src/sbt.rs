//! Shader binding table assembly.
//!
//! The table is a packed byte blob with three sections (ray generation,
//! miss, hit groups). Every record in a section occupies that section's
//! stride: identifier bytes first, then the entry's root arguments, then
//! zero padding up to the stride. The dispatch kernel walks the table with
//! the strides published in [`SbtLayout`].

use std::num::NonZeroU64;

use crate::accel::tlas::RootArgument;
use crate::error::{Error, Result};
use crate::pipeline::ShaderIdentifierLookup;

/// Records within a section are padded to a multiple of this.
pub const RECORD_ALIGNMENT: u64 = 32;
/// Each section starts at a multiple of this, and the table's total size is
/// rounded up to it.
pub const TABLE_ALIGNMENT: u64 = 64;
/// Every root argument serializes to this many bytes.
pub const ROOT_ARGUMENT_SIZE: u64 = 8;

/// One table record: a shader export plus its root arguments.
#[derive(Debug, Clone)]
pub struct SbtEntry {
    pub name: String,
    pub args: Vec<RootArgument>,
}

impl SbtEntry {
    pub fn new(name: impl Into<String>, args: Vec<RootArgument>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Placement of one section within the encoded table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectionLayout {
    pub offset: u64,
    pub stride: u64,
    pub size: u64,
    pub entry_count: u32,
}

/// Placement of all three sections. The dispatch kernel receives these
/// offsets and strides as uniforms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SbtLayout {
    pub ray_gen: SectionLayout,
    pub miss: SectionLayout,
    pub hit_group: SectionLayout,
    pub total_size: u64,
}

/// Collects entries across a build cycle and encodes them into the table
/// blob. After a successful encode the generator is sealed; it must be
/// `reset` before entries for the next cycle can be added.
#[derive(Default)]
pub struct SbtGenerator {
    ray_gen: Vec<SbtEntry>,
    miss: Vec<SbtEntry>,
    hit_groups: Vec<SbtEntry>,
    generated: bool,
}

impl SbtGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all entries and reopens the generator for a new cycle.
    pub fn reset(&mut self) {
        self.ray_gen.clear();
        self.miss.clear();
        self.hit_groups.clear();
        self.generated = false;
    }

    pub fn add_ray_generation_program(&mut self, entry: SbtEntry) -> Result<()> {
        self.push(Section::RayGen, entry)
    }

    pub fn add_miss_program(&mut self, entry: SbtEntry) -> Result<()> {
        self.push(Section::Miss, entry)
    }

    /// Hit groups are addressed by record index, so the order of calls here
    /// must match the instance order in the instance table.
    pub fn add_hit_group(&mut self, entry: SbtEntry) -> Result<()> {
        self.push(Section::HitGroup, entry)
    }

    fn push(&mut self, section: Section, entry: SbtEntry) -> Result<()> {
        if self.generated {
            return Err(Error::ShaderTableNotReset);
        }
        match section {
            Section::RayGen => self.ray_gen.push(entry),
            Section::Miss => self.miss.push(entry),
            Section::HitGroup => self.hit_groups.push(entry),
        }
        Ok(())
    }

    /// Computes the layout of the table the current entries would encode to.
    /// Pure and idempotent; safe to call for buffer sizing before `encode`.
    pub fn compute_size(&self, identifier_size: usize) -> SbtLayout {
        let ray_gen_stride = section_stride(identifier_size, &self.ray_gen);
        let miss_stride = section_stride(identifier_size, &self.miss);
        let hit_stride = section_stride(identifier_size, &self.hit_groups);

        let ray_gen = SectionLayout {
            offset: 0,
            stride: ray_gen_stride,
            size: ray_gen_stride * self.ray_gen.len() as u64,
            entry_count: self.ray_gen.len() as u32,
        };
        let miss_offset = align_up(ray_gen.offset + ray_gen.size, TABLE_ALIGNMENT);
        let miss = SectionLayout {
            offset: miss_offset,
            stride: miss_stride,
            size: miss_stride * self.miss.len() as u64,
            entry_count: self.miss.len() as u32,
        };
        let hit_offset = align_up(miss.offset + miss.size, TABLE_ALIGNMENT);
        let hit_group = SectionLayout {
            offset: hit_offset,
            stride: hit_stride,
            size: hit_stride * self.hit_groups.len() as u64,
            entry_count: self.hit_groups.len() as u32,
        };

        SbtLayout {
            ray_gen,
            miss,
            hit_group,
            total_size: align_up(hit_group.offset + hit_group.size, TABLE_ALIGNMENT),
        }
    }

    /// Encodes the table into a byte blob and seals the generator. An
    /// entirely empty table is a configuration error, not a zero-byte
    /// upload.
    pub fn encode(&mut self, lookup: &dyn ShaderIdentifierLookup) -> Result<(Vec<u8>, SbtLayout)> {
        if self.ray_gen.is_empty() && self.miss.is_empty() && self.hit_groups.is_empty() {
            return Err(Error::ShaderTableEmpty);
        }
        let layout = self.compute_size(lookup.identifier_size());
        let mut bytes = vec![0u8; layout.total_size as usize];
        encode_section(&mut bytes, &layout.ray_gen, &self.ray_gen, lookup)?;
        encode_section(&mut bytes, &layout.miss, &self.miss, lookup)?;
        encode_section(&mut bytes, &layout.hit_group, &self.hit_groups, lookup)?;
        self.generated = true;
        Ok((bytes, layout))
    }

    /// Encodes and uploads the table through a staging view that unmaps on
    /// drop, so the bytes land in `buffer` on the next submission.
    pub fn generate(
        &mut self,
        queue: &wgpu::Queue,
        buffer: &wgpu::Buffer,
        lookup: &dyn ShaderIdentifierLookup,
    ) -> Result<SbtLayout> {
        let (bytes, layout) = self.encode(lookup)?;
        let size = NonZeroU64::new(layout.total_size).ok_or(Error::ShaderTableMap)?;
        let mut view = queue
            .write_buffer_with(buffer, 0, size)
            .ok_or(Error::ShaderTableMap)?;
        view[..bytes.len()].copy_from_slice(&bytes);
        Ok(layout)
    }
}

enum Section {
    RayGen,
    Miss,
    HitGroup,
}

fn section_stride(identifier_size: usize, entries: &[SbtEntry]) -> u64 {
    let max_args = entries.iter().map(|e| e.args.len()).max().unwrap_or(0) as u64;
    align_up(
        identifier_size as u64 + ROOT_ARGUMENT_SIZE * max_args,
        RECORD_ALIGNMENT,
    )
}

fn encode_section(
    bytes: &mut [u8],
    layout: &SectionLayout,
    entries: &[SbtEntry],
    lookup: &dyn ShaderIdentifierLookup,
) -> Result<()> {
    let identifier_size = lookup.identifier_size();
    for (index, entry) in entries.iter().enumerate() {
        let identifier = lookup.shader_identifier(&entry.name)?;
        let start = (layout.offset + layout.stride * index as u64) as usize;
        bytes[start..start + identifier_size].copy_from_slice(&identifier.0);
        let mut cursor = start + identifier_size;
        for arg in &entry.args {
            bytes[cursor..cursor + ROOT_ARGUMENT_SIZE as usize].copy_from_slice(&arg.to_bytes());
            cursor += ROOT_ARGUMENT_SIZE as usize;
        }
    }
    Ok(())
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ShaderIdentifier, SHADER_IDENTIFIER_SIZE};

    struct FakeLookup;

    impl ShaderIdentifierLookup for FakeLookup {
        fn shader_identifier(&self, name: &str) -> Result<ShaderIdentifier> {
            let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
            for (slot, byte) in bytes.iter_mut().zip(name.bytes().cycle()) {
                *slot = byte;
            }
            Ok(ShaderIdentifier(bytes))
        }
    }

    fn demo_generator() -> SbtGenerator {
        let mut sbt = SbtGenerator::new();
        sbt.add_ray_generation_program(SbtEntry::new("RayGen", vec![]))
            .unwrap();
        sbt.add_miss_program(SbtEntry::new("Miss", vec![RootArgument::Constant(7)]))
            .unwrap();
        sbt.add_hit_group(SbtEntry::new(
            "HitGroup",
            vec![RootArgument::Address(0x1000)],
        ))
        .unwrap();
        sbt.add_hit_group(SbtEntry::new("PlaneHitGroup", vec![]))
            .unwrap();
        sbt
    }

    #[test]
    fn compute_size_is_idempotent() {
        let sbt = demo_generator();
        let a = sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        let b = sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        assert_eq!(a, b);
    }

    #[test]
    fn stride_covers_the_widest_record_in_each_section() {
        // 32-byte identifier plus one 8-byte argument rounds to 64, and
        // every record in the section pays that stride.
        let sbt = demo_generator();
        let layout = sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        assert_eq!(layout.ray_gen.stride, 32);
        assert_eq!(layout.miss.stride, 64);
        assert_eq!(layout.hit_group.stride, 64);
        assert_eq!(layout.hit_group.size, 128);
    }

    #[test]
    fn sections_start_on_table_alignment() {
        let sbt = demo_generator();
        let layout = sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        assert_eq!(layout.ray_gen.offset % TABLE_ALIGNMENT, 0);
        assert_eq!(layout.miss.offset % TABLE_ALIGNMENT, 0);
        assert_eq!(layout.hit_group.offset % TABLE_ALIGNMENT, 0);
        assert_eq!(layout.total_size % TABLE_ALIGNMENT, 0);
        assert!(layout.miss.offset >= layout.ray_gen.offset + layout.ray_gen.size);
        assert!(layout.hit_group.offset >= layout.miss.offset + layout.miss.size);
    }

    #[test]
    fn encode_places_identifiers_and_arguments() {
        let mut sbt = demo_generator();
        let (bytes, layout) = sbt.encode(&FakeLookup).unwrap();
        assert_eq!(bytes.len() as u64, layout.total_size);

        let id = FakeLookup.shader_identifier("HitGroup").unwrap();
        let start = layout.hit_group.offset as usize;
        assert_eq!(&bytes[start..start + SHADER_IDENTIFIER_SIZE], &id.0);
        let arg_start = start + SHADER_IDENTIFIER_SIZE;
        assert_eq!(
            u64::from_le_bytes(bytes[arg_start..arg_start + 8].try_into().unwrap()),
            0x1000
        );

        // Second hit record sits one stride later.
        let plane = FakeLookup.shader_identifier("PlaneHitGroup").unwrap();
        let second = start + layout.hit_group.stride as usize;
        assert_eq!(&bytes[second..second + SHADER_IDENTIFIER_SIZE], &plane.0);
    }

    #[test]
    fn shared_hit_group_keeps_per_instance_arguments_in_order() {
        let mut sbt = SbtGenerator::new();
        for i in 0..3u64 {
            sbt.add_hit_group(SbtEntry::new(
                "HitGroup",
                vec![RootArgument::Address(0x2000 + i * 16)],
            ))
            .unwrap();
        }
        let (bytes, layout) = sbt.encode(&FakeLookup).unwrap();
        assert_eq!(layout.hit_group.entry_count, 3);
        assert_eq!(layout.hit_group.stride, 64);
        for i in 0..3u64 {
            let base = (layout.hit_group.offset + layout.hit_group.stride * i) as usize;
            let arg = base + SHADER_IDENTIFIER_SIZE;
            assert_eq!(
                u64::from_le_bytes(bytes[arg..arg + 8].try_into().unwrap()),
                0x2000 + i * 16
            );
        }
    }

    #[test]
    fn adding_after_encode_requires_reset() {
        let mut sbt = demo_generator();
        sbt.encode(&FakeLookup).unwrap();

        let err = sbt
            .add_hit_group(SbtEntry::new("HitGroup", vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::ShaderTableNotReset));

        sbt.reset();
        sbt.add_ray_generation_program(SbtEntry::new("RayGen", vec![]))
            .unwrap();
        sbt.add_hit_group(SbtEntry::new("HitGroup", vec![])).unwrap();
        let (_, layout) = sbt.encode(&FakeLookup).unwrap();
        assert_eq!(layout.hit_group.entry_count, 1);
    }

    #[test]
    fn generating_an_empty_table_is_a_configuration_error() {
        let mut sbt = SbtGenerator::new();
        assert!(matches!(sbt.encode(&FakeLookup), Err(Error::ShaderTableEmpty)));
        // The generator stays usable once entries arrive.
        sbt.add_ray_generation_program(SbtEntry::new("RayGen", vec![]))
            .unwrap();
        assert!(sbt.encode(&FakeLookup).is_ok());
    }

    #[test]
    fn unknown_export_fails_encode() {
        struct Strict;
        impl ShaderIdentifierLookup for Strict {
            fn shader_identifier(&self, name: &str) -> Result<ShaderIdentifier> {
                Err(Error::UnknownShaderExport(name.to_string()))
            }
        }
        let mut sbt = SbtGenerator::new();
        sbt.add_miss_program(SbtEntry::new("Missing", vec![])).unwrap();
        assert!(matches!(
            sbt.encode(&Strict),
            Err(Error::UnknownShaderExport(_))
        ));
    }
}
