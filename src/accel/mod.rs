//! Acceleration-structure building: per-model bottom-level structures, the
//! scene-wide top-level structure, and the sizing queries that gate their
//! allocation.

pub mod blas;
pub mod tlas;

pub use blas::{build_blas, encode_blas_build};
pub use tlas::{Instance, InstanceTable, RootArgument, TlasBuildMode, TlasBuilder};

/// Size of one TLAS instance-descriptor record (transform + structure
/// address + hit-group index + mask), fixed by the GPU instance format.
pub const INSTANCE_DESC_SIZE: u64 = 64;

const ACCEL_ALIGNMENT: u64 = 256;
const BLAS_RESULT_BASE: u64 = 256;
const BLAS_RESULT_PER_TRIANGLE: u64 = 64;
const BLAS_SCRATCH_BASE: u64 = 256;
const BLAS_SCRATCH_PER_TRIANGLE: u64 = 64;
const TLAS_RESULT_BASE: u64 = 256;
const TLAS_RESULT_PER_INSTANCE: u64 = 128;
const TLAS_SCRATCH_BASE: u64 = 256;
const TLAS_SCRATCH_PER_INSTANCE: u64 = 16;

/// Scratch and result byte sizes for one bottom-level build.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccelSizes {
    pub scratch: u64,
    pub result: u64,
}

/// Scratch, result and instance-descriptor byte sizes for one top-level
/// build over a given instance count.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TlasSizes {
    pub scratch: u64,
    pub result: u64,
    pub instance_desc: u64,
}

/// Host-side sizing query for a bottom-level build over `triangle_count`
/// triangles.
///
/// The device performs its own exact-fit allocation from the same geometry
/// descriptors, which is what upholds the never-smaller-than-queried
/// precondition; this query is the conservative host mirror that drives
/// reallocation decisions, staging allocation and build diagnostics. It is
/// non-decreasing in `triangle_count` by construction.
pub fn blas_sizes(triangle_count: u64) -> AccelSizes {
    AccelSizes {
        scratch: align_up(
            BLAS_SCRATCH_BASE + triangle_count * BLAS_SCRATCH_PER_TRIANGLE,
            ACCEL_ALIGNMENT,
        ),
        result: align_up(
            BLAS_RESULT_BASE + triangle_count * BLAS_RESULT_PER_TRIANGLE,
            ACCEL_ALIGNMENT,
        ),
    }
}

/// Host-side sizing query for a top-level build over `instance_count`
/// instances. Zero instances is a valid input and yields the minimum
/// scratch/result sizes with an empty descriptor block.
pub fn tlas_sizes(instance_count: u32) -> TlasSizes {
    let count = instance_count as u64;
    TlasSizes {
        scratch: align_up(
            TLAS_SCRATCH_BASE + count * TLAS_SCRATCH_PER_INSTANCE,
            ACCEL_ALIGNMENT,
        ),
        result: align_up(
            TLAS_RESULT_BASE + count * TLAS_RESULT_PER_INSTANCE,
            ACCEL_ALIGNMENT,
        ),
        instance_desc: count * INSTANCE_DESC_SIZE,
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlas_sizes_are_monotonic_in_instance_count() {
        let mut previous = tlas_sizes(0);
        for count in 1..256 {
            let current = tlas_sizes(count);
            assert!(current.scratch >= previous.scratch);
            assert!(current.result >= previous.result);
            assert!(current.instance_desc >= previous.instance_desc);
            previous = current;
        }
    }

    #[test]
    fn zero_instances_still_sizes_a_valid_structure() {
        let sizes = tlas_sizes(0);
        assert_eq!(sizes.instance_desc, 0);
        assert!(sizes.scratch > 0);
        assert!(sizes.result > 0);
    }

    #[test]
    fn same_instance_count_queries_identical_sizes() {
        // A refit over an unchanged instance set must not change the
        // required result-buffer size.
        assert_eq!(tlas_sizes(17), tlas_sizes(17));
    }

    #[test]
    fn blas_sizes_are_monotonic_in_triangle_count() {
        let mut previous = blas_sizes(0);
        for triangles in 1..512 {
            let current = blas_sizes(triangles);
            assert!(current.scratch >= previous.scratch);
            assert!(current.result >= previous.result);
            previous = current;
        }
    }

    #[test]
    fn sizes_are_alignment_rounded() {
        let sizes = tlas_sizes(3);
        assert_eq!(sizes.scratch % ACCEL_ALIGNMENT, 0);
        assert_eq!(sizes.result % ACCEL_ALIGNMENT, 0);
    }
}
