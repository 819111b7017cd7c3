//! Per-batch upload ops and their commit.

use bumpalo::Bump;
use glam::Mat4;
use rayon::prelude::*;

use super::staging::StagingBuffer;
use crate::archetype::{GraphicsArchetypeRegistry, PropertyId};
use crate::batch::{BatchManager, BUFFER_HEADER_SIZE};
use crate::config::RenderConfig;
use tessera_core::{ByteStash, ObjectId, Stash};

/// Bytes of one packed 3x4 matrix.
pub const PACKED_MATRIX_SIZE: usize = 48;

/// Where an upload op writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    /// The zeroed buffer header, written once.
    Header,
    /// Object-to-world and world-to-object matrices of every object.
    Matrices {
        /// Buffer offset of the object-to-world array.
        transform_dst: u64,
        /// Buffer offset of the world-to-object array.
        inverse_dst: u64,
    },
    /// One override property copied from its byte stash.
    Raw {
        /// Override slot the bytes come from.
        override_slot: usize,
        /// Bytes per object.
        stride: u32,
        /// Buffer offset of the property array.
        dst: u64,
    },
}

/// One copy from staging into the GPU buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadOp {
    /// Batch the op refreshes, unused for the header.
    pub batch_index: u32,
    /// Objects covered.
    pub object_count: u32,
    /// First staging byte.
    pub staging_offset: usize,
    /// What the op writes.
    pub kind: UploadKind,
}

impl UploadOp {
    /// Returns the staging bytes the op fills.
    #[must_use]
    pub const fn staging_size(&self) -> usize {
        let objects = self.object_count as usize;
        match self.kind {
            UploadKind::Header => BUFFER_HEADER_SIZE as usize,
            UploadKind::Matrices { .. } => objects * PACKED_MATRIX_SIZE * 2,
            UploadKind::Raw { stride, .. } => objects * stride as usize,
        }
    }
}

/// Per-object data the uploader reads.
#[derive(Clone, Copy)]
pub struct UploadSources<'a> {
    /// Object-to-world transforms; missing entries upload as identity.
    pub transforms: &'a Stash<Mat4>,
    /// Override bytes by override slot; missing entries upload as zeros.
    pub overrides: &'a [ByteStash],
}

/// Counters of one upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Batches refreshed.
    pub batches: u32,
    /// Ops committed.
    pub ops: u32,
    /// Staging bytes committed.
    pub bytes: u64,
    /// Whether the header was written this time.
    pub header_written: bool,
    /// Batches outside the current buffer.
    pub skipped_non_resident: u32,
    /// Whether the staging buffer could not hold the frame.
    pub staging_failed: bool,
}

/// Refreshes the GPU copy of every allocated batch.
///
/// # Example
///
/// ```rust,ignore
/// let mut uploader = GpuUploader::new(&config);
/// let report = pool.install(|| uploader.upload(&mut batches, &registry, &sources, arenas.primary().bump()));
/// ```
#[derive(Debug)]
pub struct GpuUploader {
    staging: StagingBuffer,
    ops: Vec<UploadOp>,
    header_written: bool,
}

impl GpuUploader {
    /// Creates an uploader with the configured staging sizes.
    #[must_use]
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            staging: StagingBuffer::new(config.initial_staging_size, config.max_staging_size),
            ops: Vec::new(),
            header_written: false,
        }
    }

    /// Returns the staging buffer.
    #[inline]
    #[must_use]
    pub const fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    /// Returns the ops of the last upload.
    #[inline]
    #[must_use]
    pub fn ops(&self) -> &[UploadOp] {
        &self.ops
    }

    /// Builds, fills and commits this frame's upload ops.
    ///
    /// Fills run in parallel; call it inside the worker pool. If the
    /// staging buffer cannot grow, nothing is written and the GPU keeps
    /// last frame's data. The fill job list lives in `bump`.
    #[tracing::instrument(skip_all, name = "gpu_upload")]
    pub fn upload(
        &mut self,
        batches: &mut BatchManager,
        registry: &GraphicsArchetypeRegistry,
        sources: &UploadSources<'_>,
        bump: &Bump,
    ) -> UploadReport {
        let mut report = UploadReport::default();
        let total = self.build_ops(batches, registry, &mut report);

        if !self.staging.reserve(total) {
            report.staging_failed = true;
            return report;
        }

        self.fill(batches, registry, sources, total, bump);

        let staging = self.staging.bytes(total);
        let buffer = batches.buffer_mut();
        for op in &self.ops {
            let start = op.staging_offset;
            match op.kind {
                UploadKind::Header => {
                    buffer.write(0, &staging[start..start + op.staging_size()]);
                    report.header_written = true;
                }
                UploadKind::Matrices {
                    transform_dst,
                    inverse_dst,
                } => {
                    let half = op.object_count as usize * PACKED_MATRIX_SIZE;
                    buffer.write(transform_dst, &staging[start..start + half]);
                    buffer.write(inverse_dst, &staging[start + half..start + 2 * half]);
                }
                UploadKind::Raw { dst, .. } => {
                    buffer.write(dst, &staging[start..start + op.staging_size()]);
                }
            }
        }
        self.header_written |= report.header_written;

        report.ops = u32::try_from(self.ops.len()).unwrap_or(u32::MAX);
        report.bytes = total as u64;
        tracing::debug!(
            batches = report.batches,
            ops = report.ops,
            bytes = report.bytes,
            "batch data uploaded"
        );
        report
    }

    /// Lists the ops and their staging offsets; returns the total size.
    fn build_ops(
        &mut self,
        batches: &BatchManager,
        registry: &GraphicsArchetypeRegistry,
        report: &mut UploadReport,
    ) -> usize {
        self.ops.clear();
        let mut cursor = 0usize;
        let mut push = |ops: &mut Vec<UploadOp>, op: UploadOp| {
            let op = UploadOp {
                staging_offset: cursor,
                ..op
            };
            cursor += op.staging_size();
            ops.push(op);
        };

        if !self.header_written {
            push(
                &mut self.ops,
                UploadOp {
                    batch_index: 0,
                    object_count: 0,
                    staging_offset: 0,
                    kind: UploadKind::Header,
                },
            );
        }

        let catalog = registry.catalog();
        for (batch_index, batch) in batches.iter() {
            if batch.object_count == 0 {
                continue;
            }
            if !batches.is_resident(batch) {
                report.skipped_non_resident += 1;
                continue;
            }
            let Some(archetype) = registry.archetype(batch.archetype) else {
                continue;
            };
            report.batches += 1;

            let base = batch.block.begin;
            let offset = |property| u64::from(archetype.property_offset(property).unwrap_or(0));
            push(
                &mut self.ops,
                UploadOp {
                    batch_index,
                    object_count: batch.object_count,
                    staging_offset: 0,
                    kind: UploadKind::Matrices {
                        transform_dst: base + offset(PropertyId::OBJECT_TO_WORLD),
                        inverse_dst: base + offset(PropertyId::WORLD_TO_OBJECT),
                    },
                },
            );

            for &property in archetype.properties() {
                let (Some(override_slot), Some(info)) =
                    (catalog.override_slot(property), catalog.get(property))
                else {
                    continue;
                };
                push(
                    &mut self.ops,
                    UploadOp {
                        batch_index,
                        object_count: batch.object_count,
                        staging_offset: 0,
                        kind: UploadKind::Raw {
                            override_slot,
                            stride: info.size,
                            dst: base + offset(property),
                        },
                    },
                );
            }
        }
        cursor
    }

    /// Writes every op's staging bytes, one parallel job per op.
    fn fill(
        &mut self,
        batches: &BatchManager,
        registry: &GraphicsArchetypeRegistry,
        sources: &UploadSources<'_>,
        total: usize,
        bump: &Bump,
    ) {
        let mut jobs = bumpalo::collections::Vec::with_capacity_in(self.ops.len(), bump);
        let mut rest = self.staging.bytes_mut(total);
        for op in &self.ops {
            let (bytes, tail) = std::mem::take(&mut rest).split_at_mut(op.staging_size());
            rest = tail;
            jobs.push((op, bytes));
        }

        jobs.par_iter_mut().for_each(|(op, bytes)| {
            let bytes: &mut [u8] = bytes;
            let objects = batches
                .batch(op.batch_index)
                .and_then(|batch| {
                    registry
                        .archetype(batch.archetype)
                        .map(|archetype| archetype.batch_objects(batch.slot as usize))
                })
                .unwrap_or(&[]);
            match op.kind {
                UploadKind::Header => bytes.fill(0),
                UploadKind::Matrices { .. } => fill_matrices(objects, sources.transforms, bytes),
                UploadKind::Raw {
                    override_slot,
                    stride,
                    ..
                } => fill_raw(objects, sources.overrides.get(override_slot), stride as usize, bytes),
            }
        });
    }
}

/// Packs a matrix as its four columns without the last row.
fn pack_matrix(matrix: &Mat4) -> [f32; 12] {
    let (x, y, z, w) = (matrix.x_axis, matrix.y_axis, matrix.z_axis, matrix.w_axis);
    [x.x, x.y, x.z, y.x, y.y, y.z, z.x, z.y, z.z, w.x, w.y, w.z]
}

fn fill_matrices(objects: &[ObjectId], transforms: &Stash<Mat4>, bytes: &mut [u8]) {
    let (forward, inverse) = bytes.split_at_mut(bytes.len() / 2);
    let pairs = forward
        .chunks_exact_mut(PACKED_MATRIX_SIZE)
        .zip(inverse.chunks_exact_mut(PACKED_MATRIX_SIZE));
    for ((forward, inverse), id) in pairs.zip(objects) {
        let transform = transforms.get(*id).copied().unwrap_or(Mat4::IDENTITY);
        forward.copy_from_slice(bytemuck::bytes_of(&pack_matrix(&transform)));
        inverse.copy_from_slice(bytemuck::bytes_of(&pack_matrix(&transform.inverse())));
    }
}

fn fill_raw(objects: &[ObjectId], stash: Option<&ByteStash>, stride: usize, bytes: &mut [u8]) {
    if stride == 0 {
        return;
    }
    for (dst, id) in bytes.chunks_exact_mut(stride).zip(objects) {
        match stash.and_then(|stash| stash.get(*id)) {
            Some(src) if src.len() == stride => dst.copy_from_slice(src),
            _ => dst.fill(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_pack_matrix_drops_last_row() {
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let packed = pack_matrix(&matrix);
        assert_eq!(&packed[9..], &[1.0, 2.0, 3.0]);
        assert_eq!(&packed[..3], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_matrices_writes_inverse_half() {
        let mut transforms = Stash::new(4);
        let id = ObjectId::new(1, 0);
        transforms.insert(id, Mat4::from_scale(Vec3::splat(2.0)));

        let mut bytes = vec![0u8; 2 * PACKED_MATRIX_SIZE * 2];
        fill_matrices(&[id, ObjectId::new(2, 0)], &transforms, &mut bytes);

        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(floats[0], 2.0);
        // Missing transform uploads as identity.
        assert_eq!(floats[12], 1.0);
        // Inverse half starts after both forward matrices.
        assert_eq!(floats[24], 0.5);
    }

    #[test]
    fn test_fill_raw_zeroes_missing() {
        let mut stash = ByteStash::new(4, 4);
        let id = ObjectId::new(0, 0);
        assert!(stash.insert(id, &[1, 2, 3, 4]));

        let mut bytes = vec![0xFF; 8];
        fill_raw(&[id, ObjectId::new(3, 0)], Some(&stash), 4, &mut bytes);
        assert_eq!(bytes, vec![1, 2, 3, 4, 0, 0, 0, 0]);
    }
}
