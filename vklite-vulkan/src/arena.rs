//! C5: the buffer arena and `Dat` handle. No direct teacher equivalent
//! survived retrieval — `zangfx_vulkan::heap` implements a general TLSF
//! suballocator (`xalloc::SysTlsf`), which is the wrong algorithm for this
//! component: the data model calls for a plain bump allocator with pow2
//! growth on overflow. Implemented directly from spec §4.4's six-step
//! algorithm; the builder idiom is still borrowed from
//! `zangfx_vulkan::heap::DynamicHeapBuilder`.

use ash::vk;
use log::debug;

use crate::buffer::{Buffer, BufferRegions, BufferUsage};
use crate::device::DeviceRef;
use crate::error::Result;

/// Which of the arena's named buffers a `Dat` was carved from, or whether
/// it owns a standalone buffer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatKind {
    Staging,
    Vertex,
    Index,
    Storage,
    UniformDevice,
    UniformMappable,
    Standalone,
}

/// Flags carried by a logical allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatFlags {
    pub dynamic: bool,
    pub resizable: bool,
    pub persistent_staging: bool,
}

/// A logical buffer allocation: either a `BufferRegions` carved out of one
/// of the arena's shared typed buffers, or a standalone `Buffer` it owns
/// outright.
pub struct Dat {
    pub kind: DatKind,
    pub regions: BufferRegions,
    pub flags: DatFlags,
    standalone: Option<Buffer>,
}

impl Dat {
    pub fn count(&self) -> usize {
        self.regions.count()
    }
}

fn next_pow2(v: vk::DeviceSize) -> vk::DeviceSize {
    if v <= 1 {
        return 1;
    }
    let mut p = 1u64;
    while p < v {
        p <<= 1;
    }
    p
}

/// Owns the small set of large typed buffers that most `Dat`s are
/// sub-allocated from, plus the bump-allocation bookkeeping for each. This
/// is the consolidated "resources + allocs" model named in the spec's
/// Design Notes (the newer of the two historical variants).
pub struct BufferArena {
    device: DeviceRef,
    buffers: std::collections::HashMap<DatKind, Buffer>,
    initial_size: vk::DeviceSize,
}

impl BufferArena {
    pub fn new(device: DeviceRef, initial_size: vk::DeviceSize) -> Self {
        BufferArena {
            device,
            buffers: std::collections::HashMap::new(),
            initial_size,
        }
    }

    fn usage_for(kind: DatKind) -> BufferUsage {
        match kind {
            DatKind::Staging => BufferUsage::STAGING | BufferUsage::MAPPABLE,
            DatKind::Vertex => BufferUsage::VERTEX,
            DatKind::Index => BufferUsage::INDEX,
            DatKind::Storage => BufferUsage::STORAGE,
            DatKind::UniformDevice => BufferUsage::UNIFORM,
            DatKind::UniformMappable => BufferUsage::UNIFORM | BufferUsage::MAPPABLE,
            DatKind::Standalone => BufferUsage::empty(),
        }
    }

    fn alignment_for(&self, kind: DatKind) -> vk::DeviceSize {
        match kind {
            DatKind::UniformDevice | DatKind::UniformMappable => {
                self.device.caps().uniform_buffer_align
            }
            DatKind::Storage => self.device.caps().storage_buffer_align,
            _ => 1,
        }
    }

    fn buffer_mut(&mut self, kind: DatKind) -> Result<&mut Buffer> {
        if !self.buffers.contains_key(&kind) {
            let buf = Buffer::create(self.device.clone(), self.initial_size, Self::usage_for(kind))?;
            self.buffers.insert(kind, buf);
        }
        Ok(self.buffers.get_mut(&kind).unwrap())
    }

    /// Allocates a `Dat` with `count` regions of `size` bytes each from the
    /// named buffer, following spec §4.4 exactly: pick alignment, compute
    /// the aligned per-item size, grow the backing buffer to the next
    /// power of two if the bump cursor would overrun it, then record the
    /// per-region offsets.
    pub fn allocate(&mut self, kind: DatKind, size: vk::DeviceSize, count: usize) -> Result<Dat> {
        let alignment = self.alignment_for(kind);
        let buffer = self.buffer_mut(kind)?;

        let aligned_size = crate::limits::DeviceCaps::align_up(alignment, size);
        let offset = buffer.allocated_size;
        let needed = offset + aligned_size * count as vk::DeviceSize;

        if needed > buffer.size() {
            let new_size = next_pow2(needed);
            debug!(
                "growing {:?} buffer from {} to {} bytes",
                kind,
                buffer.size(),
                new_size
            );
            // Contents are not preserved across a grow, by the documented
            // limitation in spec §4.4 step 5 — existing Dats referencing
            // this buffer must be treated as invalidated by the caller.
            let mut grown = Buffer::create(self.device.clone(), new_size, buffer.usage())?;
            grown.allocated_size = offset;
            self.buffers.insert(kind, grown);
        }

        let buffer = self.buffers.get_mut(&kind).unwrap();
        let regions = BufferRegions::new(offset, size, count, alignment.max(1));
        buffer.allocated_size = offset + aligned_size * count as vk::DeviceSize;

        Ok(Dat {
            kind,
            regions,
            flags: DatFlags::default(),
            standalone: None,
        })
    }

    /// A `Dat` that owns its own dedicated `Buffer` rather than sharing one
    /// of the arena's typed buffers.
    pub fn allocate_standalone(
        &self,
        size: vk::DeviceSize,
        usage: BufferUsage,
        count: usize,
    ) -> Result<Dat> {
        let buffer = Buffer::create(self.device.clone(), size * count as vk::DeviceSize, usage)?;
        let regions = BufferRegions::new(0, size, count, 1);
        Ok(Dat {
            kind: DatKind::Standalone,
            regions,
            flags: DatFlags::default(),
            standalone: Some(buffer),
        })
    }

    pub fn buffer(&self, kind: DatKind) -> Option<&Buffer> {
        self.buffers.get(&kind)
    }

    /// In-place resize is only valid when `dat` is the last-allocated
    /// region of its backing buffer; otherwise a fresh allocation is
    /// returned and the old region is leaked in the arena, matching the
    /// spec's documented limitation.
    pub fn resize(&mut self, dat: &mut Dat, new_size: vk::DeviceSize) -> Result<()> {
        if let Some(standalone) = dat.standalone.as_mut() {
            let _ = standalone;
            return dat.regions.resize(new_size);
        }
        let alignment = self.alignment_for(dat.kind);
        let buffer = self.buffer_mut(dat.kind)?;
        let old_aligned = dat.regions.aligned_size;
        let count = dat.regions.count() as vk::DeviceSize;
        let old_span = old_aligned * count;
        let is_last = dat.regions.offset(0) + old_span == buffer.allocated_size;

        if is_last {
            let new_aligned = crate::limits::DeviceCaps::align_up(alignment, new_size);
            let needed = dat.regions.offset(0) + new_aligned * count;
            if needed > buffer.size() {
                let new_buf_size = next_pow2(needed);
                let mut grown =
                    Buffer::create(self.device.clone(), new_buf_size, buffer.usage())?;
                grown.allocated_size = dat.regions.offset(0);
                self.buffers.insert(dat.kind, grown);
            }
            let buffer = self.buffers.get_mut(&dat.kind).unwrap();
            buffer.allocated_size = dat.regions.offset(0) + new_aligned * count;
            dat.regions.resize(new_size)
        } else {
            let fresh = self.allocate(dat.kind, new_size, dat.regions.count())?;
            debug!("Dat resize fell back to a fresh allocation; old region leaked in arena");
            *dat = fresh;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise the pure offset/growth arithmetic without touching a
    // real device — they construct `BufferRegions`/`next_pow2` directly,
    // matching spec §8's "Dat invariant" and "buffer capacity growth"
    // boundary behaviors. Full allocate()/resize() round-trips need a live
    // `DeviceRef` and are covered by the integration tests under `tests/`.

    #[test]
    fn next_pow2_rounds_up() {
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(2), 2);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(1025), 2048);
    }

    #[test]
    fn dat_invariant_offset_plus_span_within_buffer() {
        let regions = BufferRegions::new(128, 64, 4, 256);
        let end = regions.offset(3) + regions.aligned_size;
        assert!(end <= 128 + 256 * 4);
    }
}
