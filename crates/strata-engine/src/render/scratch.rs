use crate::config::SCRATCH_BYTES;
use crate::device::{BufferTarget, BufferUsage, GpuBufferId, GraphicsApi};

/// Offsets handed out by the scratch streams are aligned to this many bytes.
const SCRATCH_ALIGN: usize = 16;

/// Per-frame streaming allocator for client-side (non GPU-resident) data.
///
/// Client render buffers and one-off draws are copied into one of two
/// streaming buffers (vertex and index). Each stream is a ring: when a push
/// does not fit behind the cursor, the stream's storage is orphaned and the
/// cursor restarts at zero. `reset` is called once per frame and pushes the
/// cursor to the end, so the first push of every frame orphans.
#[derive(Debug)]
pub struct FrameScratch {
    vertex: ScratchStream,
    index: ScratchStream,
}

/// Bytes streamed and orphan events since the last `reset`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ScratchStats {
    pub bytes: usize,
    pub orphans: usize,
}

impl FrameScratch {
    pub fn new() -> Self {
        Self::with_capacity(SCRATCH_BYTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vertex: ScratchStream::new(BufferTarget::Vertex, capacity),
            index: ScratchStream::new(BufferTarget::Index, capacity),
        }
    }

    /// Starts a new frame. Storage is orphaned lazily on the next push.
    pub fn reset(&mut self) {
        self.vertex.reset();
        self.index.reset();
    }

    /// Copies vertex bytes into the stream; returns the buffer and byte offset.
    pub fn push_vertices(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8]) -> (GpuBufferId, u64) {
        self.vertex.push(api, bytes)
    }

    /// Copies 16-bit index bytes into the stream; returns the buffer and byte offset.
    pub fn push_indices(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8]) -> (GpuBufferId, u64) {
        self.index.push(api, bytes)
    }

    pub fn stats(&self) -> ScratchStats {
        ScratchStats {
            bytes: self.vertex.stats.bytes + self.index.stats.bytes,
            orphans: self.vertex.stats.orphans + self.index.stats.orphans,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.vertex.capacity
    }

    pub fn release(&mut self, api: &mut dyn GraphicsApi) {
        self.vertex.release(api);
        self.index.release(api);
    }
}

impl Default for FrameScratch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ScratchStream {
    target: BufferTarget,
    buffer: Option<GpuBufferId>,
    capacity: usize,
    cursor: usize,
    stats: ScratchStats,
}

impl ScratchStream {
    fn new(target: BufferTarget, capacity: usize) -> Self {
        Self {
            target,
            buffer: None,
            capacity,
            // Starts "full" so the first push allocates.
            cursor: capacity,
            stats: ScratchStats::default(),
        }
    }

    fn reset(&mut self) {
        self.cursor = self.capacity;
        self.stats = ScratchStats::default();
    }

    fn push(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8]) -> (GpuBufferId, u64) {
        assert!(!bytes.is_empty(), "frame scratch: zero-length push");
        assert!(
            bytes.len() <= self.capacity,
            "frame scratch: {} bytes exceeds the {}-byte {:?} stream",
            bytes.len(),
            self.capacity,
            self.target
        );

        let target = self.target;
        let buffer = *self.buffer.get_or_insert_with(|| api.create_buffer(target));

        if self.cursor + bytes.len() > self.capacity {
            api.buffer_storage(buffer, self.capacity, BufferUsage::Stream);
            self.cursor = 0;
            self.stats.orphans += 1;
        }

        let offset = self.cursor;
        api.buffer_sub_data(buffer, offset as u64, bytes);

        self.cursor = align_up(offset + bytes.len(), SCRATCH_ALIGN).min(self.capacity);
        self.stats.bytes += bytes.len();
        (buffer, offset as u64)
    }

    fn release(&mut self, api: &mut dyn GraphicsApi) {
        if let Some(buffer) = self.buffer.take() {
            api.delete_buffer(buffer);
        }
        self.cursor = self.capacity;
    }
}

#[inline]
fn align_up(v: usize, align: usize) -> usize {
    v.div_ceil(align) * align
}
