//! Block allocator - first-fit arena with free/used block tracking
//!
//! The arena is one contiguous buffer reserved at construction. It is tiled
//! by blocks; every block starts with a small header inside the arena that
//! carries an integrity tag, while the bookkeeping (offsets, sizes, list
//! membership, physical neighbours) lives in an indexed table outside the
//! arena. Free blocks are kept in address order so a released block can be
//! merged with its neighbours in O(1).

use std::collections::{BTreeMap, HashMap};

use crate::error::{MemoryError, Result};
use crate::{align_down, align_up, Allocator, MIN_ALIGNMENT, MIN_POOL_SIZE};

/// Integrity tag written into every block header
pub const BLOCK_MAGIC: u32 = 0xDEAD_BEEF;

/// Bytes reserved at the start of every block
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Leftover space must exceed this to be split into its own free block
const MIN_SPLIT_SIZE: usize = BLOCK_HEADER_SIZE + MIN_ALIGNMENT;

/// Index of a block record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockState {
    Free,
    Used,
    /// Record slot not describing any block; reusable
    Vacant,
}

#[derive(Clone, Copy, Debug)]
struct Block {
    /// Arena offset of the header
    offset: usize,
    /// Total bytes including header, padding and slack
    span: usize,
    /// Arena offset of the first user byte (used blocks only)
    user_offset: usize,
    /// Requested size (used blocks only)
    user_size: usize,
    alignment: usize,
    state: BlockState,
    tag: u32,
    /// Allocation serial, distinguishes reuse of the same slot
    serial: u64,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

impl Block {
    fn end(&self) -> usize {
        self.offset + self.span
    }
}

/// Handle to an allocated region of an arena
///
/// Regions are not `Clone`: each one is handed back exactly once through
/// `release`. The bytes are reached through the allocator that produced it.
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    address: usize,
    offset: usize,
    len: usize,
    block: BlockId,
    serial: u64,
}

impl Region {
    /// Start address of the region
    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Offset of the region from the start of its arena
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Usable length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Regions are never empty; zero-sized requests are rejected
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the start address is a multiple of `align`
    #[inline]
    pub fn is_aligned_to(&self, align: usize) -> bool {
        align.is_power_of_two() && self.address & (align - 1) == 0
    }

    /// Whether two regions share any byte
    pub fn overlaps(&self, other: &Region) -> bool {
        self.address < other.address + other.len && other.address < self.address + self.len
    }

    /// Base address of the arena this region was carved from
    #[inline]
    pub(crate) fn arena_base(&self) -> usize {
        self.address - self.offset
    }
}

/// Block allocator statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorStats {
    pub pool_size: usize,
    pub bytes_allocated: usize,
    pub bytes_free: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    pub largest_free_block: usize,
}

/// Fixed-capacity arena allocator for variable-size, aligned blocks
///
/// Single-threaded: every operation takes `&mut self`. A detected integrity
/// tag mismatch poisons the allocator; from then on every operation returns
/// [`MemoryError::Corrupted`].
pub struct BlockAllocator {
    /// Backing memory, over-reserved so the arena start can be aligned
    memory: Box<[u8]>,
    /// Offset of the aligned arena start inside `memory`
    start: usize,
    /// Usable arena bytes
    pool_size: usize,
    blocks: Vec<Block>,
    vacant: Vec<BlockId>,
    /// Free blocks keyed by arena offset
    free: BTreeMap<usize, BlockId>,
    /// Used blocks keyed by user offset
    used: HashMap<usize, BlockId>,
    bytes_allocated: usize,
    next_serial: u64,
    corrupted_at: Option<usize>,
}

impl BlockAllocator {
    /// Create an allocator owning a `pool_size` byte arena
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size < MIN_POOL_SIZE {
            return Err(MemoryError::PoolTooSmall {
                requested: pool_size,
                minimum: MIN_POOL_SIZE,
            });
        }

        let reserve = pool_size
            .checked_add(MIN_ALIGNMENT)
            .ok_or(MemoryError::ArenaUnavailable(pool_size))?;
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(reserve)
            .map_err(|_| MemoryError::ArenaUnavailable(pool_size))?;
        memory.resize(reserve, 0u8);
        let memory = memory.into_boxed_slice();

        let raw = memory.as_ptr() as usize;
        let start = align_up(raw, MIN_ALIGNMENT) - raw;

        let mut allocator = Self {
            memory,
            start,
            pool_size,
            blocks: Vec::new(),
            vacant: Vec::new(),
            free: BTreeMap::new(),
            used: HashMap::new(),
            bytes_allocated: 0,
            next_serial: 0,
            corrupted_at: None,
        };
        allocator.install_initial_block();

        log::debug!("Created block allocator with {} byte arena", pool_size);
        Ok(allocator)
    }

    /// Create an allocator with capacity in KB
    pub fn with_capacity_kb(kb: usize) -> Result<Self> {
        let bytes = kb.checked_mul(1024).ok_or(MemoryError::ArenaUnavailable(usize::MAX))?;
        Self::new(bytes)
    }

    /// Create an allocator with capacity in MB
    pub fn with_capacity_mb(mb: usize) -> Result<Self> {
        let bytes = mb
            .checked_mul(1024 * 1024)
            .ok_or(MemoryError::ArenaUnavailable(usize::MAX))?;
        Self::new(bytes)
    }

    /// Bytes covered by blocks; the arena tail past the last 16-byte
    /// boundary is never handed out
    #[inline]
    fn tiled_size(&self) -> usize {
        align_down(self.pool_size, MIN_ALIGNMENT)
    }

    fn install_initial_block(&mut self) {
        let span = self.tiled_size();
        let id = self.insert_record(Block {
            offset: 0,
            span,
            user_offset: 0,
            user_size: 0,
            alignment: MIN_ALIGNMENT,
            state: BlockState::Free,
            tag: BLOCK_MAGIC,
            serial: 0,
            prev: None,
            next: None,
        });
        self.free.insert(0, id);
        self.write_header(id);
    }

    /// Address of the first arena byte
    #[inline]
    fn base(&self) -> usize {
        self.memory.as_ptr() as usize + self.start
    }

    /// Allocate `size` bytes whose start address is a multiple of `alignment`
    ///
    /// Alignments below 16 are raised to 16. Fails with `Exhausted` when no
    /// free block fits; a failed request leaves the allocator untouched.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Result<Region> {
        self.ensure_intact()?;

        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        let alignment = alignment.max(MIN_ALIGNMENT);
        let exhausted = MemoryError::Exhausted { size, alignment };

        let aligned_size = match size.checked_add(alignment - 1) {
            Some(padded) => padded & !(alignment - 1),
            None => return Err(exhausted),
        };

        // First fit in address order
        let base = self.base();
        let mut fit = None;
        let mut corrupt = None;
        for &id in self.free.values() {
            if !self.header_intact(id) {
                corrupt = Some(id);
                break;
            }
            let block = &self.blocks[id.index()];
            let user_offset = align_up(base + block.offset + BLOCK_HEADER_SIZE, alignment) - base;
            match user_offset.checked_add(aligned_size) {
                Some(end) if end <= block.end() => {
                    fit = Some((id, user_offset));
                    break;
                }
                _ => {}
            }
        }
        if let Some(id) = corrupt {
            return Err(self.poison(id));
        }
        let Some((id, user_offset)) = fit else {
            log::trace!("Block allocator exhausted: {} bytes at alignment {}", size, alignment);
            return Err(exhausted);
        };

        let block = self.blocks[id.index()];
        self.free.remove(&block.offset);

        // Split off the remainder when it can hold a block of its own
        let used_end = user_offset + aligned_size;
        let mut span = block.span;
        let mut next = block.next;
        if block.end() - used_end > MIN_SPLIT_SIZE {
            let remainder = self.insert_record(Block {
                offset: used_end,
                span: block.end() - used_end,
                user_offset: 0,
                user_size: 0,
                alignment: MIN_ALIGNMENT,
                state: BlockState::Free,
                tag: BLOCK_MAGIC,
                serial: 0,
                prev: Some(id),
                next: block.next,
            });
            if let Some(after) = block.next {
                self.blocks[after.index()].prev = Some(remainder);
            }
            self.free.insert(used_end, remainder);
            self.write_header(remainder);
            span = used_end - block.offset;
            next = Some(remainder);
        }

        self.next_serial += 1;
        let serial = self.next_serial;
        {
            let block = &mut self.blocks[id.index()];
            block.span = span;
            block.next = next;
            block.user_offset = user_offset;
            block.user_size = size;
            block.alignment = alignment;
            block.state = BlockState::Used;
            block.serial = serial;
        }
        self.used.insert(user_offset, id);
        self.write_header(id);
        self.bytes_allocated += span;

        Ok(Region {
            address: base + user_offset,
            offset: user_offset,
            len: size,
            block: id,
            serial,
        })
    }

    /// Return a region to the free list, merging it with free neighbours
    pub fn release(&mut self, region: Region) -> Result<()> {
        self.ensure_intact()?;
        let id = self.resolve(&region)?;
        self.check_header(id)?;

        let block = self.blocks[id.index()];
        self.used.remove(&block.user_offset);
        self.bytes_allocated -= block.span;
        {
            let block = &mut self.blocks[id.index()];
            block.state = BlockState::Free;
            block.user_offset = 0;
            block.user_size = 0;
            block.alignment = MIN_ALIGNMENT;
        }

        // Absorb the following block
        if let Some(next) = block.next {
            if self.blocks[next.index()].state == BlockState::Free {
                self.check_header(next)?;
                let absorbed = self.blocks[next.index()];
                self.free.remove(&absorbed.offset);
                self.blocks[id.index()].span += absorbed.span;
                self.blocks[id.index()].next = absorbed.next;
                if let Some(after) = absorbed.next {
                    self.blocks[after.index()].prev = Some(id);
                }
                self.vacate(next);
            }
        }

        // Fold into the preceding block
        let mut merged = id;
        if let Some(prev) = block.prev {
            if self.blocks[prev.index()].state == BlockState::Free {
                self.check_header(prev)?;
                let current = self.blocks[id.index()];
                self.blocks[prev.index()].span += current.span;
                self.blocks[prev.index()].next = current.next;
                if let Some(after) = current.next {
                    self.blocks[after.index()].prev = Some(prev);
                }
                self.vacate(id);
                merged = prev;
            }
        }

        if merged == id {
            self.free.insert(block.offset, id);
        }
        self.write_header(merged);

        log::trace!(
            "Released {} bytes at arena offset {}",
            block.user_size,
            block.user_offset
        );
        Ok(())
    }

    /// Return every block to the free list
    ///
    /// Outstanding regions become invalid; using them afterwards yields
    /// `UntrackedRegion`.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_intact()?;
        self.blocks.clear();
        self.vacant.clear();
        self.free.clear();
        self.used.clear();
        self.bytes_allocated = 0;
        self.install_initial_block();
        Ok(())
    }

    /// Tear down the allocator, releasing its arena
    pub fn destroy(self) {
        let outstanding = self.used.len();
        if outstanding > 0 {
            log::debug!(
                "Destroying block allocator with {} regions outstanding",
                outstanding
            );
        } else {
            log::debug!("Destroying block allocator ({} byte arena)", self.pool_size);
        }
    }

    /// Borrow the bytes of a live region
    pub fn bytes(&self, region: &Region) -> Result<&[u8]> {
        self.ensure_intact()?;
        let id = self.resolve(region)?;
        let block = &self.blocks[id.index()];
        let at = self.start + block.user_offset;
        Ok(&self.memory[at..at + block.user_size])
    }

    /// Mutably borrow the bytes of a live region
    pub fn bytes_mut(&mut self, region: &Region) -> Result<&mut [u8]> {
        self.ensure_intact()?;
        let id = self.resolve(region)?;
        let block = self.blocks[id.index()];
        let at = self.start + block.user_offset;
        Ok(&mut self.memory[at..at + block.user_size])
    }

    /// Raw pointer to a live region, for vectorized routines
    ///
    /// The pointer is valid for `region.len()` bytes until the region is
    /// released or the allocator is reset or destroyed. Writing outside that
    /// range clobbers neighbouring block headers and is reported as
    /// corruption by the next operation that visits them.
    pub fn as_mut_ptr(&mut self, region: &Region) -> Result<*mut u8> {
        self.ensure_intact()?;
        let id = self.resolve(region)?;
        let at = self.start + self.blocks[id.index()].user_offset;
        Ok(self.memory[at..].as_mut_ptr())
    }

    /// Whether `region` is currently allocated from this arena
    pub fn contains(&self, region: &Region) -> bool {
        self.resolve(region).is_ok()
    }

    /// Whether `region` was carved from this arena, live or not
    pub fn owns(&self, region: &Region) -> bool {
        region.arena_base() == self.base()
    }

    /// Usable arena size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of live regions
    pub fn live_regions(&self) -> usize {
        self.used.len()
    }

    /// Whether an integrity tag mismatch has been detected
    pub fn is_corrupted(&self) -> bool {
        self.corrupted_at.is_some()
    }

    /// Walk every block and check its header and the arena tiling
    pub fn verify(&mut self) -> Result<()> {
        self.ensure_intact()?;
        let mut cursor = self.free.values().next().copied().or_else(|| self.used.values().next().copied());
        // Rewind to the first physical block
        while let Some(id) = cursor {
            match self.blocks[id.index()].prev {
                Some(prev) => cursor = Some(prev),
                None => break,
            }
        }

        let mut expected_offset = 0;
        while let Some(id) = cursor {
            let block = self.blocks[id.index()];
            if block.offset != expected_offset || !self.header_intact(id) {
                return Err(self.poison(id));
            }
            expected_offset = block.end();
            cursor = block.next;
        }
        Ok(())
    }

    /// Allocation statistics
    pub fn stats(&self) -> AllocatorStats {
        let largest_free_block = self
            .free
            .values()
            .map(|id| self.blocks[id.index()].span - BLOCK_HEADER_SIZE)
            .max()
            .unwrap_or(0);

        AllocatorStats {
            pool_size: self.pool_size,
            bytes_allocated: self.bytes_allocated,
            bytes_free: self.tiled_size() - self.bytes_allocated,
            free_blocks: self.free.len(),
            used_blocks: self.used.len(),
            largest_free_block,
        }
    }

    fn ensure_intact(&self) -> Result<()> {
        match self.corrupted_at {
            Some(offset) => Err(MemoryError::Corrupted { offset }),
            None => Ok(()),
        }
    }

    /// Map a region back to its live block
    fn resolve(&self, region: &Region) -> Result<BlockId> {
        let untracked = MemoryError::UntrackedRegion {
            address: region.address,
        };
        if !self.owns(region) {
            return Err(untracked);
        }
        match self.used.get(&region.offset) {
            Some(&id) if id == region.block && self.blocks[id.index()].serial == region.serial => {
                Ok(id)
            }
            _ => Err(untracked),
        }
    }

    fn insert_record(&mut self, block: Block) -> BlockId {
        match self.vacant.pop() {
            Some(id) => {
                self.blocks[id.index()] = block;
                id
            }
            None => {
                self.blocks.push(block);
                BlockId((self.blocks.len() - 1) as u32)
            }
        }
    }

    fn vacate(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.index()];
        block.state = BlockState::Vacant;
        block.tag = 0;
        block.prev = None;
        block.next = None;
        self.vacant.push(id);
    }

    fn write_header(&mut self, id: BlockId) {
        let block = self.blocks[id.index()];
        let at = self.start + block.offset;
        let header = &mut self.memory[at..at + BLOCK_HEADER_SIZE];
        header[0..4].copy_from_slice(&block.tag.to_le_bytes());
        header[4..8].copy_from_slice(&id.0.to_le_bytes());
        header[8..16].copy_from_slice(&(block.span as u64).to_le_bytes());
    }

    fn header_intact(&self, id: BlockId) -> bool {
        let block = &self.blocks[id.index()];
        let at = self.start + block.offset;
        let header = &self.memory[at..at + BLOCK_HEADER_SIZE];
        let tag: u32 = bytemuck::pod_read_unaligned(&header[0..4]);
        let index: u32 = bytemuck::pod_read_unaligned(&header[4..8]);
        let span: u64 = bytemuck::pod_read_unaligned(&header[8..16]);

        block.tag == BLOCK_MAGIC
            && u32::from_le(tag) == BLOCK_MAGIC
            && u32::from_le(index) == id.0
            && u64::from_le(span) == block.span as u64
    }

    fn check_header(&mut self, id: BlockId) -> Result<()> {
        if self.header_intact(id) {
            Ok(())
        } else {
            Err(self.poison(id))
        }
    }

    fn poison(&mut self, id: BlockId) -> MemoryError {
        let offset = self.blocks[id.index()].offset;
        log::error!(
            "Block header corrupted at arena offset {}; allocator disabled",
            offset
        );
        self.corrupted_at = Some(offset);
        MemoryError::Corrupted { offset }
    }
}

impl Allocator for BlockAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Result<Region> {
        BlockAllocator::allocate(self, size, align)
    }

    fn release(&mut self, region: Region) -> Result<()> {
        BlockAllocator::release(self, region)
    }

    fn bytes_mut(&mut self, region: &Region) -> Result<&mut [u8]> {
        BlockAllocator::bytes_mut(self, region)
    }

    fn capacity(&self) -> usize {
        self.tiled_size()
    }

    fn used(&self) -> usize {
        self.bytes_allocated
    }
}

impl std::fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("pool_size", &self.pool_size)
            .field("bytes_allocated", &self.bytes_allocated)
            .field("free_blocks", &self.free.len())
            .field("used_blocks", &self.used.len())
            .field("corrupted_at", &self.corrupted_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_minimum_pool_size() {
        let err = BlockAllocator::new(512).unwrap_err();
        assert!(matches!(err, MemoryError::PoolTooSmall { requested: 512, minimum: 1024 }));
        assert!(BlockAllocator::new(1024).is_ok());
    }

    #[test]
    fn test_allocation_alignment() {
        let mut alloc = BlockAllocator::new(16 * 1024).unwrap();

        let a = alloc.allocate(100, 16).unwrap();
        let b = alloc.allocate(200, 32).unwrap();
        let c = alloc.allocate(7, 64).unwrap();
        let d = alloc.allocate(1, 1).unwrap();

        assert!(a.is_aligned_to(16));
        assert!(b.is_aligned_to(32));
        assert!(c.is_aligned_to(64));
        // Raised to the floor
        assert!(d.is_aligned_to(MIN_ALIGNMENT));
        assert_eq!(d.len(), 1);

        let all = [&a, &b, &c, &d];
        for (i, x) in all.iter().enumerate() {
            for y in &all[i + 1..] {
                assert!(!x.overlaps(y));
            }
        }
    }

    #[test]
    fn test_invalid_requests_leave_state_intact() {
        let mut alloc = BlockAllocator::new(4096).unwrap();
        let before = alloc.stats();

        assert!(matches!(alloc.allocate(0, 16), Err(MemoryError::ZeroSize)));
        assert!(matches!(alloc.allocate(64, 24), Err(MemoryError::InvalidAlignment(24))));
        assert!(matches!(alloc.allocate(64, 0), Err(MemoryError::InvalidAlignment(0))));
        assert_eq!(alloc.stats(), before);

        let region = alloc.allocate(64, 16).unwrap();
        assert!(region.is_aligned_to(16));
    }

    #[test]
    fn test_reuse_after_release() {
        let mut alloc = BlockAllocator::new(4096).unwrap();

        let first = alloc.allocate(100, 16).unwrap();
        let _second = alloc.allocate(200, 32).unwrap();
        let address = first.address();

        alloc.release(first).unwrap();
        let again = alloc.allocate(100, 16).unwrap();
        assert_eq!(again.address(), address);
    }

    #[test]
    fn test_coalesce_on_release() {
        let mut alloc = BlockAllocator::new(4096).unwrap();

        let a = alloc.allocate(100, 16).unwrap();
        let b = alloc.allocate(100, 16).unwrap();
        let c = alloc.allocate(100, 16).unwrap();

        alloc.release(a).unwrap();
        alloc.release(c).unwrap();
        // a and the tail are free, b separates them
        assert_eq!(alloc.stats().free_blocks, 2);

        alloc.release(b).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.bytes_allocated, 0);
        assert_eq!(stats.largest_free_block, 4096 - BLOCK_HEADER_SIZE);
        alloc.verify().unwrap();
    }

    #[test]
    fn test_double_release_is_reported() {
        let mut alloc = BlockAllocator::new(4096).unwrap();
        let mut other = BlockAllocator::new(4096).unwrap();

        let region = alloc.allocate(64, 16).unwrap();
        let foreign = other.allocate(64, 16).unwrap();

        let err = alloc.release(foreign).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);

        alloc.release(region).unwrap();
        let stale = Region {
            address: alloc.base() + BLOCK_HEADER_SIZE,
            offset: BLOCK_HEADER_SIZE,
            len: 64,
            block: BlockId(0),
            serial: 1,
        };
        assert!(matches!(
            alloc.release(stale),
            Err(MemoryError::UntrackedRegion { .. })
        ));
        assert!(!alloc.is_corrupted());
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let mut alloc = BlockAllocator::new(1024).unwrap();
        let mut regions = Vec::new();

        let err = loop {
            match alloc.allocate(64, 16) {
                Ok(region) => regions.push(region),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, MemoryError::Exhausted { size: 64, alignment: 16 }));
        assert!(!regions.is_empty());

        for region in regions {
            alloc.release(region).unwrap();
        }
        assert_eq!(alloc.stats().free_blocks, 1);
        assert!(alloc.allocate(64, 16).is_ok());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut alloc = BlockAllocator::new(4096).unwrap();
        let region = alloc.allocate(8, 16).unwrap();

        alloc.bytes_mut(&region).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(alloc.bytes(&region).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(alloc.contains(&region));
    }

    #[test]
    fn test_corruption_poisons_allocator() {
        let mut alloc = BlockAllocator::new(4096).unwrap();
        let region = alloc.allocate(100, 16).unwrap();

        // Overrun the region into the header of the free remainder
        let ptr = alloc.as_mut_ptr(&region).unwrap();
        unsafe { ptr.add(112).write_bytes(0xAB, 4) };

        let err = alloc.allocate(32, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(alloc.is_corrupted());

        // Distinct from exhaustion, and sticky
        assert!(matches!(alloc.release(region), Err(MemoryError::Corrupted { offset: 128 })));
        assert!(matches!(alloc.reset(), Err(MemoryError::Corrupted { .. })));
    }

    #[test]
    fn test_untiled_tail_not_counted_free() {
        let mut alloc = BlockAllocator::new(1030).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.pool_size, 1030);
        assert_eq!(stats.bytes_free, 1024);
        assert_eq!(stats.largest_free_block, 1024 - BLOCK_HEADER_SIZE);
        assert_eq!(Allocator::capacity(&alloc), 1024);

        let region = alloc.allocate(100, 16).unwrap();
        assert_eq!(alloc.stats().bytes_free, 1024 - alloc.stats().bytes_allocated);
        alloc.release(region).unwrap();
        assert_eq!(alloc.stats().bytes_free, 1024);
    }

    #[test]
    fn test_capacity_helpers_reject_overflow() {
        assert!(matches!(
            BlockAllocator::with_capacity_kb(usize::MAX),
            Err(MemoryError::ArenaUnavailable(_))
        ));
        assert!(matches!(
            BlockAllocator::with_capacity_mb(usize::MAX / 1024),
            Err(MemoryError::ArenaUnavailable(_))
        ));
        assert_eq!(BlockAllocator::with_capacity_kb(2).unwrap().pool_size(), 2048);
    }

    #[test]
    fn test_reset_invalidates_regions() {
        let mut alloc = BlockAllocator::new(4096).unwrap();
        let region = alloc.allocate(256, 16).unwrap();

        alloc.reset().unwrap();
        assert!(!alloc.contains(&region));
        assert!(alloc.owns(&region));
        assert_eq!(alloc.stats().used_blocks, 0);

        // Same offset, new allocation: the stale handle stays dead
        let fresh = alloc.allocate(256, 16).unwrap();
        assert_eq!(fresh.address(), region.address());
        assert!(matches!(
            alloc.release(region),
            Err(MemoryError::UntrackedRegion { .. })
        ));
        alloc.release(fresh).unwrap();
    }
}
