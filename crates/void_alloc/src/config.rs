//! Startup configuration and reservation of the engine's allocator arenas

use crate::block::BlockAllocator;
use crate::error::{AllocError, Result};
use crate::stack::StackAllocator;
use crate::system::{PageBuffer, SystemMemory};

/// Sizes of the arenas reserved at engine startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Bytes available to the stack allocator
    pub stack_capacity: usize,
    /// Number of blocks in the block pool
    pub block_count: usize,
    /// Size of one pool block in bytes
    pub block_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stack_capacity: 1024 * 1024, // 1 MB
            block_count: 1024,
            block_size: 64,
        }
    }
}

impl MemoryConfig {
    pub fn with_stack_capacity(mut self, bytes: usize) -> Self {
        self.stack_capacity = bytes;
        self
    }

    pub fn with_blocks(mut self, block_count: usize, block_size: usize) -> Self {
        self.block_count = block_count;
        self.block_size = block_size;
        self
    }

    /// Backing storage needed by the block pool
    pub fn block_pool_requirement(&self) -> usize {
        BlockAllocator::memory_requirement(self.block_count, self.block_size)
    }
}

/// Page-backed arenas for one engine instance.
///
/// Reserved once through the system layer; the stack and block allocators
/// handed out by [`EngineMemory::allocators`] borrow them. Dropping this
/// value unmaps both arenas.
pub struct EngineMemory<'m, S: SystemMemory> {
    config: MemoryConfig,
    stack_arena: PageBuffer<'m, S>,
    block_arena: PageBuffer<'m, S>,
}

impl<'m, S: SystemMemory> EngineMemory<'m, S> {
    /// Map the arenas described by `config`
    #[track_caller]
    pub fn reserve(config: MemoryConfig, system: &'m S) -> Result<Self> {
        if config.block_count == 0 || config.block_size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let stack_arena = PageBuffer::with_len(system, config.stack_capacity)?;
        let block_arena = PageBuffer::with_len(system, config.block_pool_requirement())?;

        log::info!(
            "Reserved engine memory: stack {} bytes ({} pages), block pool {} x {} bytes ({} pages)",
            config.stack_capacity,
            stack_arena.pages(),
            config.block_count,
            config.block_size,
            block_arena.pages()
        );

        Ok(Self {
            config,
            stack_arena,
            block_arena,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Total bytes mapped for both arenas
    pub fn reserved_bytes(&self) -> usize {
        self.stack_arena.len() + self.block_arena.len()
    }

    /// Build fresh allocators over the arenas.
    ///
    /// The block pool's free-list is reset; the stack starts empty.
    pub fn allocators(&mut self) -> Result<(StackAllocator<'_>, BlockAllocator<'_>)> {
        let stack = StackAllocator::with_capacity(
            self.config.stack_capacity,
            self.stack_arena.as_mut_slice(),
        )?;
        let pool = BlockAllocator::new(
            self.config.block_count,
            self.config.block_size,
            self.block_arena.as_mut_slice(),
        )?;

        Ok((stack, pool))
    }
}
