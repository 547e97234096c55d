//! Compile-time kernel configuration
//!
//! Tunables shared by the delegation layer, the capability tree and the
//! kernel objects. Values that depend on the machine the kernel boots on
//! live in [`BootConfig`] instead.

/// Upper bound on hardware threads (places) the kernel can drive.
pub const MAX_PLACES: usize = 256;

/// How many queued critical sections a `MutexDelegating` owner executes
/// before handing the mutex over to the next waiter.
pub const HANDOVER_COUNT: usize = 100;

/// Size of a tasklet in bytes, one cache line.
pub const TASKLET_SIZE: usize = 64;

/// Bytes available to a tasklet payload.
pub const TASKLET_PAYLOAD: usize = 48;

/// First spin count of the exponential backoff.
pub const BACKOFF_MIN_SPINS: u32 = 4;

/// Ceiling on a single backoff step.
pub const BACKOFF_MAX_SPINS: u32 = 1 << 12;

/// Number of capability entries per arena chunk.
pub const CAP_ARENA_CHUNK: usize = 1024;

/// Maximum number of arena chunks, bounding the total entry count.
pub const CAP_ARENA_MAX_CHUNKS: usize = 1024;

/// Largest capability map that can be created (2^bits slots).
pub const MAX_CAPMAP_INDEX_BITS: u32 = 16;

/// Total address bits a capability pointer resolves.
pub const CAPTR_BITS: u32 = 32;

/// Smallest memory frame handed out by the frame protocol.
pub const FRAME_MIN_SIZE: usize = 1 << FRAME_MIN_SIZE_BITS;
pub const FRAME_MIN_SIZE_BITS: u32 = 12;

/// Frames are at most `1 << FRAME_MAX_SIZE_BITS` bytes.
pub const FRAME_MAX_SIZE_BITS: u32 = 25;

/// Alignment required for untyped memory objects.
pub const UNTYPED_ALIGN: usize = 4096;

/// Number of interrupt lines an interrupt controller object serves.
pub const NUM_IRQS: usize = 224;

/// Payload words in an invocation buffer.
pub const INVOCATION_WORDS: usize = 60;

/// Number of extra capability pointers an invocation can carry.
pub const INVOCATION_CAPS: usize = 4;

/// Boot-time configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Bytes of memory handed to the root untyped memory object.
    pub root_memory_size: usize,
    /// Index bits of the root capability map.
    pub root_capmap_bits: u32,
    /// Guard bits of the root capability map.
    pub root_capmap_guard_bits: u32,
    /// Guard value of the root capability map.
    pub root_capmap_guard: u32,
}

impl BootConfig {
    /// Address bits the root capability map consumes.
    pub const fn root_depth(&self) -> u32 {
        self.root_capmap_bits + self.root_capmap_guard_bits
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            root_memory_size: 4 << 20,
            root_capmap_bits: 8,
            root_capmap_guard_bits: 24,
            root_capmap_guard: 0,
        }
    }
}
