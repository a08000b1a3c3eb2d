use types::{Pid, OS_PID};

/// One process's view onto a shared page: which pid mapped it, and at which
/// offset inside that pid's address space the page appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedOwner {
    pub pid: Pid,
    pub process_virtual_index: u32,
}

/// A page-table entry. One exists per virtual page for the lifetime of the
/// system; entries are re-assigned between owners but never destroyed.
#[derive(Debug, Clone)]
pub struct MemoryPage {
    /// Base of this page in the flat virtual space. Immutable after boot.
    pub virtual_address: u32,
    /// `virtual_address / P`. Immutable after boot.
    pub page_number: u32,

    /// True iff the page currently occupies a physical frame.
    pub valid: bool,
    /// Base of the occupied frame. Meaningful only while `valid`.
    pub physical_address: u32,

    /// 0 means the page belongs to the OS free pool; otherwise the owning pid.
    pub owner_pid: Pid,
    /// Offset within the owner's address space that this page backs.
    pub process_virtual_index: u32,
    /// 0 if the page is free on its owner's heap, else the process-virtual
    /// address of the allocation that claimed it.
    pub heap_allocation_start: u32,

    // Paging metadata.
    pub dirty: bool,
    pub access_count: u64,
    pub last_accessed: u64,
    pub page_faults: u32,

    /// 0 = not shared; otherwise the shared region this page belongs to.
    pub shared_region_id: u32,
    /// Every process that has mapped this shared page.
    pub shared_owners: Vec<SharedOwner>,
}

impl MemoryPage {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            virtual_address: page_number * page_size,
            page_number,
            valid: false,
            physical_address: 0,
            owner_pid: 0,
            process_virtual_index: 0,
            heap_allocation_start: 0,
            dirty: false,
            access_count: 0,
            last_accessed: 0,
            page_faults: 0,
            shared_region_id: 0,
            shared_owners: Vec::new(),
        }
    }

    /// A page is claimable by `map_process` when it belongs to the OS pool
    /// and is not reserved for a shared region.
    pub fn is_free(&self) -> bool {
        self.owner_pid == OS_PID && self.shared_region_id == 0
    }

    /// Assign this page to a process at the given process-virtual offset.
    pub fn assign(&mut self, pid: Pid, process_virtual_index: u32) {
        self.owner_pid = pid;
        self.process_virtual_index = process_virtual_index;
        self.heap_allocation_start = 0;
        self.dirty = false;
        self.access_count = 0;
        self.last_accessed = 0;
        self.page_faults = 0;
    }

    /// Return the page to the OS pool. The frame (if any) stays attached so
    /// the pool keeps its resident pages.
    pub fn reset(&mut self) {
        self.owner_pid = 0;
        self.process_virtual_index = 0;
        self.heap_allocation_start = 0;
        self.dirty = false;
        self.access_count = 0;
        self.last_accessed = 0;
        self.page_faults = 0;
    }

    /// If `(pid, offset)` falls inside this page, as owner or as a shared
    /// mapping, return the byte offset into the page.
    pub fn offset_for(&self, pid: Pid, offset: u32, page_size: u32) -> Option<u32> {
        if self.owner_pid == pid
            && offset >= self.process_virtual_index
            && offset - self.process_virtual_index < page_size
        {
            return Some(offset - self.process_virtual_index);
        }
        if self.shared_region_id != 0 {
            for owner in &self.shared_owners {
                if owner.pid == pid
                    && offset >= owner.process_virtual_index
                    && offset - owner.process_virtual_index < page_size
                {
                    return Some(offset - owner.process_virtual_index);
                }
            }
        }
        None
    }
}
