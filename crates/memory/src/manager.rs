use std::path::PathBuf;

use types::config::round_to;
use types::fault::OutOfMemory;
use types::{Config, Fault, Pid};

use crate::page::{MemoryPage, SharedOwner};
use crate::physical::PhysicalStore;
use crate::swap::{PageValue, SwapDir};

/// Owns the page table, the physical store, the free-frame bitmap, and swap
/// I/O. Every byte a process reads or writes goes through `translate`, which
/// enforces address-space isolation and resolves page faults transparently.
///
/// Design at a glance:
/// - One `MemoryPage` per virtual page, created at boot, never destroyed.
/// - The first `physical/P` pages boot valid, identity-mapped onto frames;
///   the rest boot invalid and fault their way in.
/// - A fault takes the first free frame, else evicts the least-recently-used
///   resident page (ties broken by lowest page number). Dirty victims are
///   written to their swap file before the frame is reused.
/// - Shared regions are reserved at boot as contiguous page runs; mapping a
///   region into a process only appends a `SharedOwner` entry per page.
/// - Time is a monotonic tick counter bumped on every translation; it feeds
///   `last_accessed` and therefore victim selection.
pub struct MemoryManager {
    page_size: u32,
    store: PhysicalStore,
    pages: Vec<MemoryPage>,
    /// One bit per physical frame; true = free. Complement of the valid pages.
    frame_free: Vec<bool>,
    swap: SwapDir,
    ticks: u64,
}

impl MemoryManager {
    /// Build the manager and perform the boot-time reservations: size the
    /// page table, identity-map the resident prefix, wipe stale swap files,
    /// and reserve the shared-memory regions.
    pub fn new(virtual_bytes: u32, config: &Config, swap_dir: impl Into<PathBuf>) -> Self {
        let page_size = config.memory_page_size;
        let physical_bytes = round_to(config.physical_memory, page_size);
        let virtual_bytes = round_to(virtual_bytes, page_size);
        let total_pages = virtual_bytes / page_size;
        let frames = physical_bytes / page_size;

        let mut pages: Vec<MemoryPage> = (0..total_pages)
            .map(|n| MemoryPage::new(n, page_size))
            .collect();

        let resident = total_pages.min(frames);
        let mut frame_free = vec![true; frames as usize];
        for n in 0..resident {
            pages[n as usize].valid = true;
            pages[n as usize].physical_address = n * page_size;
            frame_free[n as usize] = false;
        }

        let swap = SwapDir::new(swap_dir);
        swap.clean_stale();

        let mut manager = Self {
            page_size,
            store: PhysicalStore::new(physical_bytes),
            pages,
            frame_free,
            swap,
            ticks: 0,
        };
        manager.reserve_shared_regions(
            config.num_of_shared_memory_regions,
            round_to(config.shared_memory_region_size, page_size),
        );
        manager
    }

    /// Walk the first `R * S/P` free pages and stamp region ids R, R-1, .., 1
    /// on consecutive `S/P`-page runs. Region pages stay owned by the OS
    /// (`owner_pid == 0`) forever; processes only ever attach to them as
    /// shared owners.
    fn reserve_shared_regions(&mut self, regions: u32, region_bytes: u32) {
        let pages_per_region = region_bytes / self.page_size;
        if regions == 0 || pages_per_region == 0 {
            return;
        }
        let mut region = regions;
        let mut assigned_in_region = 0;
        for page in self.pages.iter_mut() {
            if region == 0 {
                break;
            }
            if !page.is_free() {
                continue;
            }
            page.shared_region_id = region;
            assigned_in_region += 1;
            if assigned_in_region == pages_per_region {
                assigned_in_region = 0;
                region -= 1;
            }
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn pages(&self) -> &[MemoryPage] {
        &self.pages
    }

    pub fn physical_bytes(&self) -> &[u8] {
        self.store.slice(0, self.store.len())
    }

    pub fn free_frame_count(&self) -> usize {
        self.frame_free.iter().filter(|&&f| f).count()
    }

    pub fn free_page_count(&self) -> u32 {
        self.pages.iter().filter(|p| p.is_free()).count() as u32
    }

    /// Translate `(pid, offset)` to a physical address, resolving a page
    /// fault if the backing page is not resident. This is the only path to
    /// physical memory; it updates the paging metadata on every call.
    pub fn translate(&mut self, pid: Pid, offset: u32, will_write: bool) -> Result<u32, Fault> {
        let page_size = self.page_size;
        let mut hit = None;
        for (index, page) in self.pages.iter().enumerate() {
            if let Some(page_offset) = page.offset_for(pid, offset, page_size) {
                hit = Some((index, page_offset));
                break;
            }
        }
        let (index, page_offset) = hit.ok_or(Fault::Memory {
            pid,
            address: offset,
        })?;

        self.ticks += 1;
        let tick = self.ticks;
        let page = &mut self.pages[index];
        page.dirty |= will_write;
        page.access_count += 1;
        page.last_accessed = tick;

        if !self.pages[index].valid {
            self.page_fault(index);
        }
        Ok(self.pages[index].physical_address + page_offset)
    }

    /// Resolve a fault on `pages[index]`: claim a frame (evicting if all are
    /// taken), then swap the page's content in.
    fn page_fault(&mut self, index: usize) {
        let frame = match self.frame_free.iter().position(|&f| f) {
            Some(free) => {
                self.frame_free[free] = false;
                free as u32 * self.page_size
            }
            None => self.evict_victim(index),
        };

        {
            let page = &mut self.pages[index];
            page.physical_address = frame;
            page.valid = true;
            page.page_faults += 1;
        }

        let (number, virtual_address) = {
            let page = &self.pages[index];
            (page.page_number, page.virtual_address)
        };
        match self.swap.read_in(number, virtual_address) {
            Some(value) => {
                self.store.write_slice(frame, &value.bytes);
                let page = &mut self.pages[index];
                page.access_count = value.access_count;
                page.last_accessed = page.last_accessed.max(value.last_accessed);
                // The file is gone; the frame is now the only copy.
                page.dirty = true;
            }
            None => {
                self.store.fill(frame, self.page_size, 0);
            }
        }
    }

    /// Pick the LRU resident page (excluding the faulting one), write it out
    /// if dirty, and hand its frame over.
    fn evict_victim(&mut self, faulting: usize) -> u32 {
        let victim = self
            .pages
            .iter()
            .enumerate()
            .filter(|&(index, page)| index != faulting && page.valid)
            .min_by_key(|&(_, page)| (page.last_accessed, page.page_number))
            .map(|(index, _)| index)
            .expect("page fault with no resident page to evict");

        let frame = self.pages[victim].physical_address;
        if self.pages[victim].dirty {
            let value = PageValue {
                bytes: self.store.slice(frame, self.page_size).to_vec(),
                access_count: self.pages[victim].access_count,
                last_accessed: self.pages[victim].last_accessed,
            };
            self.swap.write_out(
                self.pages[victim].page_number,
                self.pages[victim].virtual_address,
                &value,
            );
            self.pages[victim].dirty = false;
        }
        self.pages[victim].valid = false;
        frame
    }

    pub fn read(&mut self, pid: Pid, offset: u32) -> Result<u8, Fault> {
        let physical = self.translate(pid, offset, false)?;
        Ok(self.store.byte(physical))
    }

    pub fn write(&mut self, pid: Pid, offset: u32, value: u8) -> Result<(), Fault> {
        let physical = self.translate(pid, offset, true)?;
        self.store.set_byte(physical, value);
        Ok(())
    }

    /// Little-endian u32 read. Byte-granular, so the value may straddle a
    /// page boundary.
    pub fn read_u32(&mut self, pid: Pid, offset: u32) -> Result<u32, Fault> {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read(pid, offset + i as u32)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32(&mut self, pid: Pid, offset: u32, value: u32) -> Result<(), Fault> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write(pid, offset + i as u32, byte)?;
        }
        Ok(())
    }

    pub fn set_range(&mut self, pid: Pid, offset: u32, len: u32, fill: u8) -> Result<(), Fault> {
        for i in 0..len {
            self.write(pid, offset + i, fill)?;
        }
        Ok(())
    }

    /// Claim `ceil(bytes/P)` free pages for `pid`, assigning process-virtual
    /// offsets consecutively from 0. Failing this is host-fatal: the virtual
    /// space was sized at boot and cannot grow.
    pub fn map_process(&mut self, bytes: u32, pid: Pid) -> Result<(), OutOfMemory> {
        let needed = bytes.div_ceil(self.page_size);
        let free: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.is_free())
            .map(|(index, _)| index)
            .collect();
        if (free.len() as u32) < needed {
            return Err(OutOfMemory {
                pid,
                requested_pages: needed,
                free_pages: free.len() as u32,
            });
        }
        for (k, &index) in free.iter().take(needed as usize).enumerate() {
            self.pages[index].assign(pid, k as u32 * self.page_size);
        }
        Ok(())
    }

    /// Attach every page of `region` to `pid` at ascending offsets starting
    /// one page past the caller's current maximum. Returns the first offset,
    /// or `None` for a region that was never reserved.
    pub fn map_shared_to_process(&mut self, region: u32, pid: Pid) -> Option<u32> {
        if region == 0 {
            return None;
        }
        let shared: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.shared_region_id == region)
            .map(|(index, _)| index)
            .collect();
        if shared.is_empty() {
            return None;
        }
        let start = self.next_virtual_slot(pid);
        for (k, &index) in shared.iter().enumerate() {
            self.pages[index].shared_owners.push(SharedOwner {
                pid,
                process_virtual_index: start + k as u32 * self.page_size,
            });
        }
        Some(start)
    }

    /// One page beyond the highest process-virtual offset `pid` currently
    /// maps, owned or shared.
    fn next_virtual_slot(&self, pid: Pid) -> u32 {
        let mut max = None;
        for page in &self.pages {
            if page.owner_pid == pid {
                max = max.max(Some(page.process_virtual_index));
            }
            for owner in &page.shared_owners {
                if owner.pid == pid {
                    max = max.max(Some(owner.process_virtual_index));
                }
            }
        }
        match max {
            Some(top) => top + self.page_size,
            None => 0,
        }
    }

    /// Tear down `pid`'s memory: zero resident pages, drop swap files of
    /// evicted ones, return every owned page to the pool, and detach the pid
    /// from all shared pages.
    pub fn release_process(&mut self, pid: Pid) {
        for index in 0..self.pages.len() {
            if self.pages[index].owner_pid == pid {
                if self.pages[index].valid {
                    let frame = self.pages[index].physical_address;
                    self.store.fill(frame, self.page_size, 0);
                } else {
                    self.swap
                        .remove(self.pages[index].page_number, self.pages[index].virtual_address);
                }
                self.pages[index].reset();
            }
            if self.pages[index].shared_region_id != 0 {
                self.pages[index].shared_owners.retain(|o| o.pid != pid);
            }
        }
    }

    /// Find a run of `ceil(bytes/P)` consecutive free pages in the process's
    /// heap page table and claim them. The run is stamped with the first
    /// page's process-virtual index, which doubles as the returned address.
    ///
    /// A zero-byte request rounds to zero pages: nothing is claimed and the
    /// null address comes back.
    pub fn heap_alloc(&mut self, pid: Pid, heap_pages: &[usize], bytes: u32) -> Result<u32, Fault> {
        let needed = bytes.div_ceil(self.page_size) as usize;
        if needed == 0 {
            return Ok(0);
        }
        let mut found = None;
        if heap_pages.len() >= needed {
            'search: for first in 0..=heap_pages.len() - needed {
                for k in 0..needed {
                    if self.pages[heap_pages[first + k]].heap_allocation_start != 0 {
                        continue 'search;
                    }
                }
                found = Some(first);
                break;
            }
        }
        let Some(first) = found else {
            return Err(Fault::Heap {
                pid,
                requested: bytes,
            });
        };
        let address = self.pages[heap_pages[first]].process_virtual_index;
        for k in 0..needed {
            self.pages[heap_pages[first + k]].heap_allocation_start = address;
        }
        Ok(address)
    }

    /// Release every heap page claimed at `start_address`, zeroing its
    /// content, and return 0. An address that no allocation claimed clears
    /// nothing; the null address is the free sentinel and never matches.
    pub fn heap_free(&mut self, start_address: u32, heap_pages: &[usize]) -> u32 {
        if start_address == 0 {
            return 0;
        }
        for &index in heap_pages {
            if self.pages[index].heap_allocation_start != start_address {
                continue;
            }
            if self.pages[index].valid {
                let frame = self.pages[index].physical_address;
                self.store.fill(frame, self.page_size, 0);
            } else {
                self.swap
                    .remove(self.pages[index].page_number, self.pages[index].virtual_address);
            }
            self.pages[index].heap_allocation_start = 0;
            self.pages[index].dirty = false;
        }
        0
    }

    /// Owned pages whose process-virtual index falls in `[heap_start,
    /// heap_end)`, in address order. The kernel registers these once per
    /// process at creation.
    pub fn heap_page_indices(&self, pid: Pid, heap_start: u32, heap_end: u32) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, page)| {
                page.owner_pid == pid
                    && page.process_virtual_index >= heap_start
                    && page.process_virtual_index < heap_end
            })
            .map(|(index, _)| index)
            .collect();
        indices.sort_by_key(|&index| self.pages[index].process_virtual_index);
        indices
    }

    pub fn page_faults_for_process(&self, pid: Pid) -> u32 {
        self.pages
            .iter()
            .filter(|page| page.owner_pid == pid)
            .map(|page| page.page_faults)
            .sum()
    }
}
