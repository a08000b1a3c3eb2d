use std::fs;
use std::path::PathBuf;

use memory::MemoryManager;
use once_cell::sync::Lazy;
use types::{Config, Fault};

/// Small machine used across the suite: 4 physical frames, 16 virtual pages,
/// no shared regions unless a test asks for them.
static SMALL: Lazy<Config> = Lazy::new(|| Config {
    physical_memory: 64,
    memory_page_size: 16,
    num_of_shared_memory_regions: 0,
    shared_memory_region_size: 0,
    ..Config::default()
});

fn swap_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("paging-test-{}", tag));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn small_manager(tag: &str) -> MemoryManager {
    MemoryManager::new(256, &SMALL, swap_dir(tag))
}

#[test]
fn boot_identity_maps_the_resident_prefix() {
    let mm = small_manager("boot");
    let pages = mm.pages();
    assert_eq!(pages.len(), 16);
    for n in 0..4 {
        assert!(pages[n].valid);
        assert_eq!(pages[n].physical_address, n as u32 * 16);
    }
    for page in &pages[4..] {
        assert!(!page.valid);
    }
    assert_eq!(mm.free_frame_count(), 0);
}

#[test]
fn boot_wipes_stale_swap_files() {
    let dir = swap_dir("stale-boot");
    fs::write(dir.join("page3-48.xml"), "{}").unwrap();
    fs::write(dir.join("notes.txt"), "keep").unwrap();
    let _mm = MemoryManager::new(256, &SMALL, dir.clone());
    assert!(!dir.join("page3-48.xml").exists());
    assert!(dir.join("notes.txt").exists());
}

#[test]
fn translation_rejects_foreign_offsets() {
    let mut mm = small_manager("isolation");
    mm.map_process(64, 1).unwrap();
    mm.map_process(64, 2).unwrap();

    mm.write(1, 0, 0xaa).unwrap();
    assert_eq!(mm.read(1, 0).unwrap(), 0xaa);
    // Pid 2's offset 0 is a different page entirely.
    assert_eq!(mm.read(2, 0).unwrap(), 0);
    // Past the end of pid 1's 64 bytes there is nothing.
    assert_eq!(
        mm.read(1, 64),
        Err(Fault::Memory { pid: 1, address: 64 })
    );
}

#[test]
fn each_owned_offset_maps_to_exactly_one_page() {
    let mut mm = small_manager("unique");
    mm.map_process(96, 1).unwrap();
    for offset in (0..96).step_by(16) {
        let owners = mm
            .pages()
            .iter()
            .filter(|p| p.owner_pid == 1 && p.process_virtual_index == offset)
            .count();
        assert_eq!(owners, 1, "offset {} must have one backing page", offset);
    }
}

#[test]
fn u32_values_straddle_page_boundaries() {
    let mut mm = small_manager("straddle");
    mm.map_process(64, 1).unwrap();
    mm.write_u32(1, 14, 0xdead_beef).unwrap();
    assert_eq!(mm.read_u32(1, 14).unwrap(), 0xdead_beef);
}

#[test]
fn valid_pages_never_exceed_frame_count() {
    let mut mm = small_manager("residency");
    // Map the whole virtual space and touch every page.
    mm.map_process(256, 1).unwrap();
    for offset in (0..256).step_by(16) {
        mm.write(1, offset, offset as u8).unwrap();
    }
    let resident = mm.pages().iter().filter(|p| p.valid).count();
    assert_eq!(resident, 4);
    assert_eq!(mm.free_frame_count(), 0);
}

#[test]
fn eviction_round_trips_dirty_pages_through_swap() {
    let mut mm = small_manager("swap-round-trip");
    mm.map_process(256, 1).unwrap();

    // Dirty offset 0, then touch enough other pages to evict it.
    mm.write(1, 0, 0x5a).unwrap();
    let (access_before, last_before) = {
        let page = mm
            .pages()
            .iter()
            .find(|p| p.owner_pid == 1 && p.process_virtual_index == 0)
            .unwrap();
        (page.access_count, page.last_accessed)
    };
    for offset in (16..256).step_by(16) {
        mm.write(1, offset, 1).unwrap();
    }
    {
        let page = mm
            .pages()
            .iter()
            .find(|p| p.owner_pid == 1 && p.process_virtual_index == 0)
            .unwrap();
        assert!(!page.valid, "offset 0 should have been evicted");
    }

    // Fault it back in: bytes and access count restored, clock monotone.
    assert_eq!(mm.read(1, 0).unwrap(), 0x5a);
    let page = mm
        .pages()
        .iter()
        .find(|p| p.owner_pid == 1 && p.process_virtual_index == 0)
        .unwrap();
    assert_eq!(page.access_count, access_before);
    assert!(page.last_accessed >= last_before);
    assert!(page.page_faults >= 1);
}

#[test]
fn clean_pages_fault_back_in_as_zeros() {
    let mut mm = small_manager("clean-fault");
    mm.map_process(256, 1).unwrap();
    // Read (never write) offset 0, evict it by dirtying everything else,
    // then fault it back: a clean page has no swap file and reads zero.
    assert_eq!(mm.read(1, 0).unwrap(), 0);
    for offset in (16..256).step_by(16) {
        mm.write(1, offset, 7).unwrap();
    }
    assert_eq!(mm.read(1, 0).unwrap(), 0);
}

#[test]
fn lru_picks_the_least_recently_used_victim() {
    let mut mm = small_manager("lru");
    mm.map_process(256, 1).unwrap();
    // Touch pages 0..4 in order; they fill all four frames.
    for offset in [0u32, 16, 32, 48] {
        mm.write(1, offset, 1).unwrap();
    }
    // Refresh page 0 so page at offset 16 becomes LRU.
    mm.read(1, 0).unwrap();
    // Fault a fifth page in; offset 16 must be the one that leaves.
    mm.write(1, 64, 1).unwrap();
    let evicted = mm
        .pages()
        .iter()
        .find(|p| p.owner_pid == 1 && p.process_virtual_index == 16)
        .unwrap();
    assert!(!evicted.valid);
    let kept = mm
        .pages()
        .iter()
        .find(|p| p.owner_pid == 1 && p.process_virtual_index == 0)
        .unwrap();
    assert!(kept.valid);
}

#[test]
fn map_process_rejects_what_the_space_cannot_hold() {
    let mut mm = small_manager("oom");
    mm.map_process(192, 1).unwrap();
    let err = mm.map_process(128, 2).unwrap_err();
    assert_eq!(err.pid, 2);
    assert_eq!(err.requested_pages, 8);
    assert_eq!(err.free_pages, 4);
}

#[test]
fn release_returns_pages_and_zeroes_content() {
    let mut mm = small_manager("release");
    mm.map_process(64, 1).unwrap();
    mm.write(1, 0, 0xff).unwrap();
    let free_before = mm.free_page_count();
    mm.release_process(1);
    assert_eq!(mm.free_page_count(), free_before + 4);
    // Remap the same pages to a new pid: content must be gone.
    mm.map_process(64, 2).unwrap();
    assert_eq!(mm.read(2, 0).unwrap(), 0);
}

#[test]
fn set_range_is_idempotent() {
    let mut mm = small_manager("set-range");
    mm.map_process(64, 1).unwrap();
    mm.set_range(1, 8, 24, 0).unwrap();
    mm.set_range(1, 8, 24, 0).unwrap();
    for offset in 8..32 {
        assert_eq!(mm.read(1, offset).unwrap(), 0);
    }
}

mod heap {
    use super::*;

    /// A process with a 4-page heap at offsets [32, 96).
    fn heap_fixture(tag: &str) -> (MemoryManager, Vec<usize>) {
        let mut mm = small_manager(tag);
        mm.map_process(128, 1).unwrap();
        let heap = mm.heap_page_indices(1, 32, 96);
        assert_eq!(heap.len(), 4);
        (mm, heap)
    }

    #[test]
    fn alloc_claims_a_contiguous_run() {
        let (mut mm, heap) = heap_fixture("alloc");
        let addr = mm.heap_alloc(1, &heap, 33).unwrap();
        assert_eq!(addr, 32);
        let claimed = heap
            .iter()
            .filter(|&&i| mm.pages()[i].heap_allocation_start == 32)
            .count();
        assert_eq!(claimed, 3);
    }

    #[test]
    fn exhaustion_raises_heap_fault_and_keeps_live_allocations() {
        let (mut mm, heap) = heap_fixture("exhaustion");
        let addr = mm.heap_alloc(1, &heap, 48).unwrap();
        assert_eq!(
            mm.heap_alloc(1, &heap, 32),
            Err(Fault::Heap {
                pid: 1,
                requested: 32
            })
        );
        // The three-page allocation is still live after the failed alloc.
        let claimed = heap
            .iter()
            .filter(|&&i| mm.pages()[i].heap_allocation_start == addr)
            .count();
        assert_eq!(claimed, 3);
    }

    #[test]
    fn free_restores_the_pre_alloc_state() {
        let (mut mm, heap) = heap_fixture("free");
        let addr = mm.heap_alloc(1, &heap, 48).unwrap();
        mm.write(1, addr, 0xee).unwrap();
        assert_eq!(mm.heap_free(addr, &heap), 0);
        assert!(heap
            .iter()
            .all(|&i| mm.pages()[i].heap_allocation_start == 0));
        // Freed bytes read back as the zero fill.
        assert_eq!(mm.read(1, addr).unwrap(), 0);
        // The full heap is allocatable again.
        assert_eq!(mm.heap_alloc(1, &heap, 64).unwrap(), 32);
    }

    #[test]
    fn free_of_an_address_never_allocated_clears_nothing() {
        let (mut mm, heap) = heap_fixture("free-unknown");
        let addr = mm.heap_alloc(1, &heap, 16).unwrap();
        mm.heap_free(48, &heap);
        mm.heap_free(0, &heap);
        // The live allocation is untouched by either bogus free.
        let claimed = heap
            .iter()
            .filter(|&&i| mm.pages()[i].heap_allocation_start == addr)
            .count();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn zero_byte_alloc_claims_no_pages() {
        let (mut mm, heap) = heap_fixture("zero");
        assert_eq!(mm.heap_alloc(1, &heap, 0).unwrap(), 0);
        assert!(heap
            .iter()
            .all(|&i| mm.pages()[i].heap_allocation_start == 0));
    }

    #[test]
    fn fragmentation_blocks_a_run_that_would_otherwise_fit() {
        let (mut mm, heap) = heap_fixture("fragmentation");
        let a = mm.heap_alloc(1, &heap, 16).unwrap();
        let b = mm.heap_alloc(1, &heap, 16).unwrap();
        let c = mm.heap_alloc(1, &heap, 16).unwrap();
        let d = mm.heap_alloc(1, &heap, 16).unwrap();
        assert_eq!((a, b, c, d), (32, 48, 64, 80));
        // Free pages one and three: two pages free, but not adjacent.
        mm.heap_free(a, &heap);
        mm.heap_free(c, &heap);
        assert!(mm.heap_alloc(1, &heap, 32).is_err());
        // A single page still fits in either hole.
        assert_eq!(mm.heap_alloc(1, &heap, 16).unwrap(), 32);
    }
}

mod shared {
    use super::*;

    static SHARED: Lazy<Config> = Lazy::new(|| Config {
        physical_memory: 64,
        memory_page_size: 16,
        num_of_shared_memory_regions: 2,
        shared_memory_region_size: 32,
        ..Config::default()
    });

    #[test]
    fn boot_reserves_contiguous_descending_regions() {
        let mm = MemoryManager::new(256, &SHARED, swap_dir("reserve"));
        let ids: Vec<u32> = mm.pages().iter().map(|p| p.shared_region_id).collect();
        // Two regions of two pages each, ids descending from R.
        assert_eq!(&ids[..4], &[2, 2, 1, 1]);
        assert!(ids[4..].iter().all(|&id| id == 0));
    }

    #[test]
    fn shared_pages_are_skipped_by_map_process() {
        let mut mm = MemoryManager::new(256, &SHARED, swap_dir("skip"));
        mm.map_process(32, 1).unwrap();
        let owned: Vec<u32> = mm
            .pages()
            .iter()
            .filter(|p| p.owner_pid == 1)
            .map(|p| p.page_number)
            .collect();
        // The first four pages are region pages; pid 1 starts at page 4.
        assert_eq!(owned, vec![4, 5]);
    }

    #[test]
    fn two_processes_see_the_same_bytes() {
        let mut mm = MemoryManager::new(256, &SHARED, swap_dir("two-procs"));
        mm.map_process(32, 1).unwrap();
        mm.map_process(32, 2).unwrap();

        let a = mm.map_shared_to_process(1, 1).expect("region 1 exists");
        let b = mm.map_shared_to_process(1, 2).expect("region 1 exists");
        // Each process appends the region one page past its own 32 bytes.
        assert_eq!(a, 32);
        assert_eq!(b, 32);

        mm.write(1, a + 5, 0x77).unwrap();
        assert_eq!(mm.read(2, b + 5).unwrap(), 0x77);
    }

    #[test]
    fn unreserved_region_maps_nothing() {
        let mut mm = MemoryManager::new(256, &SHARED, swap_dir("unreserved"));
        mm.map_process(32, 1).unwrap();
        assert_eq!(mm.map_shared_to_process(9, 1), None);
        assert_eq!(mm.map_shared_to_process(0, 1), None);
    }

    #[test]
    fn release_detaches_shared_mappings() {
        let mut mm = MemoryManager::new(256, &SHARED, swap_dir("detach"));
        mm.map_process(32, 1).unwrap();
        let offset = mm.map_shared_to_process(1, 1).unwrap();
        mm.release_process(1);
        assert!(mm
            .pages()
            .iter()
            .all(|p| p.shared_owners.iter().all(|o| o.pid != 1)));
        // A fresh process reusing pid 1 must not inherit the mapping.
        mm.map_process(32, 1).unwrap();
        assert_eq!(
            mm.read(1, offset),
            Err(Fault::Memory {
                pid: 1,
                address: offset
            })
        );
    }
}
