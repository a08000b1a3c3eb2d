use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// On-disk payload of one swapped-out page: the page bytes plus the two
/// counters that must survive eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageValue {
    pub bytes: Vec<u8>,
    pub access_count: u64,
    pub last_accessed: u64,
}

/// Swap-file storage under a single directory (the working directory in a
/// normal run; tests point it somewhere private).
///
/// Each page owns exactly one deterministic file name, so there is never
/// concurrent access to the same file. Files do not outlive a run: boot
/// wipes stale ones and swap-in deletes what it reads.
#[derive(Debug)]
pub struct SwapDir {
    dir: PathBuf,
}

/// `page{N}-{V}.xml`, where N is the page number and V the page's virtual
/// address. The name is a pinned external contract; the payload encoding is
/// not, and is serde_json here.
pub fn file_name(page_number: u32, virtual_address: u32) -> String {
    format!("page{}-{}.xml", page_number, virtual_address)
}

impl SwapDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, page_number: u32, virtual_address: u32) -> PathBuf {
        self.dir.join(file_name(page_number, virtual_address))
    }

    /// Write a page out. Swap I/O failure is a host-level invariant
    /// violation, not a guest fault, so it panics.
    pub fn write_out(&self, page_number: u32, virtual_address: u32, value: &PageValue) {
        let path = self.file_path(page_number, virtual_address);
        let payload = serde_json::to_string(value).expect("swap payload serialization failed");
        fs::write(&path, payload)
            .unwrap_or_else(|e| panic!("swap out to {} failed: {}", path.display(), e));
    }

    /// Read a page back in and delete its file. Returns `None` when no file
    /// exists, which means the page was never swapped out dirty; the caller
    /// materializes a zero-filled frame instead.
    pub fn read_in(&self, page_number: u32, virtual_address: u32) -> Option<PageValue> {
        let path = self.file_path(page_number, virtual_address);
        if !path.exists() {
            return None;
        }
        let payload = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("swap in from {} failed: {}", path.display(), e));
        let value: PageValue = serde_json::from_str(&payload)
            .unwrap_or_else(|e| panic!("corrupt swap file {}: {}", path.display(), e));
        fs::remove_file(&path)
            .unwrap_or_else(|e| panic!("removing swap file {} failed: {}", path.display(), e));
        Some(value)
    }

    /// Drop a page's swap file if one exists (process teardown).
    pub fn remove(&self, page_number: u32, virtual_address: u32) {
        let path = self.file_path(page_number, virtual_address);
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
    }

    /// Delete every file in the directory that looks like a swap file.
    /// Called once at boot so a crashed previous run leaves nothing behind.
    pub fn clean_stale(&self) {
        let name_re = Regex::new(r"^page\d+-\d+\.xml$").expect("swap name pattern");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if name_re.is_match(name) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_swap(tag: &str) -> SwapDir {
        let dir = std::env::temp_dir().join(format!("swap-unit-{}", tag));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        SwapDir::new(dir)
    }

    #[test]
    fn file_name_shape() {
        assert_eq!(file_name(3, 48), "page3-48.xml");
    }

    #[test]
    fn write_read_round_trip_deletes_file() {
        let swap = temp_swap("round-trip");
        let value = PageValue {
            bytes: vec![1, 2, 3, 4],
            access_count: 9,
            last_accessed: 42,
        };
        swap.write_out(7, 112, &value);
        assert!(swap.path().join("page7-112.xml").exists());

        let restored = swap.read_in(7, 112).expect("swap file present");
        assert_eq!(restored, value);
        assert!(!swap.path().join("page7-112.xml").exists());
    }

    #[test]
    fn read_in_missing_file_is_none() {
        let swap = temp_swap("missing");
        assert_eq!(swap.read_in(0, 0), None);
    }

    #[test]
    fn clean_stale_only_touches_swap_names() {
        let swap = temp_swap("stale");
        fs::write(swap.path().join("page1-16.xml"), "{}").unwrap();
        fs::write(swap.path().join("keep.txt"), "data").unwrap();
        swap.clean_stale();
        assert!(!swap.path().join("page1-16.xml").exists());
        assert!(swap.path().join("keep.txt").exists());
    }
}
