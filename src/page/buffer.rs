//! Page latching/buffering module. A fixed in-memory map of
//! `Vpid -> Arc<RwLock<Page>>`, fixed/unfixed by reference count, built on
//! `utils::HandyRwLock`. `fix`/`unfix` hand out an `Arc<Frame>`; the actual
//! shared/exclusive latch is the frame's `RwLock`, acquired by the caller via
//! `read()`/`write()` (unconditional) or `try_read()`/`try_write()`
//! (zero-wait), matching the ordering rule here (header, then home,
//! then forward/new-home, then overflow).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::StoreError;
use crate::ids::{Lsa, Vfid, Vpid};
use crate::io::SmallFile;
use crate::page::slotted::SlottedPage;
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    HeapHeader,
    Heap,
    Overflow,
    ClassnameDirectory,
}

/// A buffered page: the slotted content plus bookkeeping the buffer pool
/// needs (dirty flag, LSA, pin count). Latching is the frame's `RwLock`
/// itself; there is no separate latch object.
pub struct Frame {
    vpid: Vpid,
    page_type: PageType,
    content: RwLock<SlottedPage>,
    dirty: AtomicBool,
    lsa: AtomicI64,
    pin_count: AtomicUsize,
}

pub type PageHandle = Arc<Frame>;

impl Frame {
    pub fn vpid(&self) -> Vpid {
        self.vpid
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, SlottedPage> {
        self.content.rl()
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, SlottedPage> {
        self.content.wl()
    }

    pub fn try_read(&self) -> Option<std::sync::RwLockReadGuard<'_, SlottedPage>> {
        self.content.try_read().ok()
    }

    pub fn try_write(&self) -> Option<std::sync::RwLockWriteGuard<'_, SlottedPage>> {
        self.content.try_write().ok()
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn get_lsa(&self) -> Lsa {
        Lsa(self.lsa.load(Ordering::SeqCst) as u64)
    }

    pub fn set_lsa(&self, lsa: Lsa) {
        self.lsa.store(lsa.0 as i64, Ordering::SeqCst);
    }
}

/// How the caller wants to wait for a frame's own internal latch once it
/// has been fixed; callers most commonly just call `read()`/`write()`
/// directly on the returned handle, this exists for call sites that need to
/// express the wait mode in one place (heap manager's deadlock-avoidance
/// retry loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixWait {
    Unconditional,
    Conditional,
    ZeroWait,
}

struct OpenFile {
    handle: SmallFile,
    path: PathBuf,
}

/// In-memory page buffer backed by one `SmallFile` per volume file id. Does
/// not evict: every fixed frame stays resident until the file itself is
/// destroyed; a simple tradeoff favoring simplicity over memory pressure.
pub struct PageBuffer {
    base_dir: PathBuf,
    page_size: usize,
    frames: RwLock<HashMap<(Vfid, Vpid), PageHandle>>,
    files: RwLock<HashMap<Vfid, OpenFile>>,
}

impl PageBuffer {
    pub fn new<P: AsRef<Path>>(base_dir: P, page_size: usize) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            page_size,
            frames: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
        }
    }

    fn file_path(&self, vfid: Vfid) -> PathBuf {
        self.base_dir.join(format!("vol{}_{}.dat", vfid.volume, vfid.file_seq))
    }

    fn with_file<R>(&self, vfid: Vfid, f: impl FnOnce(&mut SmallFile) -> StoreResult<R>) -> StoreResult<R> {
        let mut files = self.files.wl();
        if !files.contains_key(&vfid) {
            let path = self.file_path(vfid);
            let handle = SmallFile::open(&path, self.page_size)?;
            files.insert(vfid, OpenFile { handle, path });
        }
        let entry = files.get_mut(&vfid).expect("just inserted");
        f(&mut entry.handle)
    }

    /// Allocate and fix a brand-new page at the end of `vfid`'s file.
    pub fn new_page(&self, vfid: Vfid, page_type: PageType) -> StoreResult<PageHandle> {
        let page = SlottedPage::initialize(self.page_size);
        let index = self.with_file(vfid, |f| f.append_page(page.as_bytes()))?;
        let vpid = Vpid::new(vfid.volume, index as i32);
        let frame = Arc::new(Frame {
            vpid,
            page_type,
            content: RwLock::new(page),
            dirty: AtomicBool::new(false),
            lsa: AtomicI64::new(0),
            pin_count: AtomicUsize::new(1),
        });
        self.frames.wl().insert((vfid, vpid), frame.clone());
        Ok(frame)
    }

    /// `fix`: resolve `vpid` to a resident frame, reading it from disk on a
    /// cold start. `wait` is advisory bookkeeping only, see module doc.
    pub fn fix(&self, vfid: Vfid, vpid: Vpid, page_type: PageType, _wait: FixWait) -> StoreResult<PageHandle> {
        if let Some(frame) = self.frames.rl().get(&(vfid, vpid)) {
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            return Ok(frame.clone());
        }

        let bytes = self.with_file(vfid, |f| f.read_page(vpid.page as usize))?;
        let page = SlottedPage::from_bytes(bytes);
        let frame = Arc::new(Frame {
            vpid,
            page_type,
            content: RwLock::new(page),
            dirty: AtomicBool::new(false),
            lsa: AtomicI64::new(0),
            pin_count: AtomicUsize::new(1),
        });

        let mut frames = self.frames.wl();
        let frame = frames.entry((vfid, vpid)).or_insert(frame).clone();
        frame.pin_count.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }

    pub fn unfix(&self, handle: &PageHandle) {
        handle.pin_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn flush(&self, vfid: Vfid, handle: &PageHandle) -> StoreResult<()> {
        if !handle.is_dirty() {
            return Ok(());
        }
        let bytes = handle.read().as_bytes().to_vec();
        self.with_file(vfid, |f| f.write_page(handle.vpid().page as usize, &bytes))?;
        handle.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn flush_all(&self, vfid: Vfid) -> StoreResult<()> {
        let frames: Vec<PageHandle> = self
            .frames
            .rl()
            .iter()
            .filter(|((fid, _), _)| *fid == vfid)
            .map(|(_, f)| f.clone())
            .collect();
        for frame in frames {
            self.flush(vfid, &frame)?;
        }
        self.with_file(vfid, |f| f.sync())
    }

    pub fn destroy_file(&self, vfid: Vfid) -> StoreResult<()> {
        self.frames.wl().retain(|(fid, _), _| *fid != vfid);
        if let Some(entry) = self.files.wl().remove(&vfid) {
            std::fs::remove_file(&entry.path)
                .map_err(|e| StoreError::recovery(format!("remove file failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn num_pages(&self, vfid: Vfid) -> StoreResult<usize> {
        self.with_file(vfid, |f| f.num_pages())
    }
}
