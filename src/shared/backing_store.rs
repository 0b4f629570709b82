//! Backing stores: the pixels behind each window
//!
//! Remote clients render into a shared-memory buffer the server reads
//! with positioned copies; in-process windows keep a heap buffer. A window
//! without a usable buffer is `Unattached` and only takes part in
//! occlusion.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use nix::errno::Errno;
use tessera_proto::shm::{BufferLock, SharedSource, ShmError};
use tessera_proto::{Rect, WindowId};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempts at the shared reader lock before a pass gives up on a buffer
const LOCK_ATTEMPTS: u32 = 5;

/// Wait after the first failed attempt; doubled after each further one
const LOCK_BACKOFF: Duration = Duration::from_micros(125);

const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(2);

/// Why a backing store yielded no pixels
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("no backing store attached")]
    Unattached,

    /// The client held its painter lock through every attempt
    #[error("backing store is being painted")]
    Busy,

    /// The buffer shrank or could not be read
    #[error("backing store is unreadable")]
    Unreadable,
}

/// A heap pixel buffer owned by the server
#[derive(Debug, Clone)]
pub struct LocalBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl LocalBuffer {
    /// Create a buffer filled with `color`
    pub fn new(width: u32, height: u32, color: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    pub fn fill(&mut self, color: u32) {
        self.pixels.fill(color);
    }
}

/// Pixel source of a window
#[derive(Debug, Default)]
pub enum BackingStore {
    Shared(SharedSource),
    Local(LocalBuffer),
    #[default]
    Unattached,
}

impl BackingStore {
    /// Pixels of the rows `area` covers, in buffer coordinates.
    ///
    /// Shared buffers are copied out under the reader lock, which is
    /// released before this returns. A painter holding the lock through
    /// every backoff attempt yields [`StoreError::Busy`]; pixels are never
    /// read unlocked.
    pub fn lock(&self, area: Rect) -> Result<PixelView<'_>, StoreError> {
        match self {
            BackingStore::Shared(buffer) => {
                let (width, height) = (buffer.width(), buffer.height());
                let top = area.y.clamp(0, height as i32) as u32;
                let bottom = area.bottom().clamp(0, height as i32) as u32;
                let mut pixels = Vec::new();
                if bottom > top {
                    let _lock = lock_shared(buffer)?;
                    buffer
                        .read_rows(top, bottom - top, &mut pixels)
                        .map_err(|e| {
                            warn!("Backing store {:#x} unreadable: {}", buffer.key(), e);
                            StoreError::Unreadable
                        })?;
                }
                Ok(PixelView {
                    width,
                    height,
                    first_row: top,
                    pixels: Cow::Owned(pixels),
                })
            }
            BackingStore::Local(buffer) => Ok(PixelView {
                width: buffer.width,
                height: buffer.height,
                first_row: 0,
                pixels: Cow::Borrowed(&buffer.pixels),
            }),
            BackingStore::Unattached => Err(StoreError::Unattached),
        }
    }

    pub fn is_attached(&self) -> bool {
        !matches!(self, BackingStore::Unattached)
    }
}

fn lock_shared(buffer: &SharedSource) -> Result<BufferLock, StoreError> {
    let mut delay = LOCK_BACKOFF;
    for attempt in 0..LOCK_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(delay);
            delay = (delay * 2).min(LOCK_BACKOFF_MAX);
        }
        match buffer.try_lock_shared() {
            Ok(lock) => return Ok(lock),
            Err(Errno::EWOULDBLOCK) | Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("Locking backing store {:#x} failed: {}", buffer.key(), e);
                return Err(StoreError::Unreadable);
            }
        }
    }
    debug!("Backing store {:#x} busy, deferring", buffer.key());
    Err(StoreError::Busy)
}

/// Read-only copy of some rows of a backing store
pub struct PixelView<'a> {
    width: u32,
    height: u32,
    first_row: u32,
    pixels: Cow<'a, [u32]>,
}

impl PixelView<'_> {
    /// Pixel at buffer coordinates, `None` outside the buffer or the copied rows
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let row = (y as u32).checked_sub(self.first_row)? as usize;
        self.pixels
            .get(row * self.width as usize + x as usize)
            .copied()
    }
}

/// Backing stores keyed by window
#[derive(Debug, Default)]
pub struct BackingStoreManager {
    stores: HashMap<WindowId, BackingStore>,
}

impl BackingStoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the shared buffer `shm_key` for `window`.
    ///
    /// Key 0 detaches. A failed attach leaves the window unattached and
    /// returns the error for logging. Re-attaching the buffer already in
    /// place is a no-op.
    pub fn attach(
        &mut self,
        window: WindowId,
        shm_key: u32,
        width: u32,
        height: u32,
    ) -> Result<(), ShmError> {
        if shm_key == 0 {
            self.stores.insert(window, BackingStore::Unattached);
            return Ok(());
        }
        if let Some(BackingStore::Shared(current)) = self.stores.get(&window) {
            if current.key() == shm_key && current.width() == width && current.height() == height
            {
                return Ok(());
            }
        }
        match SharedSource::open(shm_key, width, height) {
            Ok(buffer) => {
                info!(
                    "Attached backing store {:#x} ({}x{}) to window {}",
                    shm_key, width, height, window
                );
                self.stores.insert(window, BackingStore::Shared(buffer));
                Ok(())
            }
            Err(e) => {
                self.stores.insert(window, BackingStore::Unattached);
                Err(e)
            }
        }
    }

    /// Give `window` a server-owned buffer
    pub fn attach_local(&mut self, window: WindowId, buffer: LocalBuffer) {
        self.stores.insert(window, BackingStore::Local(buffer));
    }

    pub fn local_mut(&mut self, window: WindowId) -> Option<&mut LocalBuffer> {
        match self.stores.get_mut(&window) {
            Some(BackingStore::Local(buffer)) => Some(buffer),
            _ => None,
        }
    }

    pub fn detach(&mut self, window: WindowId) {
        if self.stores.remove(&window).is_some() {
            debug!("Detached backing store of window {}", window);
        }
    }

    pub fn get(&self, window: WindowId) -> Option<&BackingStore> {
        self.stores.get(&window)
    }

    /// Drop a buffer that failed to read; the window keeps only occluding
    pub fn mark_unreadable(&mut self, window: WindowId) {
        if let Some(store) = self.stores.get_mut(&window) {
            *store = BackingStore::Unattached;
        }
    }

    pub fn lock(&self, window: WindowId, area: Rect) -> Result<PixelView<'_>, StoreError> {
        self.stores
            .get(&window)
            .ok_or(StoreError::Unattached)?
            .lock(area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_proto::shm::SharedBuffer;

    #[test]
    fn local_view_bounds() {
        let mut manager = BackingStoreManager::new();
        let mut buffer = LocalBuffer::new(2, 2, 0xff000000);
        buffer.pixels[3] = 0xffffffff;
        manager.attach_local(9, buffer);

        let view = manager.lock(9, Rect::new(0, 0, 2, 2)).unwrap();
        assert_eq!(view.pixel(1, 1), Some(0xffffffff));
        assert_eq!(view.pixel(0, 1), Some(0xff000000));
        assert_eq!(view.pixel(2, 0), None);
        assert_eq!(view.pixel(-1, 0), None);
    }

    #[test]
    fn stale_handle_degrades_to_unattached() {
        let mut manager = BackingStoreManager::new();
        assert!(manager.attach(4, 0x0bad_f00d, 8, 8).is_err());
        assert!(matches!(manager.get(4), Some(BackingStore::Unattached)));
        assert_eq!(manager.lock(4, Rect::new(0, 0, 8, 8)).err(), Some(StoreError::Unattached));
    }

    #[test]
    fn zero_key_detaches() {
        let mut manager = BackingStoreManager::new();
        manager.attach_local(1, LocalBuffer::new(1, 1, 0));
        manager.attach(1, 0, 1, 1).unwrap();
        assert!(!manager.get(1).unwrap().is_attached());
        manager.detach(1);
        assert!(manager.get(1).is_none());
    }

    fn shared(salt: u32, width: u32, height: u32) -> Option<(u32, SharedBuffer)> {
        let key = 0x5b00_0000 | (salt << 12) | (std::process::id() & 0xfff);
        match SharedBuffer::create(key, width, height) {
            Ok(buffer) => Some((key, buffer)),
            // No /dev/shm in this environment
            Err(ShmError::Open { .. }) => None,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn shared_view_copies_requested_rows() {
        let Some((key, mut writer)) = shared(1, 4, 4) else {
            return;
        };
        writer.pixels_mut()[2 * 4 + 3] = 0xff12_3456;
        let mut manager = BackingStoreManager::new();
        manager.attach(3, key, 4, 4).unwrap();

        let view = manager.lock(3, Rect::new(0, 2, 4, 1)).unwrap();
        assert_eq!(view.pixel(3, 2), Some(0xff12_3456));
        assert_eq!(view.pixel(3, 1), None);
        assert_eq!(view.pixel(3, 3), None);

        SharedBuffer::unlink(key);
    }

    #[test]
    fn painter_holding_the_lock_makes_the_store_busy() {
        let Some((key, writer)) = shared(2, 4, 4) else {
            return;
        };
        let mut manager = BackingStoreManager::new();
        manager.attach(3, key, 4, 4).unwrap();

        let painting = writer.try_lock_exclusive().unwrap();
        assert_eq!(manager.lock(3, Rect::new(0, 0, 4, 4)).err(), Some(StoreError::Busy));
        drop(painting);
        assert!(manager.lock(3, Rect::new(0, 0, 4, 4)).is_ok());

        SharedBuffer::unlink(key);
    }

    #[test]
    fn truncated_store_is_unreadable() {
        let Some((key, writer)) = shared(3, 32, 32) else {
            return;
        };
        let mut manager = BackingStoreManager::new();
        manager.attach(3, key, 32, 32).unwrap();

        truncate(key);
        assert_eq!(
            manager.lock(3, Rect::new(0, 16, 32, 16)).err(),
            Some(StoreError::Unreadable)
        );
        manager.mark_unreadable(3);
        assert!(!manager.get(3).unwrap().is_attached());

        drop(writer);
        SharedBuffer::unlink(key);
    }

    fn truncate(key: u32) {
        use nix::fcntl::OFlag;
        use nix::sys::mman::shm_open;
        use nix::sys::stat::Mode;

        let name = tessera_proto::shm::shm_name(key);
        let fd = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty()).unwrap();
        std::fs::File::from(fd).set_len(0).unwrap();
    }
}
