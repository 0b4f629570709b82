//! Frame buffer backends
//!
//! The compositor renders into a [`Screen`]. `flush` is called once per
//! composite with exactly the region that was painted.

use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::path::Path;
use std::ptr::NonNull;

use anyhow::{Context, Result};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tessera_proto::{Rect, Region};
use tracing::info;

/// A linear 32-bit pixel surface
pub trait Screen: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn pixels(&self) -> &[u32];

    fn pixels_mut(&mut self) -> &mut [u32];

    /// Make the pixels inside `damage` visible
    fn flush(&mut self, damage: &Region);

    fn rect(&self) -> Rect {
        Rect::new(0, 0, self.width() as i32, self.height() as i32)
    }
}

/// Heap-backed screen that records every flushed region
#[derive(Debug)]
pub struct MemoryScreen {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    flushed: Vec<Region>,
    writes: usize,
}

impl MemoryScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            flushed: Vec::new(),
            writes: 0,
        }
    }

    pub fn pixel(&self, x: i32, y: i32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Regions flushed since the last call
    pub fn take_flushed(&mut self) -> Vec<Region> {
        std::mem::take(&mut self.flushed)
    }

    /// Times the pixels were borrowed for writing
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Screen for MemoryScreen {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    fn pixels_mut(&mut self) -> &mut [u32] {
        self.writes += 1;
        &mut self.pixels
    }

    fn flush(&mut self, damage: &Region) {
        self.flushed.push(damage.clone());
    }
}

/// Memory-mapped frame buffer device with a shadow buffer.
///
/// Composition happens in the shadow copy; `flush` copies the damaged
/// rectangles to the device so the display never shows partial frames.
pub struct FramebufferScreen {
    shadow: MemoryScreen,
    map: NonNull<u32>,
    len: usize,
}

// The mapping is only touched through `&mut self`.
unsafe impl Send for FramebufferScreen {}

impl FramebufferScreen {
    /// Map `device` as a `width`×`height` 32bpp linear frame buffer
    pub fn open(device: &Path, width: u32, height: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .with_context(|| format!("Failed to open frame buffer {:?}", device))?;
        let len = width as usize * height as usize * 4;
        let length = NonZeroUsize::new(len).context("Frame buffer has zero size")?;
        // SAFETY: fresh shared mapping of the device; nothing else aliases it.
        let map = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .with_context(|| format!("Failed to map frame buffer {:?}", device))?;
        info!("Mapped frame buffer {:?} ({}x{})", device, width, height);
        Ok(Self {
            shadow: MemoryScreen::new(width, height),
            map: map.cast(),
            len,
        })
    }

    fn device(&mut self) -> &mut [u32] {
        // SAFETY: the mapping is `len` bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts_mut(self.map.as_ptr(), self.len / 4) }
    }
}

impl Screen for FramebufferScreen {
    fn width(&self) -> u32 {
        self.shadow.width
    }

    fn height(&self) -> u32 {
        self.shadow.height
    }

    fn pixels(&self) -> &[u32] {
        &self.shadow.pixels
    }

    fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.shadow.pixels
    }

    fn flush(&mut self, damage: &Region) {
        let stride = self.shadow.width as usize;
        let shadow = std::mem::take(&mut self.shadow.pixels);
        let device = self.device();
        for rect in damage.rects() {
            for y in rect.y..rect.bottom() {
                let start = y as usize * stride + rect.x as usize;
                let end = start + rect.width as usize;
                device[start..end].copy_from_slice(&shadow[start..end]);
            }
        }
        self.shadow.pixels = shadow;
    }
}

impl Drop for FramebufferScreen {
    fn drop(&mut self) {
        // SAFETY: map/len come from the successful mmap in `open`.
        unsafe {
            let _ = munmap(self.map.cast(), self.len);
        }
    }
}
