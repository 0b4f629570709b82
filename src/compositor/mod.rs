//! Compositor Module
//!
//! Software compositor. A pass receives a damaged region and the stack
//! index of the window that changed, walks the stack front to back while
//! shrinking the still-exposed region, and paints:
//!
//! - opaque windows straight from their backing store (bit-exact copy),
//! - the background where no window claims a pixel,
//! - every area under a translucent window once, through a scratch buffer
//!   filled back to front.
//!
//! Windows in front of the changing index keep their on-screen pixels.
//! Pixels whose backing store is mid-paint are left alone and reported as
//! deferred so the caller can retry them.

pub mod blend;
pub mod cursor;
pub mod screen;

use tessera_proto::{Rect, Region, WindowId};
use tracing::debug;

use crate::shared::{BackingStoreManager, StoreError};
use crate::wm::{Damage, Window, WindowManager};
use blend::{blend_pixel, pixel_alpha};
use cursor::CursorManager;
use screen::Screen;

/// What a compositing pass painted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeReport {
    /// Pixels copied directly from each window's backing store
    pub direct: Vec<(WindowId, Region)>,
    /// Pixels filled with the background outside any blend
    pub background: Region,
    /// Pixels produced by the blend scratch buffer
    pub blended: Region,
    /// Everything flushed to the screen
    pub damaged: Region,
    /// Pixels left untouched because their backing store was busy
    pub deferred: Region,
    /// Windows whose backing store could not be read
    pub unreadable: Vec<WindowId>,
}

impl CompositeReport {
    /// Pixels copied directly from `window`
    pub fn direct_for(&self, window: WindowId) -> Region {
        self.direct
            .iter()
            .filter(|(id, _)| *id == window)
            .fold(Region::new(), |acc, (_, r)| acc.union(r))
    }

    /// Account for `region` of `window` that was not painted
    fn skipped(&mut self, window: WindowId, region: &Region, error: StoreError) {
        match error {
            StoreError::Unattached => {}
            StoreError::Busy => self.deferred = self.deferred.union(region),
            StoreError::Unreadable => {
                if !self.unreadable.contains(&window) {
                    self.unreadable.push(window);
                }
            }
        }
    }
}

/// One contribution to the blend scratch buffer
struct Layer<'a> {
    window: &'a Window,
    region: Region,
}

/// Software compositor
#[derive(Debug)]
pub struct Compositor {
    background: u32,
    software_cursor: bool,
    /// Set while the screen is blanked
    suspended: bool,
}

impl Compositor {
    /// Create a new compositor
    pub fn new(background: u32, software_cursor: bool) -> Self {
        Self {
            background,
            software_cursor,
            suspended: false,
        }
    }

    pub fn background(&self) -> u32 {
        self.background
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Blank the screen and stop compositing until resumed
    pub fn suspend(&mut self, screen: &mut dyn Screen) {
        if self.suspended {
            return;
        }
        debug!("Compositing suspended");
        self.suspended = true;
        screen.pixels_mut().fill(0xff00_0000);
        screen.flush(&Region::from_rect(screen.rect()));
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Recomposite `damage` onto `screen`
    pub fn composite(
        &self,
        damage: &Damage,
        windows: &WindowManager,
        stores: &BackingStoreManager,
        cursor: &CursorManager,
        screen: &mut dyn Screen,
    ) -> CompositeReport {
        let mut report = CompositeReport::default();
        let screen_rect = screen.rect();
        let changed = damage.region.intersect_rect(screen_rect);
        if changed.is_empty() || self.suspended {
            return report;
        }

        let stride = screen.width();
        let mut remaining = changed.clone();
        let mut blend = Region::new();
        // Front to back
        let mut layers: Vec<Layer<'_>> = Vec::new();
        let mut painted = Region::new();

        for (index, window) in windows.stacked().enumerate() {
            if remaining.is_empty() {
                break;
            }
            if !window.is_painted() {
                continue;
            }
            let visible = window.requested.intersect(&remaining);
            if visible.is_empty() {
                continue;
            }

            if window.occludes() {
                let direct = visible.subtract(&blend);
                if index >= damage.changing && !direct.is_empty() {
                    match self.blit(window, &direct, stores, screen) {
                        Ok(()) => {
                            painted = painted.union(&direct);
                            report.direct.push((window.id, direct));
                        }
                        Err(e) => report.skipped(window.id, &direct, e),
                    }
                }
                let under_blend = visible.intersect(&blend);
                if !under_blend.is_empty() {
                    layers.push(Layer {
                        window,
                        region: under_blend,
                    });
                }
                remaining = remaining.subtract(&window.requested);
            } else {
                blend = blend.union(&visible);
                layers.push(Layer {
                    window,
                    region: visible,
                });
            }
        }

        let background = remaining.subtract(&blend);
        if !background.is_empty() {
            fill(screen.pixels_mut(), stride, &background, self.background);
            painted = painted.union(&background);
            report.background = background;
        }

        if !blend.is_empty() {
            let blended = self.compose_blend(&blend, &layers, stores, screen, &mut report);
            painted = painted.union(&blended);
            report.blended = blended;
        }

        if painted.is_empty() {
            return report;
        }
        if self.software_cursor && painted.intersects(&Region::from_rect(cursor.rect())) {
            cursor.draw(screen.pixels_mut(), stride, &painted);
        }
        screen.flush(&painted);
        report.damaged = painted;
        report
    }

    /// Copy an opaque window's pixels
    fn blit(
        &self,
        window: &Window,
        region: &Region,
        stores: &BackingStoreManager,
        screen: &mut dyn Screen,
    ) -> Result<(), StoreError> {
        let origin = window.origin;
        let view = stores.lock(window.id, buffer_area(region, window))?;
        let stride = screen.width() as usize;
        let pixels = screen.pixels_mut();
        for rect in region.rects() {
            for y in rect.y..rect.bottom() {
                let row = y as usize * stride;
                for x in rect.x..rect.right() {
                    pixels[row + x as usize] = view
                        .pixel(x - origin.x, y - origin.y)
                        .unwrap_or(self.background);
                }
            }
        }
        Ok(())
    }

    /// Paint the blend region through a scratch buffer, back to front.
    ///
    /// Returns what reached the screen: the blend region minus the areas of
    /// layers whose pixels could not be read.
    fn compose_blend(
        &self,
        blend: &Region,
        layers: &[Layer<'_>],
        stores: &BackingStoreManager,
        screen: &mut dyn Screen,
        report: &mut CompositeReport,
    ) -> Region {
        let bounds = blend.bounding_rect();
        let mut scratch = vec![self.background; (bounds.width * bounds.height) as usize];
        let at = |x: i32, y: i32| ((y - bounds.y) * bounds.width + (x - bounds.x)) as usize;

        let mut held = Region::new();
        for layer in layers.iter().rev() {
            let window = layer.window;
            let view = match stores.lock(window.id, buffer_area(&layer.region, window)) {
                Ok(view) => view,
                Err(StoreError::Unattached) => continue,
                Err(e) => {
                    held = held.union(&layer.region);
                    report.skipped(window.id, &layer.region, e);
                    continue;
                }
            };
            let origin = window.origin;
            let per_pixel = !window.is_opaque();
            for rect in layer.region.rects() {
                for y in rect.y..rect.bottom() {
                    for x in rect.x..rect.right() {
                        let Some(src) = view.pixel(x - origin.x, y - origin.y) else {
                            continue;
                        };
                        let dst = &mut scratch[at(x, y)];
                        let alpha = pixel_alpha(src, window.opacity, per_pixel);
                        *dst = blend_pixel(src, *dst, alpha);
                    }
                }
            }
        }

        let output = blend.subtract(&held);
        let stride = screen.width() as usize;
        let pixels = screen.pixels_mut();
        for rect in output.rects() {
            for y in rect.y..rect.bottom() {
                let row = y as usize * stride;
                let start = at(rect.x, y);
                let len = rect.width as usize;
                pixels[row + rect.x as usize..row + rect.right() as usize]
                    .copy_from_slice(&scratch[start..start + len]);
            }
        }
        output
    }
}

/// Bounds of `region` in `window`'s buffer coordinates
fn buffer_area(region: &Region, window: &Window) -> Rect {
    region
        .bounding_rect()
        .translated(-window.origin.x, -window.origin.y)
}

fn fill(pixels: &mut [u32], stride: u32, region: &Region, color: u32) {
    for rect in region.rects() {
        for y in rect.y..rect.bottom() {
            let row = y as usize * stride as usize;
            pixels[row + rect.x as usize..row + rect.right() as usize].fill(color);
        }
    }
}

/// Damage covering the whole screen
pub fn full_screen(screen: &dyn Screen) -> Damage {
    Damage::full(Region::from_rect(Rect::new(
        0,
        0,
        screen.width() as i32,
        screen.height() as i32,
    )))
}
