//! Software cursor
//!
//! Cursor images are scoped to the client that defined them. The shown
//! cursor comes from the override stack when it is non-empty, else from the
//! topmost window under the pointer.

use std::collections::HashMap;

use tessera_proto::{ClientId, Point, Rect, Region, SERVER_CLIENT_ID};
use tracing::debug;

use crate::compositor::blend::blend_pixel;

/// Built-in arrow
pub const ARROW_CURSOR: u32 = 0;

/// Built-in invisible cursor
pub const BLANK_CURSOR: u32 = u32::MAX;

/// A cursor id qualified by the client that defined it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorRef {
    pub owner: ClientId,
    pub id: u32,
}

impl CursorRef {
    pub const ARROW: CursorRef = CursorRef {
        owner: SERVER_CLIENT_ID,
        id: ARROW_CURSOR,
    };

    pub const BLANK: CursorRef = CursorRef {
        owner: SERVER_CLIENT_ID,
        id: BLANK_CURSOR,
    };

    /// Cursor `id` as selected by a window of `owner`; built-ins are shared
    pub fn for_window(owner: ClientId, id: u32) -> Self {
        match id {
            ARROW_CURSOR => Self::ARROW,
            BLANK_CURSOR => Self::BLANK,
            _ => Self { owner, id },
        }
    }
}

/// ARGB cursor bitmap with hotspot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u32,
    pub height: u32,
    pub hot_x: i32,
    pub hot_y: i32,
    pub pixels: Vec<u32>,
}

impl CursorImage {
    /// 12×12 arrow pointing up-left, hotspot at the tip
    fn arrow() -> Self {
        const SIZE: u32 = 12;
        let mut pixels = Vec::with_capacity((SIZE * SIZE) as usize);
        for y in 0..SIZE {
            for x in 0..SIZE {
                let pixel = if x > y {
                    0
                } else if x == 0 || x == y || y == SIZE - 1 {
                    0xff00_0000
                } else {
                    0xffff_ffff
                };
                pixels.push(pixel);
            }
        }
        Self {
            width: SIZE,
            height: SIZE,
            hot_x: 0,
            hot_y: 0,
            pixels,
        }
    }
}

/// Cursor manager
#[derive(Debug)]
pub struct CursorManager {
    images: HashMap<CursorRef, CursorImage>,
    arrow: CursorImage,
    override_stack: Vec<CursorRef>,
    current: CursorRef,
    position: Point,
    visible: bool,
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorManager {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            arrow: CursorImage::arrow(),
            override_stack: Vec::new(),
            current: CursorRef::ARROW,
            position: Point::default(),
            visible: true,
        }
    }

    /// Store a client cursor; built-in ids cannot be redefined
    pub fn define(&mut self, owner: ClientId, id: u32, image: CursorImage) -> bool {
        if id == ARROW_CURSOR || id == BLANK_CURSOR {
            return false;
        }
        debug!(
            "Client {} defined cursor {} ({}x{})",
            owner, id, image.width, image.height
        );
        self.images.insert(CursorRef { owner, id }, image);
        true
    }

    /// Forget a client's cursors; returns whether the shown cursor changed
    pub fn drop_client(&mut self, owner: ClientId) -> bool {
        self.images.retain(|cursor, _| cursor.owner != owner);
        self.override_stack.retain(|cursor| cursor.owner != owner);
        if self.current.owner == owner {
            self.current = self.override_stack.last().copied().unwrap_or(CursorRef::ARROW);
            return true;
        }
        false
    }

    pub fn push_override(&mut self, cursor: CursorRef) {
        self.override_stack.push(cursor);
    }

    pub fn pop_override(&mut self) -> Option<CursorRef> {
        self.override_stack.pop()
    }

    /// Cursor to show given the window under the pointer
    pub fn resolve(&self, under_pointer: Option<CursorRef>) -> CursorRef {
        self.override_stack
            .last()
            .copied()
            .or(under_pointer)
            .unwrap_or(CursorRef::ARROW)
    }

    pub fn current(&self) -> CursorRef {
        self.current
    }

    /// Switch the shown cursor; returns the area to repaint if it changed
    pub fn set_current(&mut self, cursor: CursorRef) -> Option<Region> {
        if cursor == self.current {
            return None;
        }
        let old = self.rect();
        self.current = cursor;
        Some(Region::from_rect(old).union(&Region::from_rect(self.rect())))
    }

    pub fn position(&self) -> Point {
        self.position
    }

    /// Move the hotspot; returns the area to repaint
    pub fn move_to(&mut self, position: Point) -> Region {
        if position == self.position {
            return Region::new();
        }
        let old = self.rect();
        self.position = position;
        Region::from_rect(old).union(&Region::from_rect(self.rect()))
    }

    pub fn set_visible(&mut self, visible: bool) -> Region {
        if visible == self.visible {
            return Region::new();
        }
        self.visible = visible;
        let rect = self.bitmap_rect();
        Region::from_rect(rect)
    }

    pub fn image(&self, cursor: CursorRef) -> Option<&CursorImage> {
        match cursor.id {
            ARROW_CURSOR => Some(&self.arrow),
            BLANK_CURSOR => None,
            // Unknown ids fall back to the arrow
            _ => Some(self.images.get(&cursor).unwrap_or(&self.arrow)),
        }
    }

    /// Screen area covered by the shown cursor; empty when hidden
    pub fn rect(&self) -> Rect {
        if !self.visible {
            return Rect::default();
        }
        self.bitmap_rect()
    }

    fn bitmap_rect(&self) -> Rect {
        match self.image(self.current) {
            Some(image) => Rect::new(
                self.position.x - image.hot_x,
                self.position.y - image.hot_y,
                image.width as i32,
                image.height as i32,
            ),
            None => Rect::default(),
        }
    }

    /// Draw the cursor over `pixels`, touching only pixels inside `clip`
    pub fn draw(&self, pixels: &mut [u32], stride: u32, clip: &Region) {
        let Some(image) = self.image(self.current).filter(|_| self.visible) else {
            return;
        };
        let rect = self.rect();
        for area in clip.intersect_rect(rect).rects() {
            for y in area.y..area.bottom() {
                for x in area.x..area.right() {
                    let ix = (x - rect.x) as usize;
                    let iy = (y - rect.y) as usize;
                    let src = image.pixels[iy * image.width as usize + ix];
                    let dst = &mut pixels[y as usize * stride as usize + x as usize];
                    *dst = blend_pixel(src, *dst, (src >> 24) as u8);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(w: u32, h: u32) -> CursorImage {
        CursorImage {
            width: w,
            height: h,
            hot_x: 1,
            hot_y: 1,
            pixels: vec![0xffff0000; (w * h) as usize],
        }
    }

    #[test]
    fn override_stack_wins() {
        let mut cursors = CursorManager::new();
        let custom = CursorRef { owner: 3, id: 5 };
        cursors.define(3, 5, image(2, 2));
        assert_eq!(cursors.resolve(Some(custom)), custom);
        cursors.push_override(CursorRef::BLANK);
        assert_eq!(cursors.resolve(Some(custom)), CursorRef::BLANK);
        cursors.pop_override();
        assert_eq!(cursors.resolve(None), CursorRef::ARROW);
    }

    #[test]
    fn client_cursors_die_with_the_client() {
        let mut cursors = CursorManager::new();
        cursors.define(3, 5, image(2, 2));
        cursors.set_current(CursorRef { owner: 3, id: 5 });
        assert!(cursors.drop_client(3));
        assert_eq!(cursors.current(), CursorRef::ARROW);
        assert!(!cursors.define(3, ARROW_CURSOR, image(1, 1)));
    }

    #[test]
    fn moving_repaints_old_and_new() {
        let mut cursors = CursorManager::new();
        cursors.define(1, 9, image(4, 4));
        cursors.set_current(CursorRef { owner: 1, id: 9 });
        cursors.move_to(Point::new(10, 10));
        let damage = cursors.move_to(Point::new(20, 10));
        assert!(damage.contains(9, 9));
        assert!(damage.contains(19, 9));
        assert!(!damage.contains(15, 9));
        assert_eq!(cursors.rect(), Rect::new(19, 9, 4, 4));
    }

    #[test]
    fn draw_respects_clip() {
        let mut cursors = CursorManager::new();
        cursors.define(1, 9, image(2, 2));
        cursors.set_current(CursorRef { owner: 1, id: 9 });
        cursors.move_to(Point::new(1, 1));
        let mut pixels = vec![0u32; 16];
        cursors.draw(&mut pixels, 4, &Region::from_rect(Rect::new(0, 0, 1, 4)));
        assert_eq!(pixels[0], 0xffff0000);
        assert_eq!(pixels[1], 0);
        assert_eq!(pixels[4], 0xffff0000);
    }
}
