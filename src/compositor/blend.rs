//! Pixel blending for ARGB32

/// Blend one 8-bit channel: `(s·a + d·(255 − a)) / 255`, rounded.
///
/// `a == 255` yields `s` and `a == 0` yields `d` exactly.
#[inline]
pub fn blend_channel(src: u32, dst: u32, alpha: u32) -> u32 {
    (src * alpha + dst * (255 - alpha) + 127) / 255
}

/// Blend `src` over `dst` with a constant alpha, channel by channel
#[inline]
pub fn blend_pixel(src: u32, dst: u32, alpha: u8) -> u32 {
    match alpha {
        255 => src,
        0 => dst,
        _ => {
            let a = alpha as u32;
            (0..4).fold(0, |out, channel| {
                let shift = channel * 8;
                let s = (src >> shift) & 0xff;
                let d = (dst >> shift) & 0xff;
                out | (blend_channel(s, d, a) << shift)
            })
        }
    }
}

/// Effective alpha of a window pixel.
///
/// Opaque windows use their opacity alone; others also weigh in the
/// pixel's own alpha channel.
#[inline]
pub fn pixel_alpha(pixel: u32, opacity: u8, per_pixel: bool) -> u8 {
    if !per_pixel {
        return opacity;
    }
    let pa = pixel >> 24;
    ((pa * opacity as u32 + 127) / 255) as u8
}
