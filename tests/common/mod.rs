//! Synthetic handwriting: built-in glyph art drawn at integer scale.
#![allow(dead_code)]

use handtex::pipeline::templates::builtin_art;
use handtex::Symbol;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

pub fn blank(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255]))
}

pub fn draw_glyph(img: &mut GrayImage, name: &str, x0: u32, y0: u32, scale: u32) {
    let symbol = Symbol::from_name(name).unwrap();
    let art = builtin_art(symbol).unwrap();
    for (ry, row) in art.iter().enumerate() {
        for (rx, c) in row.chars().enumerate() {
            if c != '#' {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    img.put_pixel(
                        x0 + rx as u32 * scale + dx,
                        y0 + ry as u32 * scale + dy,
                        Luma([0]),
                    );
                }
            }
        }
    }
}

pub fn bar(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            img.put_pixel(x, y, Luma([0]));
        }
    }
}

/// `a` above a fraction bar above `b`.
pub fn a_over_b() -> GrayImage {
    let mut img = blank(60, 70);
    draw_glyph(&mut img, "a", 20, 10, 3);
    bar(&mut img, 12, 31, 30, 3);
    draw_glyph(&mut img, "b", 20, 40, 3);
    img
}

/// Two formulas far apart: `x` near the top, `2` near the bottom.
pub fn two_formulas() -> GrayImage {
    let mut img = blank(100, 140);
    draw_glyph(&mut img, "x", 10, 10, 3);
    draw_glyph(&mut img, "2", 10, 100, 3);
    img
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}
