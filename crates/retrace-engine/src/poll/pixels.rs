use crate::device::types::{PixelFormat, PixelType};

/// Tightly packed pixels, bottom row first.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub ty: PixelType,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Bytes per pixel.
    pub fn pixel_size(&self) -> usize {
        self.format.channels() * self.ty.size()
    }

    /// `width * height * channels * element size`.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_size()
    }

    /// One pixel's bytes.
    ///
    /// # Panics
    ///
    /// If `(x, y)` lies outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        let size = self.pixel_size();
        let at = (y as usize * self.width as usize + x as usize) * size;
        &self.data[at..at + size]
    }

    /// Rows in top-down order, as image encoders expect them.
    pub fn rows_top_down(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let row = self.width as usize * self.pixel_size();
        self.data.chunks_exact(row.max(1)).rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> PixelBuffer {
        PixelBuffer {
            width: 2,
            height: 2,
            format: PixelFormat::Red,
            ty: PixelType::Uint8,
            data: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn pixel_addresses_bottom_up_rows() {
        let px = two_by_two();
        assert_eq!(px.pixel(1, 0), &[2]);
        assert_eq!(px.pixel(0, 1), &[3]);
        assert_eq!(px.expected_len(), px.data.len());
    }

    #[test]
    fn top_down_rows_reverse_order() {
        let px = two_by_two();
        let rows: Vec<_> = px.rows_top_down().collect();
        assert_eq!(rows, vec![&[3u8, 4][..], &[1, 2][..]]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn pixel_out_of_bounds_panics() {
        two_by_two().pixel(2, 0);
    }
}
