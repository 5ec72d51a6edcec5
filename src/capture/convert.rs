use crate::foundation::core::BYTES_PER_PIXEL;
use crate::foundation::error::{GpucapError, GpucapResult};

/// Copy padded BGRA rows into a tightly packed RGBA buffer.
///
/// Bytes 0 and 2 of every pixel are swapped; green and alpha pass through. Row padding past
/// `width * 4` is ignored.
pub fn bgra_rows_to_rgba(
    mapped: &[u8],
    width: u32,
    height: u32,
    stride: u32,
) -> GpucapResult<Vec<u8>> {
    let row_bytes = (width as usize) * (BYTES_PER_PIXEL as usize);
    let stride = stride as usize;
    let height = height as usize;
    if stride < row_bytes {
        return Err(GpucapError::validation(format!(
            "row stride {stride} is smaller than row size {row_bytes}"
        )));
    }
    let needed = match height {
        0 => 0,
        h => (h - 1) * stride + row_bytes,
    };
    if mapped.len() < needed {
        return Err(GpucapError::gpu(format!(
            "mapped range holds {} bytes, {needed} needed",
            mapped.len()
        )));
    }

    let mut out = vec![0u8; row_bytes * height];
    for (y, dst_row) in out.chunks_exact_mut(row_bytes.max(1)).enumerate() {
        let start = y * stride;
        let src_row = &mapped[start..start + row_bytes];
        for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = s[3];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_red_and_blue_only() {
        let src = [10u8, 20, 30, 255, 1, 2, 3, 4];
        let out = bgra_rows_to_rgba(&src, 2, 1, 8).unwrap();
        assert_eq!(out, vec![30, 20, 10, 255, 3, 2, 1, 4]);
    }

    #[test]
    fn skips_row_padding() {
        // 1x2 image with a 256-byte stride; padding is filled with garbage.
        let mut src = vec![0xCDu8; 256 + 4];
        src[0..4].copy_from_slice(&[1, 2, 3, 4]);
        src[256..260].copy_from_slice(&[5, 6, 7, 8]);
        let out = bgra_rows_to_rgba(&src, 1, 2, 256).unwrap();
        assert_eq!(out, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn rejects_short_mapped_range() {
        let src = vec![0u8; 256 + 3];
        assert!(bgra_rows_to_rgba(&src, 1, 2, 256).is_err());
    }

    #[test]
    fn rejects_stride_smaller_than_row() {
        assert!(bgra_rows_to_rgba(&[0u8; 64], 4, 1, 8).is_err());
    }
}
