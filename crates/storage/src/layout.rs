//! Row-major block copies between an n-dimensional buffer and a sub-block.

/// Row-major strides for `shape`.
pub fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Visit the flat offset (in the outer buffer) of every cell of the block,
/// in row-major block order.
fn for_each_offset(outer_shape: &[u64], start: &[u64], block: &[u64], mut f: impl FnMut(usize)) {
    if block.iter().any(|&n| n == 0) {
        return;
    }
    let strides = strides(outer_shape);
    let mut index = vec![0u64; block.len()];
    loop {
        let offset: u64 = index
            .iter()
            .zip(start)
            .zip(&strides)
            .map(|((i, s), st)| (i + s) * st)
            .sum();
        f(offset as usize);

        // Odometer increment, last axis fastest.
        let mut axis = block.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < block[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

/// Copy the block at `start` with extent `block` out of `src` (shaped `src_shape`).
pub fn gather<T: Copy>(src: &[T], src_shape: &[u64], start: &[u64], block: &[u64]) -> Vec<T> {
    let mut out = Vec::with_capacity(block.iter().product::<u64>() as usize);
    for_each_offset(src_shape, start, block, |offset| out.push(src[offset]));
    out
}

/// Copy `values` (shaped `block`) into `dst` (shaped `dst_shape`) at `start`.
pub fn scatter<T: Copy>(dst: &mut [T], dst_shape: &[u64], start: &[u64], block: &[u64], values: &[T]) {
    let mut next = values.iter();
    for_each_offset(dst_shape, start, block, |offset| {
        if let Some(v) = next.next() {
            dst[offset] = *v;
        }
    });
}
