/// 计算两个 N 位编码的汉明距离
///
/// N 为位数，va 和 vb 的长度必须至少为 N / 8 字节
#[inline(always)]
pub fn hamming<const N: usize>(va: &[u8], vb: &[u8]) -> u32 {
    match N {
        64 => hamming_64(va, vb),
        _ => hamming_naive::<N>(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive<const N: usize>(va: &[u8], vb: &[u8]) -> u32 {
    let mut sum = 0;
    for i in 0..N / 8 {
        sum += (va[i] ^ vb[i]).count_ones();
    }
    sum
}

#[inline(always)]
pub fn hamming_64(va: &[u8], vb: &[u8]) -> u32 {
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&va[..8]);
    b.copy_from_slice(&vb[..8]);
    (u64::from_le_bytes(a) ^ u64::from_le_bytes(b)).count_ones()
}

/// 在一组 N 位编码中线性查找距离不超过 max_distance 的所有编码，返回 (下标, 距离)
///
/// 主要用于验证 BK 树的查询结果，以及作为性能对比的基准
pub fn range_hamming<const N: usize>(va: &[u8], vb: &[u8], max_distance: u32) -> Vec<(usize, u32)> {
    vb.chunks_exact(N / 8)
        .enumerate()
        .filter_map(|(i, chunk)| {
            let d = hamming::<N>(va, chunk);
            (d <= max_distance).then_some((i, d))
        })
        .collect()
}
