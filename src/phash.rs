use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hamming::hamming;

/// 64 位感知哈希
///
/// 字节按行存放，每个字节的最高位对应该行最左侧的像素。
/// 对外统一使用 16 位小写十六进制字符串表示，可以直接作为数据库的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PHash(pub [u8; 8]);

impl PHash {
    /// 两个哈希之间的汉明距离
    pub fn distance(&self, other: &PHash) -> u32 {
        hamming::<64>(&self.0, &other.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut buf = [0u8; 8];
        hex::decode_to_slice(s, &mut buf)
            .map_err(|e| Error::HashComputation(format!("无效的哈希字符串 {s:?}: {e}")))?;
        Ok(Self(buf))
    }
}

impl From<u64> for PHash {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

/// 感知哈希算法
///
/// 实现必须是纯函数：相同的图片内容总是得到相同的哈希
pub trait PerceptualHasher: Send + Sync {
    /// 算法名称，记录在数据库中，不同算法得到的哈希不能混用
    fn name(&self) -> &str;

    /// 对已解码的图片计算哈希
    fn hash_image(&self, image: &DynamicImage) -> Result<PHash>;

    /// 解码图片数据并计算哈希
    fn compute_hash(&self, data: &[u8]) -> Result<PHash> {
        let image = image::load_from_memory(data)?;
        self.hash_image(&image)
    }
}

/// 缩放到指定尺寸的灰度图，返回按行排列的像素
fn grayscale_pixels(image: &DynamicImage, width: u32, height: u32) -> Result<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::HashComputation("图片尺寸为 0".to_owned()));
    }
    let small = image.resize_exact(width, height, FilterType::Triangle).into_luma8();
    let data = small.into_raw();
    if data.len() != (width * height) as usize {
        return Err(Error::HashComputation(format!("缩放后的像素数量异常: {}", data.len())));
    }
    Ok(data)
}

/// 差异哈希：缩放到 9x8，比较每行相邻像素
#[derive(Debug, Clone, Copy, Default)]
pub struct DHasher;

impl PerceptualHasher for DHasher {
    fn name(&self) -> &str {
        "dhash"
    }

    fn hash_image(&self, image: &DynamicImage) -> Result<PHash> {
        let data = grayscale_pixels(image, 9, 8)?;

        let mut hash = [0; 8];
        for (i, chunk) in data.chunks_exact(9).enumerate() {
            let mut b = 0;
            for j in 0..8 {
                b <<= 1;
                b |= if chunk[j] < chunk[j + 1] { 1 } else { 0 };
            }
            hash[i] = b;
        }

        Ok(PHash(hash))
    }
}

/// 均值哈希：缩放到 8x8，与平均亮度比较
#[derive(Debug, Clone, Copy, Default)]
pub struct AHasher;

impl PerceptualHasher for AHasher {
    fn name(&self) -> &str {
        "ahash"
    }

    fn hash_image(&self, image: &DynamicImage) -> Result<PHash> {
        let data = grayscale_pixels(image, 8, 8)?;
        let mean = data.iter().map(|&v| v as u32).sum::<u32>() / 64;

        let mut hash = [0; 8];
        for (i, chunk) in data.chunks_exact(8).enumerate() {
            let mut b = 0;
            for &v in chunk {
                b <<= 1;
                b |= if v as u32 > mean { 1 } else { 0 };
            }
            hash[i] = b;
        }

        Ok(PHash(hash))
    }
}

/// 可选的哈希算法
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// 差异哈希
    #[default]
    #[value(name = "dhash")]
    DHash,
    /// 均值哈希
    #[value(name = "ahash")]
    AHash,
}

impl HashAlgorithm {
    /// 根据数据库中记录的名称查找算法
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::DHash, Self::AHash].into_iter().find(|alg| alg.name() == name)
    }
}

impl PerceptualHasher for HashAlgorithm {
    fn name(&self) -> &str {
        match self {
            Self::DHash => "dhash",
            Self::AHash => "ahash",
        }
    }

    fn hash_image(&self, image: &DynamicImage) -> Result<PHash> {
        match self {
            Self::DHash => DHasher.hash_image(image),
            Self::AHash => AHasher.hash_image(image),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn gradient(width: u32, height: u32, rising: bool) -> DynamicImage {
        let img = GrayImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            Luma([if rising { v } else { 255 - v }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = PHash([0xab, 0xcd, 0, 1, 2, 3, 4, 0xff]);
        assert_eq!(hash.to_hex(), "abcd0001020304ff");
        assert_eq!("abcd0001020304ff".parse::<PHash>().unwrap(), hash);
    }

    #[test]
    fn test_parse_invalid_hex() {
        assert!(matches!("xyz".parse::<PHash>(), Err(Error::HashComputation(_))));
        assert!("abcd".parse::<PHash>().is_err());
    }

    #[test]
    fn test_distance() {
        let a = PHash::from(0u64);
        let b = PHash::from(0b1011u64);
        assert_eq!(a.distance(&b), 3);
        assert_eq!(b.distance(&a), 3);
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn test_dhash_gradient() {
        // 从左到右变亮，每一位都是 1
        let hash = DHasher.hash_image(&gradient(90, 80, true)).unwrap();
        assert_eq!(hash, PHash([0xff; 8]));
        let hash = DHasher.hash_image(&gradient(90, 80, false)).unwrap();
        assert_eq!(hash, PHash([0; 8]));
    }

    #[test]
    fn test_hash_is_scale_invariant() {
        let a = DHasher.hash_image(&gradient(900, 800, true)).unwrap();
        let b = DHasher.hash_image(&gradient(90, 80, true)).unwrap();
        assert!(a.distance(&b) <= 2);
    }

    #[test]
    fn test_ahash_half_split() {
        let img = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 0 } else { 255 }]));
        let hash = AHasher.hash_image(&DynamicImage::ImageLuma8(img)).unwrap();
        assert_eq!(hash, PHash([0x0f; 8]));
    }

    #[test]
    fn test_algorithm_names() {
        for alg in [HashAlgorithm::DHash, HashAlgorithm::AHash] {
            assert_eq!(HashAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(HashAlgorithm::DHash.name(), DHasher.name());
        assert_eq!(HashAlgorithm::AHash.name(), AHasher.name());
        assert_eq!(HashAlgorithm::from_name("phash"), None);
    }

    #[test]
    fn test_compute_hash_rejects_garbage() {
        let err = HashAlgorithm::DHash.compute_hash(b"not an image").unwrap_err();
        assert!(matches!(err, Error::HashComputation(_)));
    }
}
