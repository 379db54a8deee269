//! 内容校验和
//!
//! 快照制品的更新检测基于 CRC32 校验和。

use crc32fast::Hasher;

/// 计算字节内容的校验和
pub fn checksum(content: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_stable() {
        assert_eq!(checksum(b"module-content"), checksum(b"module-content"));
    }

    #[test]
    fn test_single_byte_change_detected() {
        assert_ne!(checksum(b"module-content-1"), checksum(b"module-content-2"));
    }
}
