//! 字节字母表：0..=255 的每个字节与一个可打印 Unicode 字符一一对应。
//!
//! 可打印区间内的字节映射为其自身，其余字节按字节值升序映射到 U+0100 起的
//! 空闲码位。映射在进程启动时固定，所有实现一致，保证序列化词表可移植。
//! 定义域封闭，没有失败路径。

use std::{collections::HashMap, sync::LazyLock};

static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut table = ['\0'; 256];
    let mut next = 0x100;
    for b in 0..=255u8 {
        table[b as usize] = if printable(b) {
            b as char
        } else {
            let c = char::from_u32(next).unwrap();
            next += 1;
            c
        };
    }
    table
});

static CHAR_TO_BYTE: LazyLock<HashMap<char, u8>> = LazyLock::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(b, &c)| (c, b as u8))
        .collect()
});

/// 可直接显示的 ascii 与 latin-1 码位，排除控制字符、空格和软连字符 U+00AD。
const fn printable(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

/// 字节对应的符号。
#[inline]
pub fn char_of(byte: u8) -> char {
    BYTE_TO_CHAR[byte as usize]
}

/// 符号对应的字节；不属于字母表的字符返回 `None`。
#[inline]
pub fn byte_of(c: char) -> Option<u8> {
    CHAR_TO_BYTE.get(&c).copied()
}

/// 把原始字节序列映射为符号串。
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char_of(b)).collect()
}

/// 把符号串还原为原始字节序列；包含字母表之外的字符时返回 `None`。
pub fn decode(symbols: &str) -> Option<Vec<u8>> {
    symbols.chars().map(byte_of).collect()
}
