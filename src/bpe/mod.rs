//! 对单个预分词单元应用已学得合并规则的贪心编码器。

mod algorithm;

use crate::{alphabet, utok, Vocab};
use algorithm::MergeState;

/// 词 -> token id 序列。
///
/// 词的每个字节映射为符号后，反复应用当前相邻对中 rank 最小的规则，
/// 直到没有规则可用。字节级字母表保证任何输入都可表示，此处不会产生
/// unk。
pub(crate) fn encode_word<'v>(vocab: &'v Vocab, word: &str) -> impl Iterator<Item = utok> + 'v {
    let symbols = alphabet::encode(word.as_bytes());
    let mut state = MergeState::new(vocab, &symbols);
    while state.merge() {}
    state.into_iter()
}

#[cfg(test)]
mod tests {
    use super::encode_word;
    use crate::vocab::tests::build;

    #[test]
    fn lowest_rank_applies_first() {
        let vocab = build(&[], &[("h", "e"), ("l", "l"), ("he", "ll")]);
        let ids: Vec<_> = encode_word(&vocab, "hello").collect();
        let pieces: Vec<_> = ids.iter().map(|&t| vocab.piece(t).unwrap()).collect();
        assert_eq!(pieces, ["hell", "o"]);
    }

    #[test]
    fn word_without_rules_stays_symbols() {
        let vocab = build(&[], &[]);
        let ids: Vec<_> = encode_word(&vocab, "hi").collect();
        assert_eq!(ids.len(), 2);
        // 多字节字符拆成逐字节符号
        let ids: Vec<_> = encode_word(&vocab, "好").collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn leading_space_merges_like_any_symbol() {
        // 空格字节的符号是 U+0120
        let vocab = build(&[], &[("\u{120}", "a")]);
        let ids: Vec<_> = encode_word(&vocab, " a").collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(vocab.piece(ids[0]), Some("\u{120}a"));
    }

    #[test]
    fn merge_order_not_scan_order() {
        // (b, c) 的 rank 低于 (a, b)，即使 (a, b) 在词中更靠左也后应用
        let vocab = build(&[], &[("b", "c"), ("a", "bc")]);
        let ids: Vec<_> = encode_word(&vocab, "abc").collect();
        let pieces: Vec<_> = ids.iter().map(|&t| vocab.piece(t).unwrap()).collect();
        assert_eq!(pieces, ["abc"]);
    }
}
