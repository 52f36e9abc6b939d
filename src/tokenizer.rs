//! 面向调用方的分词器：保护文本中的保留词字面量，驱动逐词编码，
//! 以及把 id 序列还原为文本。

use crate::{alphabet, bpe, build_pattern, split_words, utok, Error, Vocab};
use regex::Regex;
use std::collections::HashMap;

pub struct Tokenizer {
    vocab: Vocab,
    special: HashMap<String, utok>,
    special_regex: Regex,
    bos: Option<utok>,
    eos: Option<utok>,
}

impl Tokenizer {
    /// 包装一个冻结的词表。
    ///
    /// 保留词沿用训练配置的顺序约定：第 1 个是 bos，第 2 个是 eos，
    /// 缺失时 `add_special` 不补相应端。
    pub fn new(vocab: Vocab) -> Self {
        let special = vocab
            .specials()
            .iter()
            .map(|s| (s.piece.clone(), s.id))
            .collect::<HashMap<_, _>>();
        let special_regex = build_pattern(special.keys());
        let bos = vocab.specials().get(1).map(|s| s.id);
        let eos = vocab.specials().get(2).map(|s| s.id);
        Self {
            vocab,
            special,
            special_regex,
            bos,
            eos,
        }
    }

    /// 文本 -> id 序列。
    ///
    /// 文本中出现的保留词字面量编码为其固定 id，不参与合并；
    /// `add_special` 为真时在两端补上 bos / eos。
    pub fn encode(&self, text: &str, add_special: bool) -> Vec<utok> {
        let mut ids = Vec::new();
        if add_special {
            ids.extend(self.bos);
        }
        let mut start = 0;
        if !self.special_regex.as_str().is_empty() {
            for m in self.special_regex.find_iter(text) {
                self.encode_plain(&text[start..m.start()], &mut ids);
                ids.push(self.special[m.as_str()]);
                start = m.end();
            }
        }
        self.encode_plain(&text[start..], &mut ids);
        if add_special {
            ids.extend(self.eos);
        }
        ids
    }

    fn encode_plain(&self, text: &str, ids: &mut Vec<utok>) {
        for word in split_words(text) {
            ids.extend(bpe::encode_word(&self.vocab, word));
        }
    }

    /// id 序列 -> 文本。
    ///
    /// `skip_special` 为真时丢弃保留词，否则保留词以其字面量原样出现。
    /// 重组出的字节序列必须是合法 utf-8，否则说明 id 已损坏。
    pub fn decode(&self, ids: &[utok], skip_special: bool) -> Result<String, Error> {
        let mut bytes = Vec::new();
        for &t in ids {
            let piece = self.vocab.piece(t).ok_or(Error::UnknownId(t))?;
            if self.vocab.is_special(t) {
                if !skip_special {
                    bytes.extend_from_slice(piece.as_bytes());
                }
            } else {
                // 构造词表时已校验普通词条只含字母表字符
                for c in piece.chars() {
                    bytes.push(alphabet::byte_of(c).unwrap());
                }
            }
        }
        Ok(String::from_utf8(bytes)?)
    }

    #[inline]
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab.size()
    }

    /// token: unk。
    #[inline]
    pub fn unk(&self) -> Option<utok> {
        self.vocab.specials().first().map(|s| s.id)
    }

    /// token: bos。
    #[inline]
    pub fn bos(&self) -> Option<utok> {
        self.bos
    }

    /// token: eos。
    #[inline]
    pub fn eos(&self) -> Option<utok> {
        self.eos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Trainer, TrainerConfig};

    fn trained() -> Tokenizer {
        let config = TrainerConfig {
            vocab_size: 300,
            min_frequency: 2,
            special_tokens: vec!["<unk>".into(), "<s>".into(), "</s>".into()],
            log_interval: 0,
        };
        let vocab = Trainer::new(config)
            .unwrap()
            .train(["hello world hello world hello", "world says hello"])
            .unwrap();
        Tokenizer::new(vocab)
    }

    #[test]
    fn encode_decode_round_trip() {
        let tokenizer = trained();
        for text in [
            "hello world",
            " hello  world ",
            "héllo 世界 🌍",
            "tabs\tand\nnewlines",
            "",
        ] {
            let ids = tokenizer.encode(text, false);
            assert_eq!(tokenizer.decode(&ids, false).unwrap(), text);
        }
    }

    #[test]
    fn specials_added_then_stripped() {
        let tokenizer = trained();
        let text = "hello world";
        let ids = tokenizer.encode(text, true);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&2));
        assert_eq!(tokenizer.decode(&ids, true).unwrap(), text);
    }

    #[test]
    fn special_literals_map_to_their_ids() {
        let tokenizer = trained();
        let ids = tokenizer.encode("<s>hello</s>", false);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&2));
        // 字面量保留时原样还原
        assert_eq!(tokenizer.decode(&ids, false).unwrap(), "<s>hello</s>");
        assert_eq!(tokenizer.decode(&ids, true).unwrap(), "hello");
    }

    #[test]
    fn unknown_id_is_an_error() {
        let tokenizer = trained();
        let bad = tokenizer.vocab_size() as crate::utok;
        assert!(matches!(
            tokenizer.decode(&[bad], false),
            Err(Error::UnknownId(t)) if t == bad,
        ));
    }

    #[test]
    fn corrupted_ids_fail_utf8_check() {
        let tokenizer = trained();
        // 孤立的 utf-8 续字节
        let ids = [tokenizer.vocab().symbol(0xE4)];
        assert!(matches!(
            tokenizer.decode(&ids, false),
            Err(Error::InvalidUtf8(_)),
        ));
    }

    #[test]
    fn special_accessors_follow_convention() {
        let tokenizer = trained();
        assert_eq!(tokenizer.unk(), Some(0));
        assert_eq!(tokenizer.bos(), Some(1));
        assert_eq!(tokenizer.eos(), Some(2));
    }

    #[test]
    fn shared_across_threads() {
        let tokenizer = trained();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let ids = tokenizer.encode("hello world", false);
                    assert_eq!(tokenizer.decode(&ids, false).unwrap(), "hello world");
                });
            }
        });
    }
}
