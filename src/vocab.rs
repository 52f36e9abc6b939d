//! 词表：token 字符串与稠密 id 的双向映射、有序合并规则与保留词。
//!
//! 词表在训练结束后冻结，此后只读，可在任意多个并发编解码调用间共享。
//! 持久化为两个工件：id 顺序的 token 表（JSON）与按学习顺序的合并规则
//! 列表（每行一条 `left right`），加载时联合校验。

use crate::{alphabet, utok, Error};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

/// 一条合并规则，在规则列表中的下标即 rank，rank 越小越先应用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRule {
    pub left: String,
    pub right: String,
}

/// 保留词：固定 id，不参与合并学习，编码时永不拆分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialToken {
    pub piece: String,
    pub id: utok,
}

/// 冻结的词表。
pub struct Vocab {
    /// 所有词条内容的压缩存储，短词条尽量复用长词条的子串
    pieces: Box<[u8]>,
    /// 按 id 顺序的 (偏移, 长度)
    slices: Box<[(u32, u32)]>,
    /// 按词条字典序排序的 id，用于从词条二分查找 id
    sorted: Box<[utok]>,
    /// 单符号词条的 id，按字节值索引
    symbols: Box<[utok; 256]>,
    /// 合并规则，按学习顺序
    merges: Box<[MergeRule]>,
    /// (left, right) -> (rank, merged)
    ranks: HashMap<(utok, utok), (u32, utok)>,
    /// 保留词，按配置顺序
    specials: Box<[SpecialToken]>,
}

impl Vocab {
    /// 由 id 顺序的词条、合并规则与保留词构造词表。
    ///
    /// 无论词条来自训练还是来自磁盘都走同一套校验：词条互异、保留词
    /// 占据声明的 id、字母表 256 个单符号词条齐备、普通词条不含字母表
    /// 之外的字符、每条合并规则的三个词条都在表中。
    pub fn new(
        pieces: Vec<String>,
        merges: Vec<MergeRule>,
        specials: Vec<SpecialToken>,
    ) -> Result<Self, Error> {
        let mut ids = HashMap::with_capacity(pieces.len());
        for (i, p) in pieces.iter().enumerate() {
            if ids.insert(p.as_str(), i as utok).is_some() {
                return Err(Error::Format(format!("duplicate piece {p:?}")));
            }
        }

        let mut special_pieces = HashSet::with_capacity(specials.len());
        for s in &specials {
            if !special_pieces.insert(s.piece.as_str()) {
                return Err(Error::Format(format!("duplicate special token {:?}", s.piece)));
            }
            match pieces.get(s.id as usize) {
                Some(p) if *p == s.piece => {}
                _ => {
                    return Err(Error::Format(format!(
                        "special token {:?} does not occupy id {}",
                        s.piece, s.id,
                    )))
                }
            }
        }

        let mut symbols = Box::new([0 as utok; 256]);
        let mut buf = [0u8; 4];
        for b in 0..=255u8 {
            let key: &str = alphabet::char_of(b).encode_utf8(&mut buf);
            match ids.get(key) {
                Some(&t) => symbols[b as usize] = t,
                None => {
                    return Err(Error::Format(format!(
                        "alphabet symbol for byte {b:#04x} missing from table"
                    )))
                }
            }
        }

        for p in &pieces {
            if special_pieces.contains(p.as_str()) {
                continue;
            }
            if let Some(c) = p.chars().find(|&c| alphabet::byte_of(c).is_none()) {
                return Err(Error::Format(format!(
                    "piece {p:?} contains char {c:?} outside the byte alphabet"
                )));
            }
        }

        let mut ranks = HashMap::with_capacity(merges.len());
        for (rank, rule) in merges.iter().enumerate() {
            let id_of = |piece: &str| {
                ids.get(piece).copied().ok_or_else(|| {
                    Error::Format(format!("merge rule references unknown piece {piece:?}"))
                })
            };
            let l = id_of(&rule.left)?;
            let r = id_of(&rule.right)?;
            let merged = id_of(&format!("{}{}", rule.left, rule.right))?;
            if ranks.insert((l, r), (rank as u32, merged)).is_some() {
                return Err(Error::Format(format!(
                    "duplicate merge rule {:?} {:?}",
                    rule.left, rule.right,
                )));
            }
        }

        // 词条内容按长度从长到短写入同一缓存，短词条可能是长词条的子串，
        // 查找命中即复用存储
        let mut slices = vec![(0u32, 0u32); pieces.len()];
        let mut text_buf = Vec::<u8>::with_capacity(pieces.iter().map(|p| p.len()).sum());
        let mut indices = (0..pieces.len()).collect::<Vec<_>>();
        indices.sort_unstable_by_key(|&i| std::cmp::Reverse(pieces[i].len()));
        for i in indices {
            let p = pieces[i].as_bytes();
            let off = memchr::memmem::find(&text_buf, p).unwrap_or_else(|| {
                let off = text_buf.len();
                text_buf.extend_from_slice(p);
                off
            });
            slices[i] = (off as u32, p.len() as u32);
        }

        let mut sorted = (0..pieces.len() as utok).collect::<Box<[_]>>();
        sorted.sort_unstable_by_key(|&i| {
            let (off, len) = slices[i as usize];
            &text_buf[off as usize..][..len as usize]
        });

        Ok(Self {
            pieces: text_buf.into_boxed_slice(),
            slices: slices.into_boxed_slice(),
            sorted,
            symbols,
            merges: merges.into_boxed_slice(),
            ranks,
            specials: specials.into_boxed_slice(),
        })
    }

    /// 词表规模。
    #[inline]
    pub fn size(&self) -> usize {
        self.slices.len()
    }

    /// token id -> 词条内容。
    #[inline]
    pub fn piece(&self, t: utok) -> Option<&str> {
        self.slices.get(t as usize).map(|&(off, len)| {
            // 每个 slice 都精确对应一个完整词条的字节序列
            unsafe { std::str::from_utf8_unchecked(&self.pieces[off as usize..][..len as usize]) }
        })
    }

    /// 词条内容 -> token id。
    pub fn token(&self, piece: &str) -> Option<utok> {
        self.sorted
            .binary_search_by_key(&piece.as_bytes(), |&i| self.piece_bytes(i))
            .ok()
            .map(|i| self.sorted[i])
    }

    #[inline]
    pub(crate) fn piece_bytes(&self, t: utok) -> &[u8] {
        let (off, len) = self.slices[t as usize];
        &self.pieces[off as usize..][..len as usize]
    }

    #[inline]
    pub(crate) fn piece_len(&self, t: utok) -> usize {
        self.slices[t as usize].1 as usize
    }

    /// 字节值对应的单符号词条 id。
    #[inline]
    pub(crate) fn symbol(&self, byte: u8) -> utok {
        self.symbols[byte as usize]
    }

    /// 相邻词条对的合并优先级与合并结果。
    #[inline]
    pub(crate) fn rank(&self, pair: (utok, utok)) -> Option<(u32, utok)> {
        self.ranks.get(&pair).copied()
    }

    /// 合并规则，按学习顺序。
    #[inline]
    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// 保留词，按配置顺序。
    #[inline]
    pub fn specials(&self) -> &[SpecialToken] {
        &self.specials
    }

    pub fn is_special(&self, t: utok) -> bool {
        self.specials.iter().any(|s| s.id == t)
    }

    /// token 表工件：id 顺序的 token -> id 映射与保留词元数据。
    pub fn to_json(&self) -> String {
        let file = VocabFile {
            tokens: (0..self.size() as utok)
                .map(|t| TokenEntry {
                    piece: self.piece(t).unwrap().into(),
                    id: t,
                })
                .collect(),
            special_tokens: self.specials.to_vec(),
        };
        serde_json::to_string_pretty(&file).unwrap()
    }

    /// 合并规则工件：按学习顺序每行一条 `left right`。
    /// 词条是符号串，空格字节已映射为 U+0120，因此空格可以安全作分隔符。
    pub fn merges_text(&self) -> String {
        let mut out = String::new();
        for rule in &*self.merges {
            out.push_str(&rule.left);
            out.push(' ');
            out.push_str(&rule.right);
            out.push('\n');
        }
        out
    }

    /// 从两个工件的内容重建词表，id 必须从 0 稠密分配且互不重复。
    pub fn from_artifacts(vocab_json: &str, merges_text: &str) -> Result<Self, Error> {
        let file: VocabFile =
            serde_json::from_str(vocab_json).map_err(|e| Error::Format(e.to_string()))?;

        let mut pieces = vec![None::<String>; file.tokens.len()];
        for entry in file.tokens {
            match pieces.get_mut(entry.id as usize) {
                Some(slot) if slot.is_none() => *slot = Some(entry.piece),
                Some(_) => {
                    return Err(Error::Format(format!("duplicate token id {}", entry.id)))
                }
                None => {
                    return Err(Error::Format(format!(
                        "token id {} out of range, ids must be dense from 0",
                        entry.id,
                    )))
                }
            }
        }
        let pieces = pieces
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Format("token ids are not contiguous".into()))?;

        let merges = merges_text
            .lines()
            .map(|line| {
                line.split_once(' ')
                    .map(|(l, r)| MergeRule {
                        left: l.into(),
                        right: r.into(),
                    })
                    .ok_or_else(|| Error::Format(format!("malformed merge line {line:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(pieces, merges, file.special_tokens)
    }

    /// 把两个工件写入磁盘。
    pub fn save(
        &self,
        vocab_path: impl AsRef<Path>,
        merges_path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        std::fs::write(vocab_path, self.to_json())?;
        std::fs::write(merges_path, self.merges_text())?;
        Ok(())
    }

    /// 从磁盘读取两个工件并重建词表。
    pub fn load(
        vocab_path: impl AsRef<Path>,
        merges_path: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        let vocab = std::fs::read_to_string(vocab_path)?;
        let merges = std::fs::read_to_string(merges_path)?;
        Self::from_artifacts(&vocab, &merges)
    }
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    tokens: Vec<TokenEntry>,
    special_tokens: Vec<SpecialToken>,
}

#[derive(Serialize, Deserialize)]
struct TokenEntry {
    piece: String,
    id: utok,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alphabet;

    /// 保留词在前、字母表随后、合并词条按 rank 追加的测试词表。
    pub(crate) fn build(specials: &[&str], merges: &[(&str, &str)]) -> Vocab {
        let mut pieces: Vec<String> = specials.iter().map(|s| s.to_string()).collect();
        pieces.extend((0..=255u8).map(|b| alphabet::char_of(b).to_string()));
        let mut rules = Vec::new();
        for &(l, r) in merges {
            pieces.push(format!("{l}{r}"));
            rules.push(MergeRule {
                left: l.into(),
                right: r.into(),
            });
        }
        let specials = specials
            .iter()
            .enumerate()
            .map(|(i, s)| SpecialToken {
                piece: s.to_string(),
                id: i as utok,
            })
            .collect();
        Vocab::new(pieces, rules, specials).unwrap()
    }

    #[test]
    fn lookups_are_inverse() {
        let vocab = build(&["<unk>", "<s>", "</s>"], &[("h", "e"), ("he", "l")]);
        assert_eq!(vocab.size(), 3 + 256 + 2);
        for t in 0..vocab.size() as utok {
            let piece = vocab.piece(t).unwrap();
            assert_eq!(vocab.token(piece), Some(t));
        }
        assert_eq!(vocab.piece(vocab.size() as utok), None);
        // "hell" 不在表内："he" 与 "hel" 才是合并产生的词条
        assert_eq!(vocab.token("hell"), None);
        assert_eq!(vocab.token(""), None);
    }

    #[test]
    fn symbols_index_the_alphabet() {
        let vocab = build(&["<unk>"], &[]);
        for b in 0..=255u8 {
            let t = vocab.symbol(b);
            assert_eq!(vocab.piece(t).unwrap(), alphabet::char_of(b).to_string());
        }
    }

    #[test]
    fn ranks_follow_merge_order() {
        let vocab = build(&[], &[("h", "e"), ("l", "l"), ("he", "ll")]);
        let h = vocab.token("h").unwrap();
        let e = vocab.token("e").unwrap();
        let he = vocab.token("he").unwrap();
        let ll = vocab.token("ll").unwrap();
        assert_eq!(vocab.rank((h, e)), Some((0, he)));
        assert_eq!(vocab.rank((he, ll)), Some((2, vocab.token("hell").unwrap())));
        assert_eq!(vocab.rank((e, h)), None);
    }

    #[test]
    fn artifacts_round_trip() {
        let vocab = build(&["<unk>", "<s>", "</s>"], &[("a", "b"), ("ab", "c")]);
        let json = vocab.to_json();
        let merges = vocab.merges_text();
        let reloaded = Vocab::from_artifacts(&json, &merges).unwrap();
        assert_eq!(reloaded.to_json(), json);
        assert_eq!(reloaded.merges_text(), merges);
        assert_eq!(reloaded.specials(), vocab.specials());
    }

    #[test]
    fn save_load_round_trip() {
        let vocab = build(&["<unk>", "<s>", "</s>"], &[("x", "y")]);
        let dir = tempfile::tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.json");
        let merges_path = dir.path().join("merges.txt");
        vocab.save(&vocab_path, &merges_path).unwrap();
        let reloaded = Vocab::load(&vocab_path, &merges_path).unwrap();
        assert_eq!(reloaded.to_json(), vocab.to_json());
        assert_eq!(reloaded.merges_text(), vocab.merges_text());
    }

    #[test]
    fn load_rejects_inconsistent_artifacts() {
        let vocab = build(&["<unk>"], &[("a", "b")]);
        let json = vocab.to_json();

        // 合并规则引用表外词条
        assert!(matches!(
            Vocab::from_artifacts(&json, "a c\n"),
            Err(Error::Format(_)),
        ));
        // 格式错误的合并行
        assert!(matches!(
            Vocab::from_artifacts(&json, "ab\n"),
            Err(Error::Format(_)),
        ));
        // id 重复
        let dup = json.replacen("\"id\": 1", "\"id\": 2", 1);
        assert!(matches!(
            Vocab::from_artifacts(&dup, ""),
            Err(Error::Format(_)),
        ));
        // 字母表不完整
        assert!(matches!(
            Vocab::from_artifacts(
                r#"{ "tokens": [ { "piece": "a", "id": 0 } ], "special_tokens": [] }"#,
                "",
            ),
            Err(Error::Format(_)),
        ));
    }

    #[test]
    fn duplicate_pieces_rejected() {
        let mut pieces: Vec<String> = (0..=255u8).map(|b| alphabet::char_of(b).to_string()).collect();
        pieces.push("a".into());
        assert!(matches!(
            Vocab::new(pieces, vec![], vec![]),
            Err(Error::Format(_)),
        ));
    }
}
