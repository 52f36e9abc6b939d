//! BPE 训练：统计相邻符号对的加权频次，迭代合并最高频对，直到达到
//! 目标词表规模或没有对达到最低频次。
//!
//! 外层循环每一步都依赖上一步改写后的词区，只能顺序执行；一步之内的
//! 频次统计与词改写按词独立，用 rayon 并行。对同一语料和配置，逐次
//! 运行产出逐字节相同的词表。

use crate::{
    alphabet, build_pattern, split_words, utok, Error, MergeRule, SpecialToken, Vocab,
};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// 训练配置。由外围的 CLI / 配置装载器提供。
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// 目标词表规模，含保留词与 256 个字母表符号
    pub vocab_size: usize,
    /// 候选对参与合并的最低频次
    pub min_frequency: u64,
    /// 保留词，排列顺序即固定 id：第 0 个为 unk，第 1 个为 bos，第 2 个为 eos
    pub special_tokens: Vec<String>,
    /// 每学得这么多条规则输出一次进度，0 表示不输出
    pub log_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 6400,
            min_frequency: 2,
            special_tokens: vec!["<unk>".into(), "<s>".into(), "</s>".into()],
            log_interval: 1000,
        }
    }
}

/// 语料中的一个词：当前 token 序列与出现次数。
struct Word {
    tokens: Vec<utok>,
    count: u64,
}

pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    /// 校验配置。词表规模必须容得下保留词加字母表，保留词不得重复。
    pub fn new(config: TrainerConfig) -> Result<Self, Error> {
        let floor = config.special_tokens.len() + 256;
        if config.vocab_size < floor {
            return Err(Error::Config(format!(
                "vocab_size {} cannot hold {} special tokens plus the 256-symbol alphabet",
                config.vocab_size,
                config.special_tokens.len(),
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = config
            .special_tokens
            .iter()
            .find(|s| !seen.insert(s.as_str()))
        {
            return Err(Error::Config(format!("duplicate special token {dup:?}")));
        }
        Ok(Self { config })
    }

    /// 从文本记录序列训练词表。
    ///
    /// 语料内容不会导致失败：字节级字母表保证任何输入都可表示，
    /// 失败只可能来自配置或词表构造。
    pub fn train<I>(&self, corpus: I) -> Result<Vocab, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        // 词袋。保留词字面量先于预分词剥离，不参与合并学习
        let special_regex = build_pattern(&self.config.special_tokens);
        let mut counts = HashMap::<String, u64>::new();
        for record in corpus {
            let text = record.as_ref();
            let mut start = 0;
            if !special_regex.as_str().is_empty() {
                for m in special_regex.find_iter(text) {
                    count_words(&text[start..m.start()], &mut counts);
                    start = m.end();
                }
            }
            count_words(&text[start..], &mut counts);
        }

        // 词袋排成固定顺序的词区，逐轮原地改写
        let mut entries = counts.into_iter().collect::<Vec<_>>();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        // 先种入保留词与字母表，合并产生的词条从这之后分配 id
        let mut pieces = self.config.special_tokens.clone();
        pieces.extend((0..=255u8).map(|b| alphabet::char_of(b).to_string()));
        let base = self.config.special_tokens.len() as utok;

        let mut words = entries
            .into_iter()
            .map(|(symbols, count)| Word {
                tokens: symbols
                    .chars()
                    .map(|c| base + alphabet::byte_of(c).unwrap() as utok)
                    .collect(),
                count,
            })
            .collect::<Vec<_>>();

        info!(
            "training bpe: {} unique words, target vocab size {}",
            words.len(),
            self.config.vocab_size,
        );

        let mut merges = Vec::new();
        while pieces.len() < self.config.vocab_size {
            let pair_counts = count_pairs(&words);
            // 最高频优先；频次相同时取词条字典序较小的对，保证逐次运行结果一致
            let best = pair_counts.iter().max_by(|(pa, ca), (pb, cb)| {
                ca.cmp(cb).then_with(|| {
                    let ka = (&pieces[pa.0 as usize], &pieces[pa.1 as usize]);
                    let kb = (&pieces[pb.0 as usize], &pieces[pb.1 as usize]);
                    kb.cmp(&ka)
                })
            });
            let (left, right, freq) = match best {
                Some((&(l, r), &f)) if f >= self.config.min_frequency => (l, r, f),
                _ => {
                    info!(
                        "merges exhausted after {} rules, no pair reaches frequency {}",
                        merges.len(),
                        self.config.min_frequency,
                    );
                    break;
                }
            };

            let l = pieces[left as usize].clone();
            let r = pieces[right as usize].clone();
            let merged = pieces.len() as utok;
            if self.config.log_interval != 0 && (merges.len() + 1) % self.config.log_interval == 0 {
                debug!(
                    "merge {:>6}: {l:?} + {r:?} -> {merged} (frequency {freq})",
                    merges.len() + 1,
                );
            }
            pieces.push(format!("{l}{r}"));
            merges.push(MergeRule { left: l, right: r });
            apply_merge(&mut words, left, right, merged);
        }

        info!(
            "training done: {} merge rules, vocab size {}",
            merges.len(),
            pieces.len(),
        );

        let specials = self
            .config
            .special_tokens
            .iter()
            .enumerate()
            .map(|(i, s)| SpecialToken {
                piece: s.clone(),
                id: i as utok,
            })
            .collect();
        Vocab::new(pieces, merges, specials)
    }
}

fn count_words(text: &str, counts: &mut HashMap<String, u64>) {
    for word in split_words(text) {
        *counts.entry(alphabet::encode(word.as_bytes())).or_default() += 1;
    }
}

/// 全部词中相邻 token 对的加权频次。
/// u64 部分和的相加与归并顺序无关，并行不影响确定性。
fn count_pairs(words: &[Word]) -> HashMap<(utok, utok), u64> {
    words
        .par_iter()
        .fold(HashMap::new, |mut acc, word| {
            for w in word.tokens.windows(2) {
                *acc.entry((w[0], w[1])).or_insert(0) += word.count;
            }
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (pair, n) in b {
                *a.entry(pair).or_insert(0) += n;
            }
            a
        })
}

/// 每个词内左起扫描，不重叠地把 (left, right) 替换为合并后的 token。
fn apply_merge(words: &mut [Word], left: utok, right: utok, merged: utok) {
    words.par_iter_mut().for_each(|word| {
        if word.tokens.len() < 2 {
            return;
        }
        let mut out = Vec::with_capacity(word.tokens.len());
        let mut i = 0;
        while i < word.tokens.len() {
            if word.tokens[i] == left && word.tokens.get(i + 1) == Some(&right) {
                out.push(merged);
                i += 2;
            } else {
                out.push(word.tokens[i]);
                i += 1;
            }
        }
        word.tokens = out;
    });
}
