#![deny(warnings)]

//! 字节级 BPE 分词器。
//!
//! - [`Trainer`] 从语料学习合并规则，产出 [`Vocab`]；
//! - [`Tokenizer`] 持有冻结的词表，完成文本与 token id 序列的互转；
//! - [`ChatTemplate`] 把结构化对话渲染为送入编码器的提示串。

pub mod alphabet;

mod bpe;
mod template;
mod tokenizer;
mod trainer;
mod vocab;

use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};

pub use template::{ChatMessage, ChatTemplate};
pub use tokenizer::Tokenizer;
pub use trainer::{Trainer, TrainerConfig};
pub use vocab::{MergeRule, SpecialToken, Vocab};

/// `utok` for token id.
#[allow(non_camel_case_types)]
pub type utok = u32;

/// 分词器各层共享的错误类型。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 训练或模板配置非法，在任何迭代开始前报告
    #[error("invalid configuration: {0}")]
    Config(String),
    /// 持久化的词表损坏或不自洽，加载时报告，不会静默修补
    #[error("malformed vocabulary artifact: {0}")]
    Format(String),
    /// 解码遇到词表范围之外的 id
    #[error("token id {0} out of vocabulary range")]
    UnknownId(utok),
    /// 解码重组出的字节序列不是合法 utf-8，说明上游 id 已损坏
    #[error("decoded bytes are not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 预分词：在每个空格之前断开，使每个词至多携带一个前导空格。
/// 训练和编码必须使用同一边界，否则合并规则对不上。
pub(crate) fn split_words(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    for pos in memchr::memchr_iter(b' ', text.as_bytes()) {
        if pos > start {
            words.push(&text[start..pos]);
            start = pos;
        }
    }
    if start < text.len() {
        words.push(&text[start..]);
    }
    words
}

/// 把一组字面量拼成匹配其中任意一个的正则，字面量中的元字符转义。
/// 长字面量排在前面，避免短词吃掉长词的前缀；随后按字典序，保证模式稳定。
pub(crate) fn build_pattern<'a>(text: impl IntoIterator<Item = &'a String>) -> Regex {
    static SPECIAL: LazyLock<HashSet<char>> = LazyLock::new(|| {
        HashSet::from([
            '*', '.', '?', '+', '^', '$', '|', '/', '\\', '(', ')', '[', ']', '{', '}',
        ])
    });

    let mut literals = text.into_iter().collect::<Vec<_>>();
    literals.sort_unstable_by_key(|p| (std::cmp::Reverse(p.len()), p.as_str()));

    let mut pattern = String::new();
    for p in literals {
        for c in p.chars() {
            if SPECIAL.contains(&c) {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('|');
    }
    pattern.pop();

    Regex::new(&pattern).unwrap()
}
