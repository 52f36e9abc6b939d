use crate::{alphabet, utok, Vocab};
use std::{
    cmp::Ordering::{self, Equal},
    collections::BinaryHeap,
};

/// 已被合并吞并的位置。
const HOLE: utok = utok::MAX;

/// 一个词的合并现场。
///
/// `marks` 按符号串字节位置索引：每个 token 的起始位置记录其当前 token
/// 与到前一 token 起始位置的距离，其余位置是洞。候选合并进入按 rank
/// 排序的优先队列，弹出时若现场已变则直接作废。
pub(crate) struct MergeState<'v> {
    vocab: &'v Vocab,
    marks: Vec<Mark>,
    merges: BinaryHeap<Merge>,
}

pub(crate) struct IntoIter<'v> {
    vocab: &'v Vocab,
    marks: Vec<Mark>,
    i: usize,
}

#[derive(Clone, Copy, Debug)]
struct Mark {
    token: utok,
    back_distance: u32,
}

impl Mark {
    #[inline(always)]
    const fn hole() -> Self {
        Self {
            token: HOLE,
            back_distance: 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Merge {
    pos: usize,
    pair: (utok, utok),
    merge: utok,
    rank: u32,
}

impl Ord for Merge {
    fn cmp(&self, other: &Self) -> Ordering {
        // 比较顺序：rank -> pos -> pair，翻转后小者先出队
        match self.rank.cmp(&other.rank) {
            Equal => match self.pos.cmp(&other.pos) {
                Equal => self.pair.cmp(&other.pair),
                other => other,
            },
            other => other,
        }
        .reverse()
    }
}

impl PartialOrd for Merge {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'v> MergeState<'v> {
    pub fn new(vocab: &'v Vocab, symbols: &str) -> Self {
        let mut marks = vec![Mark::hole(); symbols.len()];
        let mut merges = BinaryHeap::new();

        let mut last: Option<(usize, utok)> = None;
        for (i, c) in symbols.char_indices() {
            // 符号串的每个字符都是字母表成员，必然有对应的单符号词条
            let token = vocab.symbol(alphabet::byte_of(c).unwrap());
            marks[i].token = token;
            if let Some((pos, prev)) = last {
                marks[i].back_distance = (i - pos) as _;
                if let Some(merge) = build_merge(vocab, pos, (prev, token)) {
                    merges.push(merge);
                }
            }
            last = Some((i, token));
        }

        Self {
            vocab,
            marks,
            merges,
        }
    }

    /// 尝试执行一次合并，返回是否成功执行了一次合并。
    pub fn merge(&mut self) -> bool {
        // 一次合并涉及至多 4 个 token：
        //
        // t0 t1 t2 t3
        // -- -- -- --
        //      ↓
        // t0 merge t3
        // -- ----- --
        //
        // 成功的合并至少消费队列中的 1 个项，至多补入 2 个新项。
        while let Some(Merge {
            pos: p1,
            pair: (t1, t2),
            merge,
            ..
        }) = self.merges.pop()
        {
            // 确认合并项仍然有效
            if self.marks[p1].token != t1 {
                continue;
            }
            let l1 = self.vocab.piece_len(t1);
            let p2 = p1 + l1;
            if self.marks[p2].token != t2 {
                continue;
            }
            // 合并
            self.marks[p1].token = merge;
            self.marks[p2] = Mark::hole();

            let l2 = self.vocab.piece_len(t2);
            let p3 = p2 + l2;
            // 创建 merge + t3 合并项
            match self.marks.get_mut(p3) {
                None => {}
                Some(Mark {
                    token,
                    back_distance,
                }) => {
                    *back_distance = (l1 + l2) as _;

                    let t3 = *token;
                    if let Some(merge) = build_merge(self.vocab, p1, (merge, t3)) {
                        self.merges.push(merge);
                    }
                }
            }
            // 创建 t0 + merge 合并项
            match self.marks[p1].back_distance as usize {
                0 => {}
                l0 => {
                    let p0 = p1 - l0;
                    let t0 = self.marks[p0].token;
                    if let Some(merge) = build_merge(self.vocab, p0, (t0, merge)) {
                        self.merges.push(merge);
                    }
                }
            }
            return true;
        }
        false
    }
}

fn build_merge(vocab: &Vocab, pos: usize, pair: (utok, utok)) -> Option<Merge> {
    vocab.rank(pair).map(|(rank, merge)| Merge {
        pos,
        pair,
        merge,
        rank,
    })
}

impl<'v> IntoIterator for MergeState<'v> {
    type Item = utok;
    type IntoIter = IntoIter<'v>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Self::IntoIter {
            vocab: self.vocab,
            marks: self.marks,
            i: 0,
        }
    }
}

impl Iterator for IntoIter<'_> {
    type Item = utok;

    fn next(&mut self) -> Option<Self::Item> {
        let &Mark { token, .. } = self.marks.get(self.i)?;
        self.i += self.vocab.piece_len(token);
        Some(token)
    }
}
