//! 随机数来源
//!
//! PROBABILITY 条件的抽样通过 [`RandomSource`] 注入，测试中可替换为固定序列。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub trait RandomSource: Send {
    /// 返回 [0, 1) 区间内的均匀随机数
    fn next_unit(&mut self) -> f64;
}

/// 基于 `StdRng` 的随机源
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    /// 使用操作系统熵源初始化
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// 使用固定种子初始化（可复现）
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for StdRandom {
    fn next_unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

/// 按顺序返回预设值的随机源，用完后循环
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: VecDeque<f64>,
}

impl SequenceRandom {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn next_unit(&mut self) -> f64 {
        match self.values.pop_front() {
            Some(v) => {
                self.values.push_back(v);
                v
            }
            None => 0.0,
        }
    }
}
