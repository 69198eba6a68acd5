//! 时间来源
//!
//! TIME_RANGE、RATE_LIMIT 和冷却期都依赖"当前时间"，通过 [`Clock`] 注入以便测试。

use chrono::{DateTime, Local, NaiveTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// 当前时刻，用于冷却期与滑动窗口计算
    fn now(&self) -> DateTime<Utc>;

    /// 当前的本地时刻（一天中的时间），用于 TIME_RANGE
    fn time_of_day(&self) -> NaiveTime {
        self.now().with_timezone(&Local).time()
    }
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟
///
/// 时刻按 UTC 解释，`time_of_day` 直接取 UTC 时间，不受运行机器时区影响。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 设置为当天的指定时刻（HH:MM）
    ///
    /// 格式错误时保持原时刻不变。
    pub fn set_time_of_day(&self, hh_mm: &str) {
        if let Ok(time) = NaiveTime::parse_from_str(hh_mm, "%H:%M") {
            let mut now = self.now.lock();
            *now = now.date_naive().and_time(time).and_utc();
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }
}
