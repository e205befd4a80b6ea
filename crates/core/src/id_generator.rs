use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::Utc;

/// 2024-01-01T00:00:00Z 的毫秒时间戳
const EPOCH_MILLIS: i64 = 1_704_067_200_000;
const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER: i64 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// 按时间递增的唯一ID生成器
///
/// 41位毫秒时间戳 + 10位节点号 + 12位序列号。同一毫秒内序列号用尽时
/// 借用下一毫秒；时钟回拨时沿用上次的时间戳，保证单调递增。
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: i64,
    state: Mutex<GeneratorState>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: i64,
    sequence: i64,
}

impl IdGenerator {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id) & MAX_WORKER,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// 由节点标识派生节点号
    pub fn for_node(node_id: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        node_id.hash(&mut hasher);
        Self::new((hasher.finish() & MAX_WORKER as u64) as u16)
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis() - EPOCH_MILLIS;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                state.last_millis += 1;
                state.sequence = 0;
            }
        }

        (state.last_millis << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}
