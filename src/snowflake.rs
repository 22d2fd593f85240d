//! Snowflake ID generation
//!
//! IDs are 64-bit integers laid out as
//! `timestamp (41 bits) | data center (5) | worker (5) | sequence (12)`,
//! with the timestamp counted in milliseconds since a configurable epoch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const SEQUENCE_BITS: u32 = 12;
pub const WORKER_ID_BITS: u32 = 5;
pub const DATA_CENTER_ID_BITS: u32 = 5;

const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: u8 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATA_CENTER_ID: u8 = (1 << DATA_CENTER_ID_BITS) - 1;

const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const DATA_CENTER_ID_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATA_CENTER_ID_BITS;

/// 2019-06-20 00:00:00 UTC
pub const DEFAULT_BEGIN_SECOND: u64 = 1_560_960_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnowflakeError {
    #[error("invalid snowflake configuration: {0}")]
    InvalidConfig(String),
    #[error("clock moved backwards: last id at {last_ms}ms, now {now_ms}ms")]
    ClockMovedBackwards { last_ms: u64, now_ms: u64 },
    #[error("clock reads {now_ms}ms, before the configured epoch {begin_ms}ms")]
    BeforeEpoch { now_ms: u64, begin_ms: u64 },
}

/// Source of wall-clock milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    pub begin_second: u64,
    pub data_center_id: u8,
    pub worker_id: u8,
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            begin_second: DEFAULT_BEGIN_SECOND,
            data_center_id: 0,
            worker_id: 0,
        }
    }
}

/// Fields packed into a snowflake ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnowflakeMeta {
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    pub data_center_id: u8,
    pub worker_id: u8,
    pub sequence: u16,
}

#[derive(Debug, Default)]
struct State {
    last_ms: u64,
    sequence: u64,
}

pub struct SnowflakeGenerator {
    config: SnowflakeConfig,
    begin_ms: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    pub fn new(config: SnowflakeConfig) -> Result<Self, SnowflakeError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SnowflakeConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SnowflakeError> {
        if config.worker_id > MAX_WORKER_ID {
            return Err(SnowflakeError::InvalidConfig(format!(
                "worker id {} exceeds {MAX_WORKER_ID}",
                config.worker_id
            )));
        }
        if config.data_center_id > MAX_DATA_CENTER_ID {
            return Err(SnowflakeError::InvalidConfig(format!(
                "data center id {} exceeds {MAX_DATA_CENTER_ID}",
                config.data_center_id
            )));
        }
        let begin_ms = config.begin_second.checked_mul(1000).ok_or_else(|| {
            SnowflakeError::InvalidConfig(format!(
                "begin second {} is out of range",
                config.begin_second
            ))
        })?;

        Ok(Self {
            config,
            begin_ms,
            clock,
            state: Mutex::new(State::default()),
        })
    }

    pub fn config(&self) -> &SnowflakeConfig {
        &self.config
    }

    /// Issue the next ID
    ///
    /// IDs from one generator are strictly increasing. When the sequence for
    /// the current millisecond is exhausted the call waits for the next one.
    pub fn generate(&self) -> Result<u64, SnowflakeError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut now_ms = self.current_ms()?;
        if now_ms < state.last_ms {
            warn!(last_ms = state.last_ms, now_ms, "clock moved backwards");
            return Err(SnowflakeError::ClockMovedBackwards {
                last_ms: state.last_ms,
                now_ms,
            });
        }

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                now_ms = self.wait_next_ms(state.last_ms)?;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now_ms;

        Ok(((now_ms - self.begin_ms) << TIMESTAMP_SHIFT)
            | (u64::from(self.config.data_center_id) << DATA_CENTER_ID_SHIFT)
            | (u64::from(self.config.worker_id) << WORKER_ID_SHIFT)
            | state.sequence)
    }

    /// Split an ID back into its fields
    pub fn decompose(&self, id: u64) -> SnowflakeMeta {
        decompose(id, self.config.begin_second)
    }

    fn current_ms(&self) -> Result<u64, SnowflakeError> {
        let now_ms = self.clock.now_ms();
        if now_ms < self.begin_ms {
            return Err(SnowflakeError::BeforeEpoch {
                now_ms,
                begin_ms: self.begin_ms,
            });
        }
        Ok(now_ms)
    }

    fn wait_next_ms(&self, last_ms: u64) -> Result<u64, SnowflakeError> {
        loop {
            let now_ms = self.current_ms()?;
            if now_ms > last_ms {
                return Ok(now_ms);
            }
            if now_ms < last_ms {
                return Err(SnowflakeError::ClockMovedBackwards { last_ms, now_ms });
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}

/// Split an ID produced with the given epoch into its fields
pub fn decompose(id: u64, begin_second: u64) -> SnowflakeMeta {
    SnowflakeMeta {
        timestamp_ms: (id >> TIMESTAMP_SHIFT) + begin_second.saturating_mul(1000),
        data_center_id: ((id >> DATA_CENTER_ID_SHIFT) & u64::from(MAX_DATA_CENTER_ID)) as u8,
        worker_id: ((id >> WORKER_ID_SHIFT) & u64::from(MAX_WORKER_ID)) as u8,
        sequence: (id & MAX_SEQUENCE) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock that returns a scripted sequence of readings, repeating the last
    struct ScriptedClock {
        readings: Vec<u64>,
        next: AtomicU64,
    }

    impl ScriptedClock {
        fn new(readings: Vec<u64>) -> Arc<Self> {
            Arc::new(Self {
                readings,
                next: AtomicU64::new(0),
            })
        }
    }

    impl Clock for ScriptedClock {
        fn now_ms(&self) -> u64 {
            let i = self.next.fetch_add(1, Ordering::SeqCst) as usize;
            self.readings[i.min(self.readings.len() - 1)]
        }
    }

    const BEGIN_MS: u64 = DEFAULT_BEGIN_SECOND * 1000;

    fn config(data_center_id: u8, worker_id: u8) -> SnowflakeConfig {
        SnowflakeConfig {
            begin_second: DEFAULT_BEGIN_SECOND,
            data_center_id,
            worker_id,
        }
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let generator = SnowflakeGenerator::new(config(1, 2)).unwrap();

        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.generate().unwrap();
            assert!(id > last, "{id} should be greater than {last}");
            last = id;
        }
    }

    #[test]
    fn test_decompose_recovers_fields() {
        let clock = ScriptedClock::new(vec![BEGIN_MS + 5_000]);
        let generator = SnowflakeGenerator::with_clock(config(3, 17), clock).unwrap();

        let first = generator.generate().unwrap();
        let second = generator.generate().unwrap();

        let meta = generator.decompose(second);
        assert_eq!(meta.timestamp_ms, BEGIN_MS + 5_000);
        assert_eq!(meta.data_center_id, 3);
        assert_eq!(meta.worker_id, 17);
        assert_eq!(meta.sequence, 1);
        assert_eq!(generator.decompose(first).sequence, 0);
    }

    #[test]
    fn test_sequence_overflow_moves_to_next_millisecond() {
        let mut readings = vec![BEGIN_MS + 10; 4097];
        readings.push(BEGIN_MS + 11);
        let generator =
            SnowflakeGenerator::with_clock(config(0, 0), ScriptedClock::new(readings)).unwrap();

        let mut last = None;
        for _ in 0..4096 {
            last = Some(generator.generate().unwrap());
        }
        assert_eq!(generator.decompose(last.unwrap()).sequence, 4095);

        let rolled = generator.generate().unwrap();
        let meta = generator.decompose(rolled);
        assert_eq!(meta.timestamp_ms, BEGIN_MS + 11);
        assert_eq!(meta.sequence, 0);
    }

    #[test]
    fn test_clock_moving_backwards_is_an_error() {
        let clock = ScriptedClock::new(vec![BEGIN_MS + 100, BEGIN_MS + 50]);
        let generator = SnowflakeGenerator::with_clock(config(0, 0), clock).unwrap();

        generator.generate().unwrap();
        assert_eq!(
            generator.generate(),
            Err(SnowflakeError::ClockMovedBackwards {
                last_ms: BEGIN_MS + 100,
                now_ms: BEGIN_MS + 50,
            })
        );
    }

    #[test]
    fn test_clock_before_epoch_is_an_error() {
        let clock = ScriptedClock::new(vec![BEGIN_MS - 1]);
        let generator = SnowflakeGenerator::with_clock(config(0, 0), clock).unwrap();

        assert!(matches!(
            generator.generate(),
            Err(SnowflakeError::BeforeEpoch { .. })
        ));
    }

    #[test]
    fn test_out_of_range_ids_rejected() {
        assert!(matches!(
            SnowflakeGenerator::new(config(32, 0)),
            Err(SnowflakeError::InvalidConfig(_))
        ));
        assert!(matches!(
            SnowflakeGenerator::new(config(0, 32)),
            Err(SnowflakeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrent_generation_yields_unique_ids() {
        let generator = Arc::new(SnowflakeGenerator::new(config(0, 1)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..2_000)
                        .map(|_| generator.generate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }
}
