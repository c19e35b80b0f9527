//! 전송 속도 측정

use std::time::{Duration, Instant};

/// 측정 윈도우
const WINDOW: Duration = Duration::from_millis(1000);

/// 바이트 카운터
///
/// 누적 바이트와 1초 윈도우 속도를 함께 기록.
/// 윈도우가 1초를 넘기면 그 구간의 속도를 확정하고 새 윈도우 시작
#[derive(Debug, Clone)]
pub struct ByteCounter {
    /// 누적 바이트
    total: u64,

    /// 현재 윈도우 시작 시각
    window_start: Instant,

    /// 현재 윈도우 바이트
    window_bytes: u64,

    /// 마지막으로 확정된 속도 (bytes/sec)
    rate: u64,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            total: 0,
            window_start: now,
            window_bytes: 0,
            rate: 0,
        }
    }

    /// 전송 바이트 기록
    pub fn add(&mut self, bytes: u64) {
        self.add_at(bytes, Instant::now());
    }

    pub fn add_at(&mut self, bytes: u64, now: Instant) {
        self.roll(now);
        self.total += bytes;
        self.window_bytes += bytes;
    }

    /// 윈도우 경과 확인 (진행 틱에서 호출)
    pub fn tick(&mut self, now: Instant) {
        self.roll(now);
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return;
        }

        // 1초 기준으로 환산
        let millis = elapsed.as_millis().max(1) as u64;
        self.rate = self.window_bytes.saturating_mul(1000) / millis;
        self.window_bytes = 0;
        self.window_start = now;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// 최근 1초 구간의 속도
    pub fn bytes_per_sec(&self) -> u64 {
        self.rate
    }
}

impl Default for ByteCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_after_window() {
        let start = Instant::now();
        let mut counter = ByteCounter::starting_at(start);

        counter.add_at(4000, start + Duration::from_millis(200));
        counter.add_at(6000, start + Duration::from_millis(800));
        // 윈도우가 끝나기 전에는 속도 없음
        assert_eq!(counter.bytes_per_sec(), 0);
        assert_eq!(counter.total(), 10_000);

        counter.tick(start + Duration::from_millis(1000));
        assert_eq!(counter.bytes_per_sec(), 10_000);
    }

    #[test]
    fn test_rate_scaled_for_long_window() {
        let start = Instant::now();
        let mut counter = ByteCounter::starting_at(start);

        counter.add_at(3000, start + Duration::from_millis(100));
        counter.tick(start + Duration::from_millis(2000));
        assert_eq!(counter.bytes_per_sec(), 1500);
    }

    #[test]
    fn test_idle_window_drops_rate() {
        let start = Instant::now();
        let mut counter = ByteCounter::starting_at(start);

        counter.add_at(5000, start);
        counter.tick(start + Duration::from_secs(1));
        assert_eq!(counter.bytes_per_sec(), 5000);

        counter.tick(start + Duration::from_secs(2));
        assert_eq!(counter.bytes_per_sec(), 0);
        assert_eq!(counter.total(), 5000);
    }
}
