use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::digital::{Error as _, OutputPin};

const LED_ON_MS: u64 = 100;
const PERIOD_CONNECTED_MS: u64 = 5000;
const PERIOD_DISCONNECTED_MS: u64 = 1000;
// 闪烁任务的轮询间隔
const TICK: Duration = Duration::from_millis(20);

/// 热点已连接终端计数（Wi-Fi 事件回调更新）。
#[derive(Default)]
pub struct StationCounter {
    count: AtomicU32,
}

impl StationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1));
    }

    pub fn disconnected(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// 闪烁节奏：亮 100ms，灭 5s（有终端）或 1s（无终端）。
pub struct BlinkSchedule {
    led_on: bool,
    deadline_ms: u64,
    last_count: u32,
}

impl BlinkSchedule {
    /// 从点亮开始。
    pub fn start(now_ms: u64, count: u32) -> Self {
        Self {
            led_on: true,
            deadline_ms: now_ms + LED_ON_MS,
            last_count: count,
        }
    }

    pub fn is_on(&self) -> bool {
        self.led_on
    }

    fn off_period(count: u32) -> u64 {
        if count > 0 {
            PERIOD_CONNECTED_MS
        } else {
            PERIOD_DISCONNECTED_MS
        }
    }

    /// 推进一次，返回需要写入的新电平。
    pub fn tick(&mut self, now_ms: u64, count: u32) -> Option<bool> {
        let count_changed = count != self.last_count;
        self.last_count = count;

        if self.led_on {
            if now_ms < self.deadline_ms {
                return None;
            }
            self.led_on = false;
            self.deadline_ms = now_ms + Self::off_period(count);
            return Some(false);
        }

        // 熄灭期间终端数变化，按新节奏从现在重新计时
        if count_changed {
            self.deadline_ms = now_ms + Self::off_period(count);
        }
        if now_ms < self.deadline_ms {
            return None;
        }
        self.led_on = true;
        self.deadline_ms = now_ms + LED_ON_MS;
        Some(true)
    }
}

/// 启动指示灯任务：根据热点终端数闪烁。
pub fn spawn_blink_task<P>(mut led: P, stations: Arc<StationCounter>) -> thread::JoinHandle<()>
where
    P: OutputPin + Send + 'static,
{
    thread::spawn(move || {
        let started = Instant::now();
        let mut schedule = BlinkSchedule::start(0, stations.get());
        if let Err(err) = led.set_high() {
            log::warn!("Blink LED update failed: {:?}", err.kind());
        }
        loop {
            thread::sleep(TICK);
            let now_ms = started.elapsed().as_millis() as u64;
            if let Some(on) = schedule.tick(now_ms, stations.get()) {
                let result = if on { led.set_high() } else { led.set_low() };
                if let Err(err) = result {
                    log::warn!("Blink LED update failed: {:?}", err.kind());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates() {
        let counter = StationCounter::new();
        counter.disconnected();
        assert_eq!(counter.get(), 0);
        counter.connected();
        counter.connected();
        counter.disconnected();
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn disconnected_period_is_one_second() {
        let mut schedule = BlinkSchedule::start(0, 0);
        assert_eq!(schedule.tick(50, 0), None);
        assert_eq!(schedule.tick(100, 0), Some(false));
        assert_eq!(schedule.tick(1099, 0), None);
        assert_eq!(schedule.tick(1100, 0), Some(true));
        assert!(schedule.is_on());
    }

    #[test]
    fn connected_period_is_five_seconds() {
        let mut schedule = BlinkSchedule::start(0, 2);
        assert_eq!(schedule.tick(100, 2), Some(false));
        assert_eq!(schedule.tick(1100, 2), None);
        assert_eq!(schedule.tick(5100, 2), Some(true));
    }

    #[test]
    fn station_change_while_off_reschedules() {
        let mut schedule = BlinkSchedule::start(0, 0);
        assert_eq!(schedule.tick(100, 0), Some(false));
        // 第一个终端在熄灭期间加入：5s 从现在算起
        assert_eq!(schedule.tick(600, 1), None);
        assert_eq!(schedule.tick(1100, 1), None);
        assert_eq!(schedule.tick(5599, 1), None);
        assert_eq!(schedule.tick(5600, 1), Some(true));
    }

    #[test]
    fn station_change_while_on_keeps_flash_short() {
        let mut schedule = BlinkSchedule::start(0, 0);
        assert_eq!(schedule.tick(50, 1), None);
        assert_eq!(schedule.tick(100, 1), Some(false));
        assert_eq!(schedule.tick(1100, 1), None);
    }
}
