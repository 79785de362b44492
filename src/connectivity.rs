use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// 连接事件位。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityBit {
    /// 已获取 IP。
    Connected,
    DataReceived,
}

impl ConnectivityBit {
    fn mask(self) -> u8 {
        match self {
            ConnectivityBit::Connected => 1 << 0,
            ConnectivityBit::DataReceived => 1 << 2,
        }
    }
}

/// wait 的返回结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Cancelled,
}

struct Shared {
    bits: Mutex<u8>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, u8> {
        // 持锁方只做位运算，不会在持锁时 panic
        self.bits.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 网络事件与上线流程之间的会合点。
///
/// 事件回调调用 `set`，上线线程调用 `wait`；`set` 先于 `wait` 发生时
/// `wait` 立即返回，不会丢失唤醒。克隆得到的是同一组标志位的句柄。
#[derive(Clone)]
pub struct ConnectivityFlags {
    shared: Arc<Shared>,
}

impl ConnectivityFlags {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                bits: Mutex::new(0),
                changed: Condvar::new(),
            }),
        }
    }

    /// 清除全部位（每次上线前调用）。
    pub fn clear_all(&self) {
        *self.shared.lock() = 0;
    }

    /// 置位并唤醒所有等待者；不会阻塞在上线流程上。
    pub fn set(&self, bit: ConnectivityBit) {
        let mut bits = self.shared.lock();
        *bits |= bit.mask();
        self.shared.changed.notify_all();
    }

    pub fn clear(&self, bit: ConnectivityBit) {
        *self.shared.lock() &= !bit.mask();
    }

    pub fn is_set(&self, bit: ConnectivityBit) -> bool {
        *self.shared.lock() & bit.mask() != 0
    }

    /// 等待指定位被置位。
    ///
    /// `timeout` 为 `None` 时无限等待；`cancel` 被触发时返回 `Cancelled`。
    /// 位在等待返回后保持置位，不会被消费。
    pub fn wait(
        &self,
        bit: ConnectivityBit,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> WaitOutcome {
        if let Some(token) = cancel {
            token.register(&self.shared);
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut bits = self.shared.lock();
        loop {
            if *bits & bit.mask() != 0 {
                return WaitOutcome::Signaled;
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return WaitOutcome::Cancelled;
            }
            match deadline {
                None => {
                    bits = self
                        .shared
                        .changed
                        .wait(bits)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    bits = self
                        .shared
                        .changed
                        .wait_timeout(bits, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
            }
        }
    }
}

impl Default for ConnectivityFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// 取消令牌：由监督者触发，让挂起的 wait 返回 `Cancelled`。
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Weak<Shared>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// 触发取消并唤醒所有关联的等待者。
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let waiters = match self.inner.waiters.lock() {
            Ok(waiters) => waiters,
            Err(poisoned) => poisoned.into_inner(),
        };
        for shared in waiters.iter().filter_map(Weak::upgrade) {
            // 先拿锁再通知，避免等待者检查标志与睡眠之间漏掉唤醒
            let _bits = shared.lock();
            shared.changed.notify_all();
        }
    }

    fn register(&self, shared: &Arc<Shared>) {
        let mut waiters = match self.inner.waiters.lock() {
            Ok(waiters) => waiters,
            Err(poisoned) => poisoned.into_inner(),
        };
        waiters.retain(|w| w.strong_count() > 0);
        if !waiters.iter().any(|w| w.as_ptr() == Arc::as_ptr(shared)) {
            waiters.push(Arc::downgrade(shared));
        }
    }
}

/// PPP 拿到的地址信息。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: [Option<Ipv4Addr>; 2],
}

/// 网络栈投递的异步事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetEvent {
    IpAcquired(IpInfo),
    IpLost,
    Ipv6Acquired(Ipv6Addr),
    PppStatus(i32),
    PppUserError,
    DataReceived,
}

// esp_netif_ppp.h: NETIF_PPP_ERRORUSER
const PPP_ERROR_USER: i32 = 5;

impl NetEvent {
    /// `NETIF_PPP_STATUS` 事件 ID -> 事件。
    pub fn from_ppp_status(code: i32) -> Self {
        if code == PPP_ERROR_USER {
            NetEvent::PppUserError
        } else {
            NetEvent::PppStatus(code)
        }
    }
}

/// 事件回调入口：只写标志位与日志，绝不阻塞。
pub fn dispatch_net_event(flags: &ConnectivityFlags, event: &NetEvent) {
    match event {
        NetEvent::IpAcquired(info) => {
            log::info!("Modem connected to PPP server");
            log::info!("~~~~~~~~~~~~~~");
            log::info!("IP          : {}", info.ip);
            log::info!("Netmask     : {}", info.netmask);
            log::info!("Gateway     : {}", info.gateway);
            for (idx, dns) in info.dns.iter().enumerate() {
                match dns {
                    Some(addr) => log::info!("Name Server{}: {}", idx + 1, addr),
                    None => log::info!("Name Server{}: -", idx + 1),
                }
            }
            log::info!("~~~~~~~~~~~~~~");
            flags.set(ConnectivityBit::Connected);
        }
        // 丢失地址只记录，不清除 Connected（无重连逻辑）
        NetEvent::IpLost => log::info!("Modem disconnected from PPP server"),
        NetEvent::Ipv6Acquired(addr) => log::info!("Got IPv6 address {}", addr),
        NetEvent::PppStatus(code) => log::info!("PPP state changed event {}", code),
        NetEvent::PppUserError => log::info!("PPP user interrupted event"),
        NetEvent::DataReceived => flags.set(ConnectivityBit::DataReceived),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn info() -> IpInfo {
        IpInfo {
            ip: Ipv4Addr::new(10, 64, 1, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 255),
            gateway: Ipv4Addr::new(10, 64, 64, 64),
            dns: [Some(Ipv4Addr::new(8, 8, 8, 8)), None],
        }
    }

    #[test]
    fn set_before_wait_returns_immediately() {
        let flags = ConnectivityFlags::new();
        flags.set(ConnectivityBit::Connected);
        assert_eq!(
            flags.wait(ConnectivityBit::Connected, None, None),
            WaitOutcome::Signaled
        );
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        for delay_ms in [0u64, 1, 5, 20] {
            let flags = ConnectivityFlags::new();
            let setter = flags.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                setter.set(ConnectivityBit::Connected);
                setter.set(ConnectivityBit::Connected);
            });
            assert_eq!(
                flags.wait(ConnectivityBit::Connected, None, None),
                WaitOutcome::Signaled
            );
            handle.join().unwrap();
        }
    }

    #[test]
    fn bits_are_independent() {
        let flags = ConnectivityFlags::new();
        flags.set(ConnectivityBit::DataReceived);
        assert!(!flags.is_set(ConnectivityBit::Connected));
        assert_eq!(
            flags.wait(
                ConnectivityBit::Connected,
                Some(Duration::from_millis(10)),
                None
            ),
            WaitOutcome::TimedOut
        );
        flags.clear(ConnectivityBit::DataReceived);
        assert!(!flags.is_set(ConnectivityBit::DataReceived));
    }

    #[test]
    fn clear_all_drops_stale_bits() {
        let flags = ConnectivityFlags::new();
        flags.set(ConnectivityBit::Connected);
        flags.set(ConnectivityBit::DataReceived);
        flags.clear_all();
        assert!(!flags.is_set(ConnectivityBit::Connected));
        assert!(!flags.is_set(ConnectivityBit::DataReceived));
    }

    #[test]
    fn cancel_wakes_indefinite_wait() {
        let flags = ConnectivityFlags::new();
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert_eq!(
            flags.wait(ConnectivityBit::Connected, None, Some(&token)),
            WaitOutcome::Cancelled
        );
        handle.join().unwrap();
    }

    #[test]
    fn signaled_wins_over_cancel() {
        let flags = ConnectivityFlags::new();
        let token = CancelToken::new();
        token.cancel();
        flags.set(ConnectivityBit::Connected);
        assert_eq!(
            flags.wait(ConnectivityBit::Connected, None, Some(&token)),
            WaitOutcome::Signaled
        );
    }

    #[test]
    fn ip_lost_keeps_connected() {
        let flags = ConnectivityFlags::new();
        dispatch_net_event(&flags, &NetEvent::IpAcquired(info()));
        dispatch_net_event(&flags, &NetEvent::IpLost);
        assert!(flags.is_set(ConnectivityBit::Connected));
        dispatch_net_event(&flags, &NetEvent::PppStatus(6));
        assert!(!flags.is_set(ConnectivityBit::DataReceived));
        dispatch_net_event(&flags, &NetEvent::DataReceived);
        assert!(flags.is_set(ConnectivityBit::DataReceived));
    }

    #[test]
    fn ppp_status_codes_map_to_events() {
        assert_eq!(NetEvent::from_ppp_status(5), NetEvent::PppUserError);
        assert_eq!(NetEvent::from_ppp_status(0), NetEvent::PppStatus(0));
        assert_eq!(NetEvent::from_ppp_status(6), NetEvent::PppStatus(6));

        // 状态事件只记录日志，不改变任何标志位
        let flags = ConnectivityFlags::new();
        dispatch_net_event(&flags, &NetEvent::from_ppp_status(5));
        dispatch_net_event(&flags, &NetEvent::from_ppp_status(6));
        assert!(!flags.is_set(ConnectivityBit::Connected));
        assert!(!flags.is_set(ConnectivityBit::DataReceived));
    }
}
