//! 睡眠锁模块
//! 提供基于进程休眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的进程会进入休眠状态，避免忙等待。
//! 缓存层用它保护每个缓冲块的数据，持有期间可以进行磁盘 I/O。

use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::ops::{Deref, DerefMut, Drop};

use crate::hal::Hal;
use crate::spinlock::SpinLock;

/// 睡眠锁结构，提供阻塞式同步机制
///
/// 与自旋锁不同，当锁被占用时，尝试获取的进程会通过 [`Hal::sleep`] 进入休眠状态，
/// 直到锁被释放后被唤醒。这避免了忙等待，适用于可能长时间持有的锁。
///
/// # 字段说明
/// - `lock`: 内部自旋锁，保护`locked`与`pid`状态
/// - `locked`: 表示锁是否已被占用
/// - `pid`: 持有者的进程标识，未被持有时为 0
/// - `name`: 锁的标识名称，用于调试
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性
pub struct SleepLock<T: ?Sized> {
    lock: SpinLock<()>,
    locked: Cell<bool>,
    pid: Cell<usize>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
// `locked` 与 `pid` 只在持有内部自旋锁时访问
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// 创建一个新的睡眠锁实例
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            pid: Cell::new(0),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// 获取睡眠锁（可能阻塞进程）
    ///
    /// # 功能说明
    /// 尝试获取睡眠锁，若锁已被占用则当前进程进入休眠状态，
    /// 直到锁被释放后被唤醒。获取成功后记录持有者的 pid，返回守卫对象。
    ///
    /// # 流程解释
    /// 1. 获取内部自旋锁保护状态；
    /// 2. 检查锁状态：
    ///    - 若已被占用：在 `locked` 的地址上睡眠，`hal.sleep` 负责释放内部自旋锁；
    ///    - 被唤醒后重新获取自旋锁并再次检查；
    /// 3. 锁可用时设置 `locked=true` 并记录 pid；
    /// 4. 释放内部自旋锁，返回守卫。
    ///
    /// # 注意
    /// 调用时不得持有任何自旋锁，否则睡眠期间其他执行流可能永远无法获取该自旋锁。
    pub fn lock<'a, H: Hal>(&'a self, hal: &'a H) -> SleepLockGuard<'a, T, H> {
        let mut guard = self.lock.lock();

        while self.locked.get() {
            hal.sleep(self.chan(), guard);
            guard = self.lock.lock();
        }

        self.locked.set(true);
        self.pid.set(hal.pid());
        drop(guard);

        SleepLockGuard {
            lock: self,
            hal,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 进程 `pid` 当前是否持有该锁
    pub fn holding(&self, pid: usize) -> bool {
        let guard = self.lock.lock();
        let holding = self.locked.get() && self.pid.get() == pid;
        drop(guard);
        holding
    }

    /// 睡眠/唤醒使用的通道，取 `locked` 字段的地址
    fn chan(&self) -> usize {
        self.locked.as_ptr() as usize
    }

    /// 释放锁并唤醒等待者
    fn unlock<H: Hal>(&self, hal: &H) {
        let guard = self.lock.lock();
        self.locked.set(false);
        self.pid.set(0);
        hal.wakeup(self.chan());
        drop(guard);
    }
}

impl<T: ?Sized> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.lock.lock();
        let (locked, pid) = (self.locked.get(), self.pid.get());
        drop(guard);
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &locked)
            .field("pid", &pid)
            .finish()
    }
}

/// 睡眠锁守卫，离开作用域时自动释放锁并唤醒等待者
pub struct SleepLockGuard<'a, T: ?Sized, H: Hal> {
    lock: &'a SleepLock<T>,
    hal: &'a H,
    data: &'a mut T,
}

impl<'a, T: ?Sized, H: Hal> SleepLockGuard<'a, T, H> {
    /// 守卫对应的睡眠锁是否仍由当前进程持有
    pub fn holding(&self) -> bool {
        self.lock.holding(self.hal.pid())
    }
}

impl<'a, T: ?Sized, H: Hal> Deref for SleepLockGuard<'a, T, H> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized, H: Hal> DerefMut for SleepLockGuard<'a, T, H> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized, H: Hal> Drop for SleepLockGuard<'a, T, H> {
    fn drop(&mut self) {
        self.lock.unlock(self.hal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::HostHal;
    use crate::spinlock::SpinLockGuard;
    use std::collections::HashMap;
    use std::format;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};
    use std::thread;
    use std::time::Duration;
    use std::vec::Vec;

    /// 真正阻塞的睡眠/唤醒：`sleep` 一直等到同一通道上有 `wakeup` 才返回。
    ///
    /// 每个通道记录一个唤醒代数，`sleep` 在释放自旋锁之前读取代数，
    /// 因此释放之后的唤醒不会丢失。超时只作为兜底，被计入 `timeouts`。
    struct CondHal {
        host: HostHal,
        gens: Mutex<HashMap<usize, u64>>,
        cv: Condvar,
        woken: Mutex<Vec<usize>>,
        sleepers: AtomicUsize,
        timeouts: AtomicUsize,
    }

    const SLEEP_LIMIT: Duration = Duration::from_secs(2);

    impl CondHal {
        fn new() -> Self {
            Self {
                host: HostHal::new(),
                gens: Mutex::new(HashMap::new()),
                cv: Condvar::new(),
                woken: Mutex::new(Vec::new()),
                sleepers: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
            }
        }
    }

    impl Hal for CondHal {
        fn ticks(&self) -> u64 {
            0
        }

        fn pid(&self) -> usize {
            self.host.pid()
        }

        fn sleep<T: ?Sized>(&self, chan: usize, guard: SpinLockGuard<'_, T>) {
            let gens = self.gens.lock().unwrap();
            let gen = gens.get(&chan).copied().unwrap_or(0);
            self.sleepers.fetch_add(1, Ordering::SeqCst);
            drop(guard);
            let (gens, res) = self
                .cv
                .wait_timeout_while(gens, SLEEP_LIMIT, |gens| {
                    gens.get(&chan).copied().unwrap_or(0) == gen
                })
                .unwrap();
            if res.timed_out() {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
            drop(gens);
        }

        fn wakeup(&self, chan: usize) {
            let mut gens = self.gens.lock().unwrap();
            *gens.entry(chan).or_insert(0) += 1;
            self.woken.lock().unwrap().push(chan);
            self.cv.notify_all();
            drop(gens);
        }
    }

    #[test]
    fn test_holding() {
        let hal = HostHal::new();
        let lock = SleepLock::new(0u32, "holding");
        assert!(!lock.holding(hal.pid()));

        let guard = lock.lock(&hal);
        assert!(guard.holding());
        assert!(lock.holding(hal.pid()));
        assert!(!lock.holding(hal.pid() + 1));

        drop(guard);
        assert!(!lock.holding(hal.pid()));
    }

    #[test]
    fn test_holder_is_per_thread() {
        let hal = HostHal::new();
        let lock = SleepLock::new((), "per-thread");
        let guard = lock.lock(&hal);
        let seen_by_other = thread::scope(|s| s.spawn(|| lock.holding(hal.pid())).join().unwrap());
        assert!(!seen_by_other);
        drop(guard);
    }

    #[test]
    fn test_debug_shows_holder() {
        let hal = HostHal::new();
        let lock = SleepLock::new(0u8, "dbg");
        let guard = lock.lock(&hal);
        let shown = format!("{:?}", lock);
        assert!(shown.contains("\"dbg\""));
        assert!(shown.contains("locked: true"));
        drop(guard);
        assert!(format!("{:?}", lock).contains("pid: 0"));
    }

    #[test]
    fn test_mutual_exclusion() {
        let hal = HostHal::new();
        let lock = SleepLock::new(0usize, "counter");
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let mut guard = lock.lock(&hal);
                        let seen = *guard;
                        thread::yield_now();
                        *guard = seen + 1;
                    }
                });
            }
        });
        assert_eq!(*lock.lock(&hal), 800);
    }

    #[test]
    fn test_waiter_wakes_only_on_lock_chan() {
        let hal = CondHal::new();
        let lock = SleepLock::new(0u32, "waiter");
        let other = SleepLock::new(0u32, "other");
        let acquired = AtomicBool::new(false);

        let guard = lock.lock(&hal);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let mut g = lock.lock(&hal);
                *g += 1;
                acquired.store(true, Ordering::SeqCst);
            });

            while hal.sleepers.load(Ordering::SeqCst) != 1 {
                thread::yield_now();
            }
            // 其他通道上的唤醒不能让等待者拿到锁
            hal.wakeup(other.chan());
            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst));
            assert_eq!(hal.sleepers.load(Ordering::SeqCst), 1);

            drop(guard);
            waiter.join().unwrap();
        });

        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(*lock.lock(&hal), 1);
        assert_eq!(hal.timeouts.load(Ordering::SeqCst), 0);
        let chan = lock.locked.as_ptr() as usize;
        assert_eq!(lock.chan(), chan);
        assert!(hal.woken.lock().unwrap().contains(&chan));
    }

    #[test]
    fn test_mutual_exclusion_with_blocking_sleep() {
        let hal = CondHal::new();
        let lock = SleepLock::new(0usize, "counter");
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let mut guard = lock.lock(&hal);
                        let seen = *guard;
                        thread::yield_now();
                        *guard = seen + 1;
                    }
                });
            }
        });
        assert_eq!(*lock.lock(&hal), 800);
        // 每次等待都由释放锁时的唤醒结束，而不是靠超时
        assert_eq!(hal.timeouts.load(Ordering::SeqCst), 0);
    }
}
