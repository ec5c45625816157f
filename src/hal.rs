//! 内核服务抽象
//!
//! 缓存层依赖内核提供的三类服务：逻辑时钟（为缓冲块打时间戳）、
//! 当前进程标识（睡眠锁的持有者检查）以及睡眠/唤醒（睡眠锁的等待）。
//! 这些服务通过 [`Hal`] 注入，由组装内核的一方实现。

use crate::spinlock::SpinLockGuard;

/// 缓存层所需的内核服务
///
/// # 睡眠语义
/// `sleep` 必须在进入睡眠的同时释放传入的自旋锁守卫，并保证
/// 释放守卫之后发生的 `wakeup(chan)` 不会丢失。实现可以有伪唤醒，
/// 调用者总会在醒来后重新检查等待条件。
pub trait Hal: Sync {
    /// 当前逻辑时钟，单调不减
    fn ticks(&self) -> u64;

    /// 当前执行流（进程）的标识
    fn pid(&self) -> usize;

    /// 在 `chan` 上睡眠，并原子地释放 `guard`
    fn sleep<T: ?Sized>(&self, chan: usize, guard: SpinLockGuard<'_, T>);

    /// 唤醒所有睡眠在 `chan` 上的执行流
    fn wakeup(&self, chan: usize);
}

#[cfg(any(test, feature = "std"))]
pub use host::HostHal;

#[cfg(any(test, feature = "std"))]
mod host {
    use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::thread;

    use super::Hal;
    use crate::spinlock::SpinLockGuard;

    static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

    std::thread_local! {
        static PID: usize = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    }

    /// 以宿主操作系统线程充当内核线程的 [`Hal`] 实现
    ///
    /// 每个线程拥有唯一的 pid；睡眠即释放守卫后让出处理器，
    /// 唤醒为空操作（等待方会轮询重新检查条件）。
    /// 逻辑时钟只在调用 [`HostHal::tick`] 时前进，便于测试构造确定的 LRU 顺序。
    #[derive(Debug, Default)]
    pub struct HostHal {
        ticks: AtomicU64,
    }

    impl HostHal {
        /// 创建时钟从 0 开始的实例
        pub const fn new() -> Self {
            Self { ticks: AtomicU64::new(0) }
        }

        /// 时钟前进一格，返回新的时间
        pub fn tick(&self) -> u64 {
            self.ticks.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    impl Hal for HostHal {
        fn ticks(&self) -> u64 {
            self.ticks.load(Ordering::Relaxed)
        }

        fn pid(&self) -> usize {
            PID.with(|pid| *pid)
        }

        fn sleep<T: ?Sized>(&self, _chan: usize, guard: SpinLockGuard<'_, T>) {
            drop(guard);
            thread::yield_now();
        }

        fn wakeup(&self, _chan: usize) {}
    }
}
