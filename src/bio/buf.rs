//! 缓冲块：数据、有效位与交给调用者的加锁句柄

use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::consts::BSIZE;
use crate::driver::BlockDriver;
use crate::hal::Hal;
use crate::sleeplock::{SleepLock, SleepLockGuard};

use super::Bcache;

/// 一个磁盘块大小的数据区
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    /// 全零数据块
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// 缓冲块的数据部分
///
/// 块身份、引用计数与时间戳等元数据放在所属哈希桶的 [`BufCtrl`](super::bucket::BufCtrl) 中，
/// 由桶的自旋锁保护；数据由本结构的睡眠锁保护，二者按下标一一对应。
pub(super) struct BufInner {
    /// 数据是否反映磁盘上的内容。
    ///
    /// 只在两种情况下写入：`bget` 回收缓冲块时在桶锁下清零，
    /// `bread` 在持有睡眠锁时从磁盘读入后置位。
    pub(super) valid: AtomicBool,

    pub(super) data: SleepLock<BufData>,
}

impl BufInner {
    pub(super) const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// 已加锁的缓冲块句柄，由 [`Bcache::bread`] 返回
///
/// 持有 `Buf` 即持有该缓冲块的睡眠锁，只有它能访问块数据。
/// `Buf` 离开作用域（或调用 [`Buf::brelse`]）时先释放睡眠锁，
/// 再在桶锁下减少引用计数并记录释放时间。
///
/// ```
/// use xv6_bcache::{Bcache, BlockDriver, Hal};
///
/// fn update<D: BlockDriver, H: Hal>(cache: &Bcache<D, H>) {
///     let mut b = cache.bread(1, 0);
///     b.data_mut()[0] = 1;
///     b.bwrite();
///     b.brelse();
/// }
/// ```
///
/// 锁纪律由类型检查：释放之后不能再写回。
///
/// ```compile_fail
/// use xv6_bcache::{Bcache, BlockDriver, Hal};
///
/// fn update<D: BlockDriver, H: Hal>(cache: &Bcache<D, H>) {
///     let mut b = cache.bread(1, 0);
///     b.brelse();
///     b.bwrite();
/// }
/// ```
///
/// 块数据的借用不能比句柄活得更久。
///
/// ```compile_fail
/// use xv6_bcache::{Bcache, BlockDriver, Hal};
///
/// fn peek<D: BlockDriver, H: Hal>(cache: &Bcache<D, H>) -> u8 {
///     let data = {
///         let b = cache.bread(1, 0);
///         b.data()
///     };
///     data[0]
/// }
/// ```
///
/// `Buf` 不能跨线程移动：睡眠锁记录了持有者的 pid，必须由获取它的执行流释放。
///
/// ```compile_fail
/// use xv6_bcache::{Bcache, BlockDriver, Hal};
///
/// fn assert_send<T: Send>(_: T) {}
///
/// fn hand_off<D: BlockDriver, H: Hal>(cache: &Bcache<D, H>) {
///     assert_send(cache.bread(1, 0));
/// }
/// ```
pub struct Buf<'a, D: BlockDriver, H: Hal> {
    cache: &'a Bcache<D, H>,
    /// 所在哈希桶下标
    bucket: usize,
    /// 桶内下标
    index: usize,
    dev: u32,
    blockno: u32,
    /// 只在 `Drop` 中取出，此前总是 `Some`
    data: Option<SleepLockGuard<'a, BufData, H>>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, D: BlockDriver, H: Hal> Buf<'a, D, H> {
    pub(super) fn new(
        cache: &'a Bcache<D, H>,
        bucket: usize,
        index: usize,
        dev: u32,
        blockno: u32,
        data: SleepLockGuard<'a, BufData, H>,
    ) -> Self {
        Self {
            cache,
            bucket,
            index,
            dev,
            blockno,
            data: Some(data),
            _not_send: PhantomData,
        }
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    /// 块数据
    pub fn data(&self) -> &[u8; BSIZE] {
        self.data.as_ref().unwrap()
    }

    /// 可变块数据，修改后需调用 [`Buf::bwrite`] 才会落盘
    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        self.data.as_mut().unwrap()
    }

    /// 数据是否已经从磁盘读入
    pub fn is_valid(&self) -> bool {
        self.cache.inner(self.bucket, self.index).valid.load(Ordering::Relaxed)
    }

    /// 将数据写回磁盘。
    ///
    /// # 功能说明
    /// 同步调用块设备驱动，把当前数据写到 (`dev`, `blockno`)。
    /// 写入期间一直持有睡眠锁，调用者可能在驱动中睡眠。
    ///
    /// 持有 `&mut Buf` 就意味着持有睡眠锁，调试构建中再检查一次持有者（`"bwrite"`）。
    pub fn bwrite(&mut self) {
        let guard = self.data.as_mut().unwrap();
        debug_assert!(guard.holding(), "bwrite");
        self.cache.write_through(self.dev, self.blockno, guard);
    }

    /// 从磁盘读入数据并置有效位，已有效时什么都不做
    pub(super) fn fill(&mut self) {
        let cache = self.cache;
        let inner = cache.inner(self.bucket, self.index);
        if !inner.valid.load(Ordering::Relaxed) {
            cache.read_through(self.dev, self.blockno, self.data.as_mut().unwrap());
            inner.valid.store(true, Ordering::Relaxed);
        }
    }

    /// 增加引用计数，使该块在释放后仍不会被回收。
    ///
    /// 用于日志层等需要跨越多次 `bread`/`brelse` 保持块常驻的场景，
    /// 之后必须以 [`Buf::unpin`] 配对。
    pub fn pin(&self) {
        self.cache.bpin(self.bucket, self.index);
    }

    /// 撤销一次 [`Buf::pin`]。
    ///
    /// # 可能的错误
    /// 调用者自身持有一个引用，若撤销后引用计数将小于 1，说明 pin/unpin
    /// 不配对，直接 panic（`"buf unpin not match"`）。
    pub fn unpin(&self) {
        self.cache.bunpin(self.bucket, self.index);
    }

    /// 释放缓冲块，之后不得再使用
    pub fn brelse(self) {
        drop(self);
    }
}

impl<'a, D: BlockDriver, H: Hal> Drop for Buf<'a, D, H> {
    fn drop(&mut self) {
        // `Buf` 不能跨线程移动，持有者只可能是当前进程
        debug_assert!(self.data.as_ref().map_or(false, |g| g.holding()), "brelse");
        drop(self.data.take());
        self.cache.brelse(self.bucket, self.index);
    }
}
