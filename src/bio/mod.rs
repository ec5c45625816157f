//! 缓存层
//!
//! 缓冲区缓存保存磁盘块内容的副本。把磁盘块缓存在内存中可以减少磁盘读取，
//! 同时为多个进程使用同一磁盘块提供同步点。
//!
//! 接口：
//! * 通过 [`Bcache::bread`] 获取某个磁盘块的缓冲块；
//! * 修改数据后调用 [`Buf::bwrite`] 写回磁盘；
//! * 用完后调用 [`Buf::brelse`]，或让 [`Buf`] 离开作用域；
//! * 释放后不得再使用该缓冲块；
//! * 同一时刻只有一个进程能使用某个缓冲块，不要持有过久。
//!
//! 缓冲池按块号哈希分成若干个桶，每个桶各有一把自旋锁，
//! 不同桶上的操作互不干扰。桶内按最近最少使用（LRU）原则回收缓冲块。

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::{NBUCKETS, NBUF};
use crate::driver::BlockDriver;
use crate::error::{Error, ErrorKind, Result};
use crate::hal::Hal;

mod bucket;
mod buf;

pub use buf::{Buf, BufData};

use bucket::{lookup, Bucket, Lookup};
use buf::BufInner;

/// 缓冲池的几何参数，在初始化时确定，之后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcacheConfig {
    /// 哈希桶数量
    pub nbucket: usize,
    /// 每个桶中的缓冲块数量
    pub nbuf: usize,
}

impl BcacheConfig {
    /// 缓冲块总数，未经校验的过大配置饱和到 `usize::MAX`
    pub const fn capacity(&self) -> usize {
        self.nbucket.saturating_mul(self.nbuf)
    }

    fn validate(&self) -> Result<()> {
        if self.nbucket == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "nbucket must be non-zero"));
        }
        if self.nbuf == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "nbuf must be non-zero"));
        }
        if self.nbucket.checked_mul(self.nbuf).is_none() {
            return Err(Error::new(ErrorKind::InvalidConfig, "buffer pool too large"));
        }
        Ok(())
    }
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self { nbucket: NBUCKETS, nbuf: NBUF }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 查找时块已在缓存中的次数
    pub hits: usize,
    /// 查找时块不在缓存中、回收了一个缓冲块的次数
    pub misses: usize,
    /// 从设备读入的块数
    pub reads: usize,
    /// 写回设备的块数
    pub writes: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// 缓冲区缓存（Buffer Cache），块设备与文件系统之间的缓冲层。
///
/// `Bcache` 提供了一个固定大小的内存缓冲区池。缓冲块在构造时一次性分配到各个哈希桶中，
/// 之后只会被回收复用，不会再分配或释放。块 (dev, blockno) 只可能缓存在
/// `blockno % nbucket` 号桶中。
///
/// 由组装内核的一方构造并持有，以引用的形式交给文件系统、日志层等使用者。
///
/// # 锁顺序
/// 桶的自旋锁总是在获取缓冲块睡眠锁之前释放，二者从不同时持有；
/// 任何操作都不会同时持有两个桶锁。
pub struct Bcache<D: BlockDriver, H: Hal> {
    buckets: Box<[Bucket]>,
    config: BcacheConfig,
    driver: D,
    hal: H,
    counters: Counters,
}

impl<D: BlockDriver, H: Hal> Bcache<D, H> {
    /// 构造并初始化缓冲区缓存（对应 `binit`）。
    ///
    /// # 功能说明
    /// 按 `config` 分配全部哈希桶与缓冲块，初始化每个桶的自旋锁和每个缓冲块的睡眠锁。
    /// 所有缓冲块初始为未锁定、无效、引用计数为 0。
    /// 应在系统启动阶段调用一次，之后才能并发使用。
    ///
    /// # 参数
    /// - `config`: 缓冲池几何参数；
    /// - `driver`: 块设备驱动；
    /// - `hal`: 提供逻辑时钟与睡眠/唤醒的内核服务。
    ///
    /// # 可能的错误
    /// 桶数量或每桶缓冲块数量为 0 时返回 [`ErrorKind::InvalidConfig`]。
    pub fn new(config: BcacheConfig, driver: D, hal: H) -> Result<Self> {
        config.validate()?;
        let buckets: Vec<Bucket> = (0..config.nbucket).map(|_| Bucket::new(config.nbuf)).collect();
        log::info!(
            "bcache: {} buckets x {} buffers, {} buffers in total",
            config.nbucket,
            config.nbuf,
            config.capacity()
        );
        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            config,
            driver,
            hal,
            counters: Counters::default(),
        })
    }

    /// 缓冲池几何参数
    pub fn config(&self) -> BcacheConfig {
        self.config
    }

    /// 块设备驱动
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 内核服务
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// 返回一个已加锁、数据有效的缓冲块。
    ///
    /// # 流程解释
    /// 1. 通过 `bget` 找到或回收一个缓冲块并获取其睡眠锁；
    /// 2. 若数据无效，调用驱动从磁盘同步读入（可能睡眠），并置有效位。
    ///
    /// # 可能的错误
    /// 目标桶内所有缓冲块都被引用时 panic（`"bget: no buffers"`）。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, D, H> {
        let mut b = self.bget(dev, blockno);
        b.fill();
        b
    }

    /// 缓存中 (`dev`, `blockno`) 的引用计数，未缓存时返回 `None`
    pub fn refcnt(&self, dev: u32, blockno: u32) -> Option<usize> {
        let ctrl = self.bucket(blockno).lock();
        let refcnt = match lookup(&ctrl, dev, blockno) {
            Lookup::Hit(i) => Some(ctrl[i].refcnt),
            _ => None,
        };
        drop(ctrl);
        refcnt
    }

    /// (`dev`, `blockno`) 是否在缓存中
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        self.refcnt(dev, blockno).is_some()
    }

    /// 统计信息快照
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    /// 块号到桶下标的映射，在缓存生命周期内保持不变
    fn bucket_id(&self, blockno: u32) -> usize {
        blockno as usize % self.config.nbucket
    }

    fn bucket(&self, blockno: u32) -> &Bucket {
        &self.buckets[self.bucket_id(blockno)]
    }

    fn inner(&self, bucket: usize, index: usize) -> &BufInner {
        self.buckets[bucket].buf(index)
    }

    /// 在缓存中查找设备 `dev` 上的块 `blockno`。
    /// 若未找到则回收一个缓冲块。无论哪种情况，都返回已加锁的缓冲块。
    ///
    /// # 流程解释
    /// 1. 获取目标桶的自旋锁并扫描桶内缓冲块；
    /// 2. 命中：引用计数加一；
    /// 3. 未命中：回收时间戳最小的空闲缓冲块，改写身份、清有效位、
    ///    引用计数置 1 并记录当前时间；
    /// 4. 释放桶锁后再获取缓冲块的睡眠锁（可能睡眠）。
    ///
    /// 命中时数据有效性保持原样，由调用者检查。
    fn bget(&self, dev: u32, blockno: u32) -> Buf<'_, D, H> {
        let id = self.bucket_id(blockno);
        let bucket = &self.buckets[id];
        let mut ctrl = bucket.lock();

        let index = match lookup(&ctrl, dev, blockno) {
            Lookup::Hit(i) => {
                ctrl[i].refcnt += 1;
                drop(ctrl);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                log::trace!("bcache: hit dev {} block {}", dev, blockno);
                i
            }
            Lookup::Recycle(i) => {
                let b = &mut ctrl[i];
                let old = b.key;
                b.key = Some((dev, blockno));
                b.refcnt = 1;
                b.tstamp = self.hal.ticks();
                bucket.buf(i).valid.store(false, Ordering::Relaxed);
                drop(ctrl);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "bcache: miss dev {} block {}, recycle bucket {} slot {} (was {:?})",
                    dev, blockno, id, i, old
                );
                i
            }
            Lookup::Exhausted => {
                drop(ctrl);
                log::error!("bcache: bucket {} exhausted by dev {} block {}", id, dev, blockno);
                panic!("bget: no buffers");
            }
        };

        let data = bucket.buf(index).data.lock(&self.hal);
        Buf::new(self, id, index, dev, blockno, data)
    }

    /// 驱动读，调用者持有目标缓冲块的睡眠锁
    fn read_through(&self, dev: u32, blockno: u32, data: &mut BufData) {
        self.driver.rw(dev, blockno, data, false);
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// 驱动写，调用者持有目标缓冲块的睡眠锁
    fn write_through(&self, dev: u32, blockno: u32, data: &mut BufData) {
        self.driver.rw(dev, blockno, data, true);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// 睡眠锁已释放，在桶锁下归还引用并记录释放时间
    fn brelse(&self, bucket: usize, index: usize) {
        let mut ctrl = self.buckets[bucket].lock();
        let b = &mut ctrl[index];
        b.refcnt -= 1;
        b.tstamp = self.hal.ticks();
        drop(ctrl);
    }

    fn bpin(&self, bucket: usize, index: usize) {
        let mut ctrl = self.buckets[bucket].lock();
        ctrl[index].refcnt += 1;
        drop(ctrl);
    }

    fn bunpin(&self, bucket: usize, index: usize) {
        let mut ctrl = self.buckets[bucket].lock();
        let rc = ctrl[index].refcnt;
        if rc <= 1 {
            drop(ctrl);
            panic!("buf unpin not match");
        }
        ctrl[index].refcnt = rc - 1;
        drop(ctrl);
    }
}

impl<D: BlockDriver, H: Hal> fmt::Debug for Bcache<D, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bcache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
