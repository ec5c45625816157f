//! xv6 风格的块缓存
//!
//! 介于块设备驱动与文件系统、日志层之间的缓冲区缓存：
//! 固定大小的缓冲池按块号哈希分桶，每个桶一把自旋锁保护簿记信息，
//! 每个缓冲块一把睡眠锁保护数据，桶内按 LRU 回收空闲缓冲块。
//!
//! # 示例
//!
//! ```rust,ignore
//! use xv6_bcache::{Bcache, BcacheConfig, HostHal, RamDisk};
//!
//! let cache = Bcache::new(BcacheConfig::default(), RamDisk::new(), HostHal::new())?;
//!
//! let mut buf = cache.bread(1, 42);
//! buf.data_mut()[0] = 0xff;
//! buf.bwrite();
//! buf.brelse();
//! ```
//!
//! # 模块结构
//!
//! - [`bio`] - 缓冲区缓存本身
//! - [`spinlock`] / [`sleeplock`] - 桶锁与缓冲块锁
//! - [`hal`] - 需要内核提供的服务（时钟、睡眠/唤醒）
//! - [`driver`] - 块设备驱动接口
//! - [`consts`] - 常量定义
//! - [`error`] - 错误类型定义

#![no_std]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod bio;
pub mod consts;
pub mod driver;
pub mod error;
pub mod hal;
pub mod sleeplock;
pub mod spinlock;

pub use bio::{Bcache, BcacheConfig, Buf, BufData, CacheStats};
pub use driver::{BlockDriver, RamDisk};
pub use error::{Error, ErrorKind, Result};
pub use hal::Hal;
#[cfg(any(test, feature = "std"))]
pub use hal::HostHal;
pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
