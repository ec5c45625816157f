//! 块设备驱动接口，以及一个用于测试和早期启动的内存磁盘

use crate::bio::BufData;

mod ramdisk;

pub use ramdisk::RamDisk;

/// 块设备驱动
///
/// 缓存层通过该接口同步地在缓冲块与磁盘之间搬运一个块的数据。
/// 调用时缓存层持有该缓冲块的睡眠锁，且不持有任何自旋锁，
/// 因此实现可以睡眠等待设备完成。
///
/// 设备错误不在缓存层的处理范围内：实现应自行重试，或者直接 panic。
pub trait BlockDriver: Sync {
    /// 读写设备 `dev` 上的第 `blockno` 块
    ///
    /// # 参数
    /// - `data`: 缓冲块数据；读时被填充，写时作为数据源
    /// - `writing`: 操作类型（true=写，false=读）
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool);
}
