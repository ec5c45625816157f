//! 缓存层使用的常量

/// 单个磁盘块的大小（字节）
pub const BSIZE: usize = 1024;

/// 单次文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;

/// 每个哈希桶中缓冲块的数量
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// 哈希桶数量，取质数以使块号分布更均匀
pub const NBUCKETS: usize = 13;
