//! 内存磁盘
//!
//! 以稀疏映射保存块内容，未写过的块读出全零。
//! 记录读写次数，便于观察缓存是否真的访问了设备。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::BlockDriver;
use crate::bio::BufData;
use crate::consts::BSIZE;
use crate::spinlock::SpinLock;

/// 基于内存的块设备，可同时承载多个设备号
pub struct RamDisk {
    blocks: SpinLock<BTreeMap<(u32, u32), Box<[u8; BSIZE]>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// 创建空磁盘
    pub const fn new() -> Self {
        Self {
            blocks: SpinLock::new(BTreeMap::new(), "ramdisk"),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 直接设置某块的内容（不计入写次数），不足一块的部分补零
    pub fn fill(&self, dev: u32, blockno: u32, bytes: &[u8]) {
        let mut block = Box::new([0u8; BSIZE]);
        let len = bytes.len().min(BSIZE);
        block[..len].copy_from_slice(&bytes[..len]);
        self.blocks.lock().insert((dev, blockno), block);
    }

    /// 读取某块当前在“盘上”的内容（不计入读次数）
    pub fn peek(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        match self.blocks.lock().get(&(dev, blockno)) {
            Some(block) => **block,
            None => [0; BSIZE],
        }
    }

    /// 设备读次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备写次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDriver for RamDisk {
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool) {
        let mut blocks = self.blocks.lock();
        if writing {
            self.writes.fetch_add(1, Ordering::Relaxed);
            match blocks.get_mut(&(dev, blockno)) {
                Some(block) => block.copy_from_slice(&data[..]),
                None => {
                    let mut block = Box::new([0u8; BSIZE]);
                    block.copy_from_slice(&data[..]);
                    blocks.insert((dev, blockno), block);
                }
            }
        } else {
            self.reads.fetch_add(1, Ordering::Relaxed);
            match blocks.get(&(dev, blockno)) {
                Some(block) => data.copy_from_slice(&block[..]),
                None => data.fill(0),
            }
        }
        drop(blocks);
    }
}
