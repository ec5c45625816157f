//! 哈希桶：缓冲池的一个分片，以及在桶内查找/回收缓冲块的扫描算法

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::spinlock::{SpinLock, SpinLockGuard};

use super::buf::BufInner;

/// 缓冲块的簿记信息，只能在持有所属桶的自旋锁时读写
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct BufCtrl {
    /// 当前缓存的块 (设备号, 块号)，从未分配过时为 `None`
    pub(super) key: Option<(u32, u32)>,
    /// 持有者数量（含 pin）
    pub(super) refcnt: usize,
    /// 最近一次释放（或被回收）时的逻辑时间
    pub(super) tstamp: u64,
}

/// 桶内扫描的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Lookup {
    /// 块已缓存在该下标处
    Hit(usize),
    /// 块未缓存，该下标处的缓冲块可被回收
    Recycle(usize),
    /// 块未缓存，且桶内所有缓冲块都被引用
    Exhausted,
}

/// 在一个桶的簿记数组中查找 (`dev`, `blockno`)。
///
/// # 流程解释
/// 顺序扫描每个缓冲块：
/// - 身份匹配即命中，立即返回；
/// - 否则若引用计数为 0，则作为回收候选，保留时间戳最小的一个，
///   时间戳相同时保留扫描顺序中靠前的一个。
///
/// 本函数不修改任何状态，调用者据结果在同一临界区内更新簿记。
pub(super) fn lookup(ctrls: &[BufCtrl], dev: u32, blockno: u32) -> Lookup {
    let mut lru: Option<usize> = None;
    for (i, b) in ctrls.iter().enumerate() {
        if b.key == Some((dev, blockno)) {
            return Lookup::Hit(i);
        }
        if b.refcnt == 0 && lru.map_or(true, |l| ctrls[l].tstamp > b.tstamp) {
            lru = Some(i);
        }
    }
    match lru {
        Some(i) => Lookup::Recycle(i),
        None => Lookup::Exhausted,
    }
}

/// 哈希桶
///
/// 持有固定数量的缓冲块：簿记信息集中在 `ctrl` 中由一把自旋锁保护，
/// 数据在 `bufs` 中由各自的睡眠锁保护，二者按下标对应。
pub(super) struct Bucket {
    ctrl: SpinLock<Box<[BufCtrl]>>,
    bufs: Box<[BufInner]>,
}

impl Bucket {
    /// 创建含 `nbuf` 个未锁定、无效、引用计数为 0 的缓冲块的桶
    pub(super) fn new(nbuf: usize) -> Self {
        let ctrl: Vec<BufCtrl> = (0..nbuf).map(|_| BufCtrl::default()).collect();
        let bufs: Vec<BufInner> = (0..nbuf).map(|_| BufInner::new()).collect();
        Self {
            ctrl: SpinLock::new(ctrl.into_boxed_slice(), "bcache"),
            bufs: bufs.into_boxed_slice(),
        }
    }

    /// 获取桶锁
    pub(super) fn lock(&self) -> SpinLockGuard<'_, Box<[BufCtrl]>> {
        self.ctrl.lock()
    }

    /// 桶内第 `index` 个缓冲块的数据部分
    pub(super) fn buf(&self, index: usize) -> &BufInner {
        &self.bufs[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl(key: Option<(u32, u32)>, refcnt: usize, tstamp: u64) -> BufCtrl {
        BufCtrl { key, refcnt, tstamp }
    }

    #[test]
    fn test_lookup_hit() {
        let ctrls = [ctrl(Some((1, 0)), 0, 5), ctrl(Some((1, 13)), 2, 1)];
        assert_eq!(lookup(&ctrls, 1, 13), Lookup::Hit(1));
        // 设备号不同即不同的块
        assert_eq!(lookup(&ctrls, 2, 13), Lookup::Recycle(0));
    }

    #[test]
    fn test_lookup_picks_least_recent() {
        let ctrls = [
            ctrl(Some((1, 0)), 0, 7),
            ctrl(Some((1, 13)), 0, 3),
            ctrl(Some((1, 26)), 0, 9),
        ];
        assert_eq!(lookup(&ctrls, 1, 39), Lookup::Recycle(1));
    }

    #[test]
    fn test_lookup_skips_referenced() {
        let ctrls = [
            ctrl(Some((1, 0)), 1, 1),
            ctrl(Some((1, 13)), 0, 8),
            ctrl(Some((1, 26)), 3, 2),
        ];
        assert_eq!(lookup(&ctrls, 1, 39), Lookup::Recycle(1));
    }

    #[test]
    fn test_lookup_tie_goes_to_first() {
        let ctrls = [
            ctrl(Some((1, 0)), 1, 4),
            ctrl(Some((1, 13)), 0, 4),
            ctrl(Some((1, 26)), 0, 4),
        ];
        assert_eq!(lookup(&ctrls, 1, 39), Lookup::Recycle(1));
    }

    #[test]
    fn test_lookup_unassigned_never_hits() {
        let ctrls = [BufCtrl::default(); 2];
        assert_eq!(lookup(&ctrls, 0, 0), Lookup::Recycle(0));
    }

    #[test]
    fn test_lookup_exhausted() {
        let ctrls = [ctrl(Some((1, 0)), 1, 0), ctrl(Some((1, 13)), 2, 0)];
        assert_eq!(lookup(&ctrls, 1, 26), Lookup::Exhausted);
        // 已缓存的块即使全部被引用也能命中
        assert_eq!(lookup(&ctrls, 1, 13), Lookup::Hit(1));
    }

    #[test]
    fn test_new_bucket_is_empty() {
        let bucket = Bucket::new(3);
        let ctrls = bucket.lock();
        assert_eq!(ctrls.len(), 3);
        assert!(ctrls.iter().all(|b| b.key.is_none() && b.refcnt == 0 && b.tstamp == 0));
        drop(ctrls);
        assert!(!bucket.buf(2).valid.load(core::sync::atomic::Ordering::Relaxed));
    }
}
