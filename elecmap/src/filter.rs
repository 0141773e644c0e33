//! 候选电极离群点过滤.
//!
//! 候选按照连通域大小降序依次判定, 每一步:
//!
//! 1. 计算候选体素坐标到所有已接受电极的最近距离 (并行);
//! 2. 若最近距离严格小于阈值, 判定为重复;
//! 3. 否则若候选在包围盒以外, 判定为越界;
//! 4. 否则接受.
//!
//! 重复判定优先于越界判定. 该过程是顺序相关的贪心过程, 较大的连通域优先占据位置.

use crate::geometry::{self, Nearest};
use crate::segment::Candidate;
use crate::{Idx3d, VoxCoord};

/// 体素空间中的轴对齐包围盒, 各轴均为闭区间, 按 `[x, y, z]` 排列.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VoxelBox {
    /// 各轴下界.
    pub lower: VoxCoord,

    /// 各轴上界.
    pub upper: VoxCoord,
}

impl VoxelBox {
    /// 由体数据形状 (z, y, x) 和边缘比例 `margin` 构造包围盒.
    ///
    /// 每个轴的范围为 `[round(size * margin), round(size * (1 - margin))]`,
    /// 恰好位于中点时向偶数舍入.
    pub fn from_margin(shape: Idx3d, margin: f64) -> Self {
        let (z, y, x) = shape;
        let sizes = [x, y, z].map(|s| s as f64);
        Self {
            lower: sizes.map(|s| (s * margin).round_ties_even() as i64),
            upper: sizes.map(|s| (s * (1.0 - margin)).round_ties_even() as i64),
        }
    }

    /// `voxel` 是否在包围盒内 (含边界)?
    #[inline]
    pub fn contains(&self, voxel: &VoxCoord) -> bool {
        (0..3).all(|k| self.lower[k] <= voxel[k] && voxel[k] <= self.upper[k])
    }
}

/// 单个候选电极的判定结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Verdict {
    /// 接受.
    Accepted,

    /// 与已接受的电极距离过近.
    Duplicate(Nearest<VoxCoord>),

    /// 位于包围盒以外.
    OutOfBounds,
}

/// 过滤结果.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOutcome {
    /// 按接受顺序排列的电极.
    pub accepted: Vec<Candidate>,

    /// 被判定为重复的候选个数.
    pub duplicates: usize,

    /// 被判定为越界的候选个数.
    pub out_of_bounds: usize,
}

impl FilterOutcome {
    /// 被剔除的候选总数.
    #[inline]
    pub fn rejected(&self) -> usize {
        self.duplicates + self.out_of_bounds
    }

    /// 是否没有任何电极被接受?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

type NearestFn = fn(&VoxCoord, &[VoxCoord]) -> Option<Nearest<VoxCoord>>;

/// 基于距离阈值和包围盒的贪心离群点过滤器.
#[derive(Copy, Clone, Debug)]
pub struct OutlierFilter {
    bounds: VoxelBox,
    distance_threshold: f64,
}

impl OutlierFilter {
    /// 构造过滤器. `distance_threshold` 以体素为单位.
    pub fn new(bounds: VoxelBox, distance_threshold: f64) -> Self {
        Self {
            bounds,
            distance_threshold,
        }
    }

    /// 包围盒.
    #[inline]
    pub fn bounds(&self) -> &VoxelBox {
        &self.bounds
    }

    /// 根据已接受电极的体素坐标 `accepted`, 判定单个候选.
    pub fn judge(&self, candidate: &Candidate, accepted: &[VoxCoord]) -> Verdict {
        self.judge_by(candidate, accepted, default_nearest())
    }

    fn judge_by(&self, candidate: &Candidate, accepted: &[VoxCoord], find: NearestFn) -> Verdict {
        match find(&candidate.voxel, accepted) {
            Some(n) if n.distance < self.distance_threshold => Verdict::Duplicate(n),
            _ if !self.bounds.contains(&candidate.voxel) => Verdict::OutOfBounds,
            _ => Verdict::Accepted,
        }
    }

    /// 按输入顺序依次判定所有候选, 返回过滤结果.
    ///
    /// 启用 `rayon` 时, 每个候选的最近邻计算在线程池中并行完成,
    /// 全部完成后才判定下一个候选, 结果与顺序计算完全一致.
    pub fn run<I: IntoIterator<Item = Candidate>>(&self, candidates: I) -> FilterOutcome {
        self.run_by(candidates, default_nearest())
    }

    fn run_by<I: IntoIterator<Item = Candidate>>(&self, candidates: I, find: NearestFn) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut voxels: Vec<VoxCoord> = Vec::new();

        for c in candidates {
            match self.judge_by(&c, &voxels, find) {
                Verdict::Duplicate(n) => {
                    outcome.duplicates += 1;
                    log::debug!(
                        "Duplicate electrode {}: physical = {:?}, voxel = {:?}, nearest voxel = {:?}",
                        outcome.duplicates,
                        c.physical,
                        c.voxel,
                        n.point
                    );
                }
                Verdict::OutOfBounds => {
                    outcome.out_of_bounds += 1;
                    log::debug!(
                        "Electrode outside margin {}: physical = {:?}, voxel = {:?}",
                        outcome.out_of_bounds,
                        c.physical,
                        c.voxel
                    );
                }
                Verdict::Accepted => {
                    voxels.push(c.voxel);
                    outcome.accepted.push(c);
                }
            }
        }

        log::info!(
            "Final electrode count after eliminating {} potential outliers: {}",
            outcome.rejected(),
            outcome.accepted.len()
        );
        outcome
    }
}

/// 默认的最近邻实现: 启用 `rayon` 时并行, 否则顺序.
#[inline]
fn default_nearest() -> NearestFn {
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            geometry::par_nearest::<VoxCoord>
        } else {
            geometry::nearest::<VoxCoord>
        }
    }
}
