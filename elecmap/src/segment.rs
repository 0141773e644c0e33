//! 阈值分割, 三维连通域标记与候选电极提取.
//!
//! 连通域按体素个数降序重新编号: 标签 1 是最大的连通域. 该顺序是后续离群点过滤的前提,
//! 较大的连通域更可能是真实的电极触点, 因此先参与判定.

use std::cmp::Reverse;
use std::collections::VecDeque;

use itertools::iproduct;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::consts::CENTROID_DECIMALS;
use crate::geometry::{round_to, Affine};
use crate::volume::{BinaryMask, Volume};
use crate::{Idx3d, PhysCoord, VoxCoord};

/// 三维邻接规则.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// 共面邻接, 6-邻域.
    #[default]
    Face,

    /// 共棱邻接, 18-邻域.
    Edge,

    /// 共顶点邻接, 26-邻域.
    Vertex,
}

impl Connectivity {
    /// 邻居偏移量 `[dz, dy, dx]`.
    pub fn offsets(&self) -> Vec<[i64; 3]> {
        let max_nonzero = match self {
            Self::Face => 1,
            Self::Edge => 2,
            Self::Vertex => 3,
        };
        iproduct!(-1i64..=1, -1i64..=1, -1i64..=1)
            .map(|(dz, dy, dx)| [dz, dy, dx])
            .filter(|d| (1..=max_nonzero).contains(&d.iter().filter(|&&c| c != 0).count()))
            .collect()
    }
}

/// 由单个连通域得到的候选电极.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Candidate {
    /// 连通域标签 (按大小降序, 从 1 开始).
    pub label: u32,

    /// 连通域体素个数.
    pub size: usize,

    /// 质心物理坐标 `[x, y, z]` (毫米), 保留两位小数.
    pub physical: PhysCoord,

    /// 质心所在的体素坐标 `[x, y, z]`.
    pub voxel: VoxCoord,
}

/// 二值阈值分割: 强度位于闭区间 `[lower, upper]` 内的体素为前景.
pub fn threshold(volume: &Volume, lower: f32, upper: f32) -> BinaryMask {
    BinaryMask::from_array(volume.data().mapv(|v| lower <= v && v <= upper))
}

/// 连通域标记结果.
///
/// 背景为 0, 前景连通域的标签为 `1..=K`, 按体素个数降序排列.
/// 体素个数相同的连通域按照行优先扫描时首次遇到的顺序排列.
#[derive(Debug, Clone)]
pub struct LabeledVolume {
    labels: Array3<u32>,

    /// `sizes[i]` 为标签 `i + 1` 的体素个数.
    sizes: Vec<usize>,

    /// `sums[i]` 为标签 `i + 1` 所有体素索引 `[x, y, z]` 之和.
    sums: Vec<[f64; 3]>,
}

impl LabeledVolume {
    /// 在 `foreground` 上按照 `connectivity` 标记连通域.
    pub fn label(foreground: &BinaryMask, connectivity: Connectivity) -> Self {
        let (labels, sizes, sums) = label_components(foreground.data(), connectivity);
        let mut this = Self {
            labels,
            sizes,
            sums,
        };
        this.relabel_by_size();
        this
    }

    /// 按体素个数降序重新编号. 排序是稳定的.
    fn relabel_by_size(&mut self) {
        let mut order: Vec<usize> = (0..self.sizes.len()).collect();
        order.sort_by_key(|&i| Reverse(self.sizes[i]));

        // 旧标签 (从 1 开始) -> 新标签.
        let mut remap = vec![0u32; self.sizes.len() + 1];
        for (new, &old) in order.iter().enumerate() {
            remap[old + 1] = new as u32 + 1;
        }
        self.labels.mapv_inplace(|l| remap[l as usize]);
        self.sizes = order.iter().map(|&i| self.sizes[i]).collect();
        self.sums = order.iter().map(|&i| self.sums[i]).collect();
    }

    /// 获得标签数据的一份不可变 shallow copy.
    #[inline]
    pub fn labels(&self) -> ArrayView3<'_, u32> {
        self.labels.view()
    }

    /// 连通域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否没有任何连通域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// 各连通域体素个数. 第 `i` 个元素对应标签 `i + 1`.
    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// 标签 `label` 的平均体素索引 `[x, y, z]`. 标签不存在时返回 `None`.
    pub fn mean_index(&self, label: u32) -> Option<[f64; 3]> {
        let i = (label as usize).checked_sub(1)?;
        let size = *self.sizes.get(i)? as f64;
        Some(self.sums[i].map(|s| s / size))
    }

    /// 按标签顺序为每个连通域生成一个候选电极.
    ///
    /// 质心先由平均体素索引变换到物理空间并保留两位小数, 再变换回最近的体素索引.
    pub fn candidates(&self, affine: &Affine) -> Vec<Candidate> {
        (1..=self.len() as u32)
            .filter_map(|label| {
                let mean = self.mean_index(label)?;
                let physical = affine.index_to_physical(mean).map(|v| round_to(v, CENTROID_DECIMALS));
                Some(Candidate {
                    label,
                    size: self.sizes[label as usize - 1],
                    physical,
                    voxel: affine.physical_to_index(physical),
                })
            })
            .collect()
    }
}

/// 以行优先顺序扫描, 用 BFS 标记所有连通域.
///
/// 返回值依次为: 标签体 (按发现顺序编号), 各连通域体素个数, 各连通域体素索引之和.
fn label_components(
    fg: ArrayView3<bool>,
    connectivity: Connectivity,
) -> (Array3<u32>, Vec<usize>, Vec<[f64; 3]>) {
    let (zl, yl, xl) = fg.dim();
    let offsets = connectivity.offsets();
    let mut labels = Array3::<u32>::zeros(fg.dim());
    let mut sizes = Vec::new();
    let mut sums = Vec::new();
    let mut bfs_q: VecDeque<Idx3d> = VecDeque::with_capacity(64);

    let neighbour = |(z, y, x): Idx3d, [dz, dy, dx]: [i64; 3]| -> Option<Idx3d> {
        let nz = usize::try_from(z as i64 + dz).ok().filter(|&v| v < zl)?;
        let ny = usize::try_from(y as i64 + dy).ok().filter(|&v| v < yl)?;
        let nx = usize::try_from(x as i64 + dx).ok().filter(|&v| v < xl)?;
        Some((nz, ny, nx))
    };

    for (pos, &is_fg) in fg.indexed_iter() {
        if !is_fg || labels[pos] != 0 {
            continue;
        }
        let cur_label = sizes.len() as u32 + 1;
        let mut size = 0usize;
        let mut sum = [0.0f64; 3];

        labels[pos] = cur_label;
        bfs_q.push_back(pos);
        while let Some(cur) = bfs_q.pop_front() {
            size += 1;
            let (z, y, x) = cur;
            sum[0] += x as f64;
            sum[1] += y as f64;
            sum[2] += z as f64;

            for off in offsets.iter() {
                let Some(n) = neighbour(cur, *off) else {
                    continue;
                };
                if fg[n] && labels[n] == 0 {
                    labels[n] = cur_label;
                    bfs_q.push_back(n);
                }
            }
        }
        sizes.push(size);
        sums.push(sum);
    }
    (labels, sizes, sums)
}

/// 从 (已遮挡的) 强度体中提取候选电极.
///
/// 强度位于 `[cutoff, upper]` 内的体素为前景, 按 `connectivity` 标记连通域后,
/// 按体素个数降序为每个连通域输出一个候选. 此阶段不丢弃任何候选.
pub fn extract_candidates(
    masked: &Volume,
    cutoff: f32,
    upper: f32,
    connectivity: Connectivity,
) -> Vec<Candidate> {
    let fg = threshold(masked, cutoff, upper);
    let labeled = LabeledVolume::label(&fg, connectivity);
    log::info!(
        "Detected total number of potential electrodes: {}",
        labeled.len()
    );
    labeled.candidates(masked.affine())
}
