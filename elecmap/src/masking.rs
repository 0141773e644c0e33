//! 以 (膨胀后的) 脑掩膜遮挡强度体.
//!
//! 脑掩膜来自外部的去颅骨工具. 工具不可用或失败时, 使用 [`BrainMask::Unavailable`]
//! 表示降级模式, 此时强度体原样通过.

use ndarray::{Array3, ArrayViewMut1, Axis, Zip};
use thiserror::Error;

use crate::volume::{BinaryMask, Volume};
use crate::Idx3d;

/// 掩膜操作错误.
#[derive(Debug, Error)]
pub enum MaskError {
    /// 掩膜形状与强度体形状不一致.
    #[error("mask shape {mask:?} does not match volume shape {volume:?}")]
    ShapeMismatch {
        /// 强度体形状 (z, y, x).
        volume: Idx3d,

        /// 掩膜形状 (z, y, x).
        mask: Idx3d,
    },
}

/// 脑掩膜的可用状态.
#[derive(Debug, Clone)]
pub enum BrainMask {
    /// 去颅骨成功, 掩膜可用.
    Available(BinaryMask),

    /// 去颅骨被跳过或失败. 后续检测将在未遮挡的完整体数据上进行.
    Unavailable,
}

impl BrainMask {
    /// 掩膜是否可用?
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// 以半径为 `radius` 个体素的球形结构元对 `mask` 做各向同性膨胀.
///
/// 偏移 `d` 属于结构元当且仅当 `|d| <= radius + 0.5`, 即直径为 `2 * radius + 1` 个体素的
/// 实心球 (与 ITK 的 `FlatStructuringElement::Ball` 一致). 半径为 1 时结构元包含 19 个体素.
/// 内部通过可分离的平方欧氏距离变换精确实现, 开销与半径无关.
pub fn dilate(mask: &BinaryMask, radius: usize) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    let mut dist = mask
        .data()
        .mapv(|v| if v { 0.0 } else { f64::INFINITY });
    for axis in 0..3 {
        distance_transform_along(&mut dist, Axis(axis));
    }
    let r = radius as f64 + 0.5;
    let r2 = r * r;
    BinaryMask::from_array(dist.mapv(|d| d <= r2))
}

/// 沿 `axis` 方向对每一条 lane 做一维平方距离变换.
fn distance_transform_along(dist: &mut Array3<f64>, axis: Axis) {
    let run = |mut lane: ArrayViewMut1<f64>| {
        let f = lane.to_vec();
        let mut out = vec![0.0; f.len()];
        squared_distance_1d(&f, &mut out);
        lane.iter_mut().zip(out).for_each(|(w, r)| *w = r);
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(dist.lanes_mut(axis)).par_for_each(run);
        } else {
            Zip::from(dist.lanes_mut(axis)).for_each(run);
        }
    }
}

/// 一维平方距离变换 (抛物线下包络): `out[x] = min_q ((x - q)^2 + f[q])`.
///
/// `f` 中的非有限值视为 "无穷远", 不参与包络构造.
fn squared_distance_1d(f: &[f64], out: &mut [f64]) {
    let n = f.len();
    // 包络中的抛物线顶点, 以及每段抛物线的左边界.
    let mut v: Vec<usize> = Vec::with_capacity(n);
    let mut z: Vec<f64> = Vec::with_capacity(n + 1);

    for q in (0..n).filter(|&q| f[q].is_finite()) {
        let fq = f[q] + (q * q) as f64;
        let mut s = f64::NEG_INFINITY;
        loop {
            let (Some(&p), Some(&zp)) = (v.last(), z.last()) else {
                break;
            };
            let fp = f[p] + (p * p) as f64;
            s = (fq - fp) / (2.0 * (q - p) as f64);
            if s <= zp {
                v.pop();
                z.pop();
                s = f64::NEG_INFINITY;
            } else {
                break;
            }
        }
        v.push(q);
        z.push(s);
    }

    if v.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }
    z.push(f64::INFINITY);

    let mut k = 0usize;
    for (x, o) in out.iter_mut().enumerate() {
        while z[k + 1] < x as f64 {
            k += 1;
        }
        let d = x.abs_diff(v[k]) as f64;
        *o = d * d + f[v[k]];
    }
}

/// 对强度体施加脑掩膜.
///
/// 若掩膜可用, 先将其膨胀 `dilate_n_voxels` 个体素, 转换为强度体的采样类型 (`1.0` / `0.0`),
/// 再与强度体逐元素相乘, 即置零膨胀掩膜以外的所有体素. 若掩膜不可用, 原样返回强度体.
///
/// 返回的强度体与输入具有相同的形状与仿射变换.
pub fn apply_brain_mask(
    mut volume: Volume,
    mask: &BrainMask,
    dilate_n_voxels: usize,
) -> Result<Volume, MaskError> {
    let BrainMask::Available(mask) = mask else {
        return Ok(volume);
    };
    if mask.shape() != volume.shape() {
        return Err(MaskError::ShapeMismatch {
            volume: volume.shape(),
            mask: mask.shape(),
        });
    }

    let dilated = dilate(mask, dilate_n_voxels);
    log::debug!(
        "Brain mask dilated by {dilate_n_voxels} voxels: {} -> {} voxels",
        mask.count(),
        dilated.count()
    );
    Zip::from(volume.data_mut())
        .and(dilated.data())
        .for_each(|v, &m| *v *= if m { 1.0 } else { 0.0 });
    Ok(volume)
}
