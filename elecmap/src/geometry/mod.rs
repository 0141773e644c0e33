//! 三维几何运算.
//!
//! 包括欧氏距离, 最近邻查询, 以及体素坐标与物理坐标之间的仿射变换.
//! 所有点都以 `[x, y, z]` 的顺序表示, 调用者负责保证不混用体素空间和物理空间.

mod affine;

pub use affine::Affine;

use ordered_float::OrderedFloat;

#[cfg(feature = "rayon")]
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

/// 可以参与距离计算的三维点.
pub trait Point3: Copy {
    /// 以 `f64` 形式获取三个分量.
    fn to_f64(&self) -> [f64; 3];
}

impl Point3 for [f64; 3] {
    #[inline]
    fn to_f64(&self) -> [f64; 3] {
        *self
    }
}

impl Point3 for [i64; 3] {
    #[inline]
    fn to_f64(&self) -> [f64; 3] {
        self.map(|v| v as f64)
    }
}

/// 最近邻查询结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Nearest<P> {
    /// 到最近点的欧氏距离.
    pub distance: f64,

    /// 最近点在候选集合中的下标.
    pub index: usize,

    /// 最近点本身.
    pub point: P,
}

/// 两个三维点之间的欧氏距离.
#[inline]
pub fn distance<P: Point3>(p1: &P, p2: &P) -> f64 {
    let (a, b) = (p1.to_f64(), p2.to_f64());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// 在 `candidates` 中查找距离 `point` 最近的点.
///
/// 若 `candidates` 为空则返回 `None`. 距离相同时取下标最小 (最先出现) 的点.
pub fn nearest<P: Point3>(point: &P, candidates: &[P]) -> Option<Nearest<P>> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, c)| (distance(point, c), index))
        .min_by_key(|&(d, index)| (OrderedFloat(d), index))
        .map(|(distance, index)| Nearest {
            distance,
            index,
            point: candidates[index],
        })
}

/// 借助 `rayon`, 并行地在 `candidates` 中查找距离 `point` 最近的点.
///
/// 语义与 [`nearest`] 完全一致 (包括平局时的取舍), 调用返回时所有距离计算均已完成.
#[cfg(feature = "rayon")]
pub fn par_nearest<P: Point3 + Send + Sync>(point: &P, candidates: &[P]) -> Option<Nearest<P>> {
    candidates
        .par_iter()
        .enumerate()
        .map(|(index, c)| (distance(point, c), index))
        .min_by_key(|&(d, index)| (OrderedFloat(d), index))
        .map(|(distance, index)| Nearest {
            distance,
            index,
            point: candidates[index],
        })
}

/// 将 `value` 舍入到小数点后 `decimals` 位.
///
/// 按 `value` 的精确十进制展开舍入, 而不是先乘以 `10^decimals`. 例如 `2.675`
/// 的实际值略小于 2.675, 因此舍入为 `2.67`.
pub fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_distance_basic() {
        assert!(f64_eq(distance(&[0i64, 0, 0], &[3, 4, 0]), 5.0));
        assert!(f64_eq(distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0));
        assert!(f64_eq(distance(&[-1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), 2.0));
    }

    #[test]
    fn test_nearest_empty() {
        let empty: [[i64; 3]; 0] = [];
        assert_eq!(nearest(&[1, 2, 3], &empty), None);
    }

    /// 距离相同时, 应当返回最先出现的点.
    #[test]
    fn test_nearest_tie_first_wins() {
        let set = [[10i64, 0, 0], [2, 0, 0], [-2, 0, 0], [0, 2, 0]];
        let n = nearest(&[0, 0, 0], &set).unwrap();
        assert_eq!(n.index, 1);
        assert_eq!(n.point, [2, 0, 0]);
        assert!(f64_eq(n.distance, 2.0));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_nearest_agrees_with_sequential() {
        let set: Vec<[i64; 3]> = (0..500)
            .map(|i| [(i * 7919) % 101, (i * 104_729) % 53, (i * 31) % 17])
            .collect();
        for probe in [[0i64, 0, 0], [50, 25, 8], [100, 52, 16], [13, 13, 13]] {
            assert_eq!(nearest(&probe, &set), par_nearest(&probe, &set));
        }
        assert_eq!(par_nearest(&[0i64, 0, 0], &[]), None);
    }

    #[test]
    fn test_round_to() {
        assert!(f64_eq(round_to(1.234_567, 2), 1.23));
        assert!(f64_eq(round_to(-7.896, 2), -7.9));
        assert!(f64_eq(round_to(12.0, 2), 12.0));
    }

    /// 以精确十进制值舍入, 乘法放大带来的误差不能改变结果.
    #[test]
    fn test_round_to_exact_decimal() {
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(1.005, 2), 1.0);
        assert_eq!(round_to(0.615, 2), 0.61);
        assert_eq!(round_to(-7.75, 2), -7.75);
        assert!(round_to(f64::NAN, 2).is_nan());
    }
}
