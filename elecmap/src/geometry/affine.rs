use crate::{PhysCoord, VoxCoord};

type Mat3 = [[f64; 3]; 3];

/// 3x3 矩阵乘以列向量.
#[inline]
fn mul_vec(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|r| m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2])
}

/// 求 3x3 矩阵的逆. 若矩阵奇异 (或含非有限值) 则返回 `None`.
fn invert(m: &Mat3) -> Option<Mat3> {
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    let c00 = cof(1, 2, 1, 2);
    let c01 = -cof(1, 2, 0, 2);
    let c02 = cof(1, 2, 0, 1);
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    // 伴随矩阵 (余子式矩阵的转置) 除以行列式.
    let adj = [
        [c00, -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
        [c01, cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
        [c02, -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
    ];
    Some(adj.map(|row| row.map(|v| v / det)))
}

/// 体素索引与物理坐标 (毫米) 之间的仿射变换.
///
/// `physical = linear * index + offset`, 其中 `index` 与 `physical` 均按 `[x, y, z]`
/// 排列. `linear` 为方向矩阵与体素分辨率的乘积, `offset` 为原点.
///
/// 构造时即求出逆变换, 因此该对象保证可逆.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine {
    linear: Mat3,
    offset: [f64; 3],
    inverse: Mat3,
}

impl Affine {
    /// 由线性部分和平移部分构造仿射变换. 若线性部分不可逆则返回 `None`.
    pub fn new(linear: Mat3, offset: [f64; 3]) -> Option<Self> {
        let inverse = invert(&linear)?;
        Some(Self {
            linear,
            offset,
            inverse,
        })
    }

    /// 轴对齐的仿射变换: 方向矩阵为单位阵, 体素分辨率为 `spacing`, 原点为 `origin`.
    pub fn from_scaling(spacing: [f64; 3], origin: [f64; 3]) -> Option<Self> {
        let [sx, sy, sz] = spacing;
        Self::new([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, sz]], origin)
    }

    /// 恒等变换, 即体素索引与物理坐标重合.
    #[inline]
    pub fn identity() -> Self {
        let id = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        Self {
            linear: id,
            offset: [0.0; 3],
            inverse: id,
        }
    }

    /// 线性部分.
    #[inline]
    pub fn linear(&self) -> &Mat3 {
        &self.linear
    }

    /// 平移部分 (体素 `[0, 0, 0]` 的物理坐标).
    #[inline]
    pub fn offset(&self) -> [f64; 3] {
        self.offset
    }

    /// 线性部分的逆矩阵.
    #[inline]
    pub fn inverse(&self) -> &Mat3 {
        &self.inverse
    }

    /// 各轴体素分辨率, 即线性部分各列的模, 单位为毫米.
    pub fn spacing(&self) -> [f64; 3] {
        let m = &self.linear;
        [0, 1, 2].map(|c| (m[0][c].powi(2) + m[1][c].powi(2) + m[2][c].powi(2)).sqrt())
    }

    /// 将 (连续) 体素索引变换到物理坐标.
    #[inline]
    pub fn index_to_physical(&self, index: [f64; 3]) -> PhysCoord {
        let [x, y, z] = mul_vec(&self.linear, index);
        let [ox, oy, oz] = self.offset;
        [x + ox, y + oy, z + oz]
    }

    /// 将物理坐标变换到连续体素索引.
    #[inline]
    pub fn physical_to_continuous_index(&self, point: PhysCoord) -> [f64; 3] {
        let [ox, oy, oz] = self.offset;
        let [x, y, z] = point;
        mul_vec(&self.inverse, [x - ox, y - oy, z - oz])
    }

    /// 将物理坐标变换到最近的体素索引. 恰好位于两体素中点时向上取整.
    ///
    /// 返回的索引可能越界 (甚至为负), 由调用者自行判断.
    #[inline]
    pub fn physical_to_index(&self, point: PhysCoord) -> VoxCoord {
        self.physical_to_continuous_index(point)
            .map(|v| (v + 0.5).floor() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::Affine;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_affine_singular() {
        assert!(Affine::from_scaling([1.0, 0.0, 1.0], [0.0; 3]).is_none());
        assert!(Affine::new([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]], [0.0; 3]).is_none());
        assert!(Affine::from_scaling([f64::NAN, 1.0, 1.0], [0.0; 3]).is_none());
    }

    #[test]
    fn test_affine_scaling_round_trip() {
        let a = Affine::from_scaling([0.5, 0.5, 2.0], [-10.0, 20.0, 3.0]).unwrap();
        let p = a.index_to_physical([4.0, 6.0, 5.0]);
        assert!(f64_eq(p[0], -8.0));
        assert!(f64_eq(p[1], 23.0));
        assert!(f64_eq(p[2], 13.0));
        assert_eq!(a.physical_to_index(p), [4, 6, 5]);
        assert_eq!(a.spacing(), [0.5, 0.5, 2.0]);
    }

    /// 带旋转 (以及轴翻转) 的一般仿射变换往返测试.
    #[test]
    fn test_affine_oblique_round_trip() {
        let (s, c) = (0.3f64.sin(), 0.3f64.cos());
        let linear = [[-c * 0.8, s * 0.8, 0.0], [-s * 0.8, -c * 0.8, 0.0], [0.0, 0.0, 1.5]];
        let a = Affine::new(linear, [90.0, -126.0, -72.0]).unwrap();
        for idx in [[0i64, 0, 0], [17, 203, 44], [255, 255, 99], [1, 128, 60]] {
            let p = a.index_to_physical(idx.map(|v| v as f64));
            assert_eq!(a.physical_to_index(p), idx);
            let back = a.physical_to_continuous_index(p);
            for k in 0..3 {
                assert!(f64_eq(back[k], idx[k] as f64));
            }
        }
        let sp = a.spacing();
        assert!(f64_eq(sp[0], 0.8) && f64_eq(sp[1], 0.8) && f64_eq(sp[2], 1.5));
    }

    /// 中点处向上取整, 与 ITK 的最近体素索引规则一致.
    #[test]
    fn test_physical_to_index_half_up() {
        let a = Affine::identity();
        assert_eq!(a.physical_to_index([2.5, -0.5, 0.49]), [3, 0, 0]);
        assert_eq!(a.physical_to_index([-1.51, 7.5001, 9.4999]), [-2, 8, 9]);
    }
}
