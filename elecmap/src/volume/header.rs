//! 从 nifti header 中提取形状与仿射变换.

use crate::geometry::Affine;
use crate::Idx3d;
use nifti::NiftiHeader;

type Mat3 = [[f64; 3]; 3];

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
pub(super) fn shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 按照 nifti 标准的三种方法之一求出 RAS 空间下的仿射变换, 然后翻转前两个轴得到
/// LPS 空间 (与 ITK 读取 nifti 文件的结果一致) 下的仿射变换.
///
/// 1. `sform_code > 0`: 直接使用 `srow_{x, y, z}`;
/// 2. `qform_code > 0`: 使用四元数, 体素分辨率与 `qfac`;
/// 3. 否则: 仅使用 `pixdim` 缩放.
///
/// 若线性部分不可逆则返回 `None`.
pub(super) fn affine_from_header(h: &NiftiHeader) -> Option<Affine> {
    let (mut linear, mut offset) = if h.sform_code > 0 {
        let rows = [h.srow_x, h.srow_y, h.srow_z];
        (
            rows.map(|r| [r[0] as f64, r[1] as f64, r[2] as f64]),
            rows.map(|r| r[3] as f64),
        )
    } else if h.qform_code > 0 {
        (
            qform_linear(h),
            [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64],
        )
    } else {
        let [_, dx, dy, dz, ..] = h.pixdim;
        (
            [
                [dx as f64, 0.0, 0.0],
                [0.0, dy as f64, 0.0],
                [0.0, 0.0, dz as f64],
            ],
            [0.0; 3],
        )
    };

    // RAS -> LPS
    for r in 0..2 {
        linear[r] = linear[r].map(|v| -v);
        offset[r] = -offset[r];
    }
    Affine::new(linear, offset)
}

/// 四元数旋转矩阵乘以 `diag(dx, dy, qfac * dz)`.
fn qform_linear(h: &NiftiHeader) -> Mat3 {
    let (mut b, mut c, mut d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
    let a2 = 1.0 - (b * b + c * c + d * d);
    let a = if a2 < 1e-7 {
        // 数值误差: a 视为 0, 并将 (b, c, d) 归一化.
        let n = (b * b + c * c + d * d).sqrt();
        (b, c, d) = (b / n, c / n, d / n);
        0.0
    } else {
        a2.sqrt()
    };

    let [qfac, dx, dy, dz, ..] = h.pixdim;
    let qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
    let scale = [dx as f64, dy as f64, qfac * dz as f64];

    let r = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - b * b - c * c,
        ],
    ];
    r.map(|row| [row[0] * scale[0], row[1] * scale[1], row[2] * scale[2]])
}
