//! 3D 体数据结构: 强度体 [`Volume`] 与二值掩膜 [`BinaryMask`].

use std::ops::Index;
use std::path::Path;

use itertools::{Itertools, MinMaxResult};
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::geometry::Affine;
use crate::Idx3d;

mod header;

/// 打开体数据文件的错误.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// nifti 文件读取或解码失败.
    #[error("nifti decoding failed: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 体素数据与 header 描述的形状不符.
    #[error("voxel data does not match header shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// header 中体素到物理空间的变换不可逆.
    #[error("voxel-to-physical transform in header is singular")]
    SingularTransform,

    /// 去掉末尾长度为 1 的维度后, 数据仍然不是三维的. 形状按 nifti 顺序给出.
    #[error("expected a 3D volume, got shape {0:?}")]
    NotThreeDimensional(Vec<usize>),
}

/// 读取 nifti 文件, 返回 (z, H, W) 顺序、行优先存储的 `f32` 数据及其仿射变换.
fn read_nifti(path: &Path) -> Result<(Array3<f32>, Affine), VolumeError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let shape = header::shape_from_header(obj.header());
    let affine = header::affine_from_header(obj.header()).ok_or(VolumeError::SingularTransform)?;

    // [W, H, z, 1, ...] -> [W, H, z].
    let mut data = obj.into_volume().into_ndarray::<f32>()?;
    while data.ndim() > 3 && data.len_of(Axis(data.ndim() - 1)) == 1 {
        let last = Axis(data.ndim() - 1);
        data = data.index_axis_move(last, 0);
    }
    if data.ndim() != 3 {
        return Err(VolumeError::NotThreeDimensional(data.shape().to_vec()));
    }

    // [W, H, z] -> [z, H, W].
    // hint: 原第一维向下增长, 原第二维向右增长.
    let data = data.permuted_axes([2, 1, 0].as_slice());
    let data = Array3::<f32>::from_shape_vec(shape, data.iter().copied().collect())?;
    Ok((data, affine))
}

/// 3D 强度体, 包括体素强度 (以 `f32` 保存) 和体素/物理坐标仿射变换.
///
/// 数据按照 (z, y, x) 索引, x 方向在内存中连续. 仿射变换按照 `[x, y, z]` 顺序工作.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    affine: Affine,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 打开 nifti 格式的 3D 体数据. `path` 为 `.nii` 或 `.nii.gz` 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (data, affine) = read_nifti(path.as_ref())?;
        Ok(Self { data, affine })
    }

    /// 根据裸数据和仿射变换直接创建体数据. `data` 按照 (z, y, x) 组织.
    #[inline]
    pub fn from_parts(data: Array3<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// 数据形状 (z, y, x).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 体素/物理坐标仿射变换.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获取强度最小值与最大值. 体数据为空时返回 `None`.
    pub fn intensity_range(&self) -> Option<(f32, f32)> {
        match self.data.iter().copied().minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(v) => Some((v, v)),
            MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
        }
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub(crate) fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }
}

/// 3D 二值掩膜. 形状与其来源体数据一致, 以 (z, y, x) 索引.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    data: Array3<bool>,
}

impl Index<Idx3d> for BinaryMask {
    type Output = bool;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl BinaryMask {
    /// 打开 nifti 格式的掩膜文件. 值大于 0 的体素为前景.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (data, _) = read_nifti(path.as_ref())?;
        Ok(Self {
            data: data.mapv(|v| v > 0.0),
        })
    }

    /// 直接由布尔数组创建掩膜. `data` 按照 (z, y, x) 组织.
    #[inline]
    pub fn from_array(data: Array3<bool>) -> Self {
        Self { data }
    }

    /// 数据形状 (z, y, x).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, bool> {
        self.data.view()
    }

    /// 前景体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use nifti::writer::WriterOptions;
    use nifti::NiftiHeader;
    use std::path::PathBuf;

    #[test]
    fn test_intensity_range() {
        let mut data = Array3::<f32>::zeros((3, 4, 5));
        data[(1, 2, 3)] = 12_000.0;
        data[(0, 0, 0)] = -1_024.0;
        let vol = Volume::from_parts(data, Affine::identity());
        assert_eq!(vol.intensity_range(), Some((-1_024.0, 12_000.0)));
        assert_eq!(vol.shape(), (3, 4, 5));
        assert_eq!(vol.size(), 60);
        assert_eq!(vol[(1, 2, 3)], 12_000.0);

        let empty = Volume::from_parts(Array3::zeros((0, 4, 5)), Affine::identity());
        assert_eq!(empty.intensity_range(), None);
    }

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("elecmap-volume-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn sform_header() -> NiftiHeader {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [2.0, 0.0, 0.0, -10.0];
        header.srow_y = [0.0, 3.0, 0.0, 20.0];
        header.srow_z = [0.0, 0.0, 4.0, 5.0];
        header
    }

    /// 数据按 nifti 的 `[x, y, z]` 写入, 读取后应按 (z, y, x) 索引, 仿射变换为 LPS.
    #[test]
    fn test_open_axis_order_and_affine() {
        let path = temp_file("xyz.nii");
        let xyz = Array3::from_shape_fn((5, 4, 3), |(x, y, z)| (x * 100 + y * 10 + z) as f32);
        let header = sform_header();
        WriterOptions::new(&path)
            .reference_header(&header)
            .write_nifti(&xyz)
            .unwrap();

        let vol = Volume::open(&path).unwrap();
        assert_eq!(vol.shape(), (3, 4, 5));
        assert_eq!(vol[(2, 3, 4)], 432.0);
        assert_eq!(vol[(0, 1, 2)], 210.0);
        assert_eq!(vol.intensity_range(), Some((0.0, 432.0)));
        // RAS (-8, 26, 17) -> LPS (8, -26, 17)
        assert_eq!(vol.affine().index_to_physical([1.0, 2.0, 3.0]), [8.0, -26.0, 17.0]);
    }

    /// 末尾单一维度的 4D 文件按 3D 读取.
    #[test]
    fn test_open_trailing_singleton_axis() {
        let path = temp_file("singleton.nii");
        let data = Array4::<f32>::from_elem((5, 4, 3, 1), 7.0);
        WriterOptions::new(&path)
            .reference_header(&sform_header())
            .write_nifti(&data)
            .unwrap();

        let vol = Volume::open(&path).unwrap();
        assert_eq!(vol.shape(), (3, 4, 5));
        assert!(vol.data().iter().all(|&v| v == 7.0));

        let mask = BinaryMask::open(&path).unwrap();
        assert_eq!(mask.count(), 60);
    }

    /// 真正的 4D 数据是错误而不是 panic.
    #[test]
    fn test_open_four_dimensional_rejected() {
        let path = temp_file("series.nii");
        let data = Array4::<f32>::from_elem((5, 4, 3, 2), 1.0);
        WriterOptions::new(&path)
            .reference_header(&sform_header())
            .write_nifti(&data)
            .unwrap();

        let err = Volume::open(&path).unwrap_err();
        assert!(matches!(err, VolumeError::NotThreeDimensional(ref s) if *s == vec![5, 4, 3, 2]));
    }

    #[test]
    fn test_open_missing_file() {
        let err = Volume::open("/definitely/not/here/ct.nii.gz").unwrap_err();
        assert!(matches!(err, VolumeError::Nifti(_)));
    }

    #[test]
    fn test_mask_count() {
        let mut data = Array3::from_elem((2, 2, 2), false);
        data[(0, 1, 1)] = true;
        data[(1, 0, 0)] = true;
        let mask = BinaryMask::from_array(data);
        assert_eq!(mask.count(), 2);
        assert!(mask[(0, 1, 1)]);
        assert_eq!(mask.shape(), (2, 2, 2));
    }
}
