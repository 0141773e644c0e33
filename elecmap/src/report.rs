//! 检测结果的持久化.
//!
//! 结果文件是一个 JSON 数组, 每个元素形如:
//!
//! ```json
//! {
//!     "physical_mm": [x, y, z],
//!     "voxel_coords": [x, y, z]
//! }
//! ```
//!
//! 使用 4 空格缩进. 下游的可视化工具依赖该格式.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::segment::Candidate;
use crate::{PhysCoord, VoxCoord};

/// 单个电极的持久化记录.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeRecord {
    /// 物理坐标 (mm), 保留两位小数.
    pub physical_mm: PhysCoord,

    /// 体素坐标, `[x, y, z]`.
    pub voxel_coords: VoxCoord,
}

impl From<&Candidate> for ElectrodeRecord {
    fn from(c: &Candidate) -> Self {
        Self {
            physical_mm: c.physical,
            voxel_coords: c.voxel,
        }
    }
}

/// 按接受顺序将电极转换为记录, 不做过滤和重排.
pub fn to_records(accepted: &[Candidate]) -> Vec<ElectrodeRecord> {
    accepted.iter().map(ElectrodeRecord::from).collect()
}

/// CT 文件 `ct_path` 对应的结果文件名, 即 `electrodes_<stem>.json`.
///
/// `stem` 只去掉最后一个扩展名, 因此 `ct.nii.gz` 对应 `electrodes_ct.nii.json`.
pub fn result_file_name<P: AsRef<Path>>(ct_path: P) -> PathBuf {
    let stem = ct_path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    PathBuf::from(format!("electrodes_{stem}.json"))
}

/// 将 `records` 写入 `path`, 覆盖已有文件.
pub fn save_records<P: AsRef<Path>>(path: P, records: &[ElectrodeRecord]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    records.serialize(&mut ser)?;
    writer.flush()
}

/// 读取 [`save_records`] 写出的结果文件.
pub fn load_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<ElectrodeRecord>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
