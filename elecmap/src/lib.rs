#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 从头部 CT 扫描中定位植入电极触点, 输出去重且位于解剖范围内的三维坐标列表.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据按照 (z, y, x) 索引; 所有坐标 (体素坐标与物理坐标) 都按照 `[x, y, z]` 排列.
//! 2. 物理坐标采用 LPS 约定, 与 ITK 系的读取工具一致.
//! 3. 去颅骨依赖外部工具 (默认为 FSL BET). 工具失败时检测降级为无掩膜模式, 结果精度下降.
//!
//! # 检测流程
//!
//! ### 读取与强度检查 ✅
//!
//! 读取 CT 与解剖 MR, 要求电极强度下限严格落在 CT 强度范围内.
//!
//! 实现位于 `elecmap/src/volume`.
//!
//! ### 去颅骨与掩膜 ✅
//!
//! MR 去颅骨得到脑掩膜, 以球形结构元膨胀 (覆盖颅骨区域) 后与 CT 逐元素相乘.
//! 膨胀通过可分离的欧氏距离变换精确实现.
//!
//! 实现位于 `elecmap/src/strip.rs` 与 `elecmap/src/masking.rs`.
//!
//! ### 分割与质心 ✅
//!
//! 阈值分割, 三维连通域标记 (6/18/26-邻域), 按体素个数降序重新编号,
//! 计算每个连通域的质心.
//!
//! 实现位于 `elecmap/src/segment.rs`.
//!
//! ### 离群点过滤 ✅
//!
//! 按连通域大小降序贪心地剔除重复 (距离过近) 和越界 (位于包围盒外) 的候选.
//! 最近邻计算在启用 `rayon` 时并行完成.
//!
//! 实现位于 `elecmap/src/filter.rs`.
//!
//! ### 结果持久化 ✅
//!
//! `electrodes_<ct stem>.json`, 4 空格缩进.
//!
//! 实现位于 `elecmap/src/report.rs`.
//!
//! # 示例
//!
//! ```no_run
//! use elecmap::prelude::*;
//!
//! let detector = Detector::from_env(DetectConfig::default());
//! match detector.detect("sub01_ct.nii.gz", "sub01_t1.nii.gz") {
//!     Ok(Outcome::Detected { path, records }) => {
//!         println!("{} electrodes saved to {}", records.len(), path.display())
//!     }
//!     Ok(Outcome::NothingDetected) => println!("no electrodes"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

/// 三维索引, 按照 (z, y, x) 排列.
pub type Idx3d = (usize, usize, usize);

/// 体素坐标, 按照 `[x, y, z]` 排列.
pub type VoxCoord = [i64; 3];

/// 物理坐标 (mm), 按照 `[x, y, z]` 排列.
pub type PhysCoord = [f64; 3];

pub mod consts;

pub mod geometry;

pub mod volume;

pub use volume::{BinaryMask, Volume, VolumeError};

pub mod masking;

pub mod segment;

pub mod filter;

pub mod report;

pub mod strip;

pub mod pipeline;

pub mod prelude;
