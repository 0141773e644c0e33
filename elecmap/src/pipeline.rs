//! 电极检测流程.
//!
//! 一次检测依次完成:
//!
//! 1. 读取 CT 与解剖 MR;
//! 2. 检查强度下限是否落在 CT 的强度范围内;
//! 3. 对 MR 去颅骨, 得到脑掩膜 (可降级);
//! 4. 膨胀脑掩膜并遮挡 CT;
//! 5. 阈值分割, 连通域标记, 提取候选电极;
//! 6. 剔除重复和越界的候选;
//! 7. 将结果写入 `electrodes_<ct stem>.json`.
//!
//! 未检测到任何电极时不写文件, 返回 [`Outcome::NothingDetected`].

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{defaults, is_valid_margin, is_valid_ss_frac};
use crate::filter::{FilterOutcome, OutlierFilter, VoxelBox};
use crate::masking::{apply_brain_mask, BrainMask, MaskError};
use crate::report::{result_file_name, save_records, to_records, ElectrodeRecord};
use crate::segment::{extract_candidates, Connectivity};
use crate::strip::{FslBet, SkullStripper, StripError};
use crate::volume::{Volume, VolumeError};

/// 检测失败的原因.
#[derive(Debug, Error)]
pub enum DetectError {
    /// CT 或 MR 无法读取.
    #[error("failed to load volume {path}: {source}")]
    LoadVolume {
        /// 文件路径.
        path: PathBuf,

        /// 读取错误.
        #[source]
        source: VolumeError,
    },

    /// 去颅骨工具缺失, 或其产生的掩膜无法读取.
    #[error(transparent)]
    Strip(StripError),

    /// CT 不含任何体素.
    #[error("CT volume is empty")]
    EmptyVolume,

    /// 强度下限不在 CT 强度范围内.
    #[error("cut-off intensity {cutoff} must fall within the image intensity range ({min}, {max})")]
    CutoffOutOfRange {
        /// 强度下限.
        cutoff: f32,

        /// CT 最小强度.
        min: f32,

        /// CT 最大强度.
        max: f32,
    },

    /// 脑掩膜与 CT 不匹配.
    #[error(transparent)]
    Mask(#[from] MaskError),

    /// 创建输出目录或写入结果失败.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// 检测参数.
///
/// 可以从 JSON 反序列化, 缺失的字段取默认值.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// 去颅骨的分数强度阈值, 取值范围 (0, 1).
    pub ss_frac: f64,

    /// 脑掩膜膨胀半径 (体素).
    pub dilate_n_voxels: usize,

    /// 包围盒边缘比例, 取值范围 [0, 0.5].
    pub margin: f64,

    /// 电极强度下限.
    pub cutoff_intensity: f32,

    /// 电极之间的最小距离 (体素).
    pub distance_threshold: f64,

    /// 连通域邻接规则.
    pub connectivity: Connectivity,

    /// 输出目录.
    pub output_dir: PathBuf,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            ss_frac: defaults::SS_FRAC,
            dilate_n_voxels: defaults::SS_MASK_DILATE,
            margin: defaults::BOX_MARGIN,
            cutoff_intensity: defaults::CUTOFF_INTENSITY,
            distance_threshold: defaults::DIST_THRESHOLD,
            connectivity: Connectivity::default(),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
        }
    }
}

impl DetectConfig {
    /// 将非法参数重置为默认值, 每次重置输出一条警告.
    pub fn sanitized(mut self) -> Self {
        if !is_valid_ss_frac(self.ss_frac) {
            log::warn!(
                "ss_frac must be between 0 and 1, got {}. Using default {}",
                self.ss_frac,
                defaults::SS_FRAC
            );
            self.ss_frac = defaults::SS_FRAC;
        }
        if !is_valid_margin(self.margin) {
            log::warn!(
                "margin must be between 0 and 0.5, got {}. Using default {}",
                self.margin,
                defaults::BOX_MARGIN
            );
            self.margin = defaults::BOX_MARGIN;
        }
        self
    }
}

/// 检测结果.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 检测到至少一个电极, 结果已写入 `path`.
    Detected {
        /// 结果文件路径.
        path: PathBuf,

        /// 按接受顺序排列的电极.
        records: Vec<ElectrodeRecord>,
    },

    /// 没有任何电极通过过滤. 不写结果文件.
    NothingDetected,
}

/// 电极检测器.
///
/// 去颅骨工具在构造时注入. 没有工具时, 检测在未遮挡的 CT 上进行.
pub struct Detector {
    config: DetectConfig,
    stripper: Option<Box<dyn SkullStripper>>,
}

impl Detector {
    /// 以 `config` (会先经过 [`DetectConfig::sanitized`]) 和可选的去颅骨工具创建检测器.
    pub fn new(config: DetectConfig, stripper: Option<Box<dyn SkullStripper>>) -> Self {
        Self {
            config: config.sanitized(),
            stripper,
        }
    }

    /// 使用环境变量 `FSLDIR` 指向的 FSL BET 创建检测器.
    ///
    /// 变量未设置时输出警告, 检测器不做去颅骨.
    pub fn from_env(config: DetectConfig) -> Self {
        let stripper = FslBet::from_env();
        if stripper.is_none() {
            log::warn!(
                "{} environment variable is not set. Continue the process without skull-stripping",
                FslBet::ENV
            );
        }
        Self::new(config, stripper.map(|s| Box::new(s) as Box<dyn SkullStripper>))
    }

    /// 检测参数.
    #[inline]
    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    /// 是否配置了去颅骨工具?
    #[inline]
    pub fn has_stripper(&self) -> bool {
        self.stripper.is_some()
    }

    /// 检测 `ct_path` 中的电极. `anatomical_path` 为同一患者的解剖 MR.
    pub fn detect<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        ct_path: P,
        anatomical_path: Q,
    ) -> Result<Outcome, DetectError> {
        let (ct_path, anatomical_path) = (ct_path.as_ref(), anatomical_path.as_ref());
        self.prepare()?;

        log::info!("STEP 1: Loading images ...");
        let ct = load(ct_path)?;
        let anatomical = load(anatomical_path)?;
        log::info!("CT array shape: {:?}", ct.shape());
        log::debug!("MR array shape: {:?}", anatomical.shape());

        let result_path = self.config.output_dir.join(result_file_name(ct_path));
        self.run(ct, anatomical_path, &result_path)
    }

    /// 检测已加载的 CT 中的电极, 结果写入 `result_path`.
    ///
    /// `anatomical_path` 仅传递给去颅骨工具.
    pub fn detect_volume(
        &self,
        ct: Volume,
        anatomical_path: &Path,
        result_path: &Path,
    ) -> Result<Outcome, DetectError> {
        self.prepare()?;
        self.run(ct, anatomical_path, result_path)
    }

    /// 在给定脑掩膜下定位电极, 不读写任何文件.
    pub fn locate(&self, ct: Volume, mask: &BrainMask) -> Result<FilterOutcome, DetectError> {
        let (_, upper) = self.check_cutoff(&ct)?;
        self.locate_within(ct, mask, upper)
    }

    fn prepare(&self) -> Result<(), DetectError> {
        if let Some(stripper) = &self.stripper {
            stripper.check().map_err(DetectError::Strip)?;
        }
        std::fs::create_dir_all(&self.config.output_dir)?;
        Ok(())
    }

    fn run(&self, ct: Volume, anatomical_path: &Path, result_path: &Path) -> Result<Outcome, DetectError> {
        let (_, upper) = self.check_cutoff(&ct)?;
        let mask = self.brain_mask(anatomical_path)?;
        let filtered = self.locate_within(ct, &mask, upper)?;

        log::info!("STEP 6: Saving electrode coordinates to the disk ...");
        if filtered.is_empty() {
            log::warn!("No electrodes detected!");
            return Ok(Outcome::NothingDetected);
        }
        let records = to_records(&filtered.accepted);
        save_records(result_path, &records)?;
        log::info!("Electrode coordinates successfully saved to: {}", result_path.display());
        Ok(Outcome::Detected {
            path: result_path.to_path_buf(),
            records,
        })
    }

    /// 检查强度下限, 返回 CT 的 (最小, 最大) 强度.
    fn check_cutoff(&self, ct: &Volume) -> Result<(f32, f32), DetectError> {
        let (min, max) = ct.intensity_range().ok_or(DetectError::EmptyVolume)?;
        log::info!("voxel intensity range: {min} to {max}");
        let cutoff = self.config.cutoff_intensity;
        if min < cutoff && cutoff < max {
            Ok((min, max))
        } else {
            Err(DetectError::CutoffOutOfRange { cutoff, min, max })
        }
    }

    fn brain_mask(&self, anatomical_path: &Path) -> Result<BrainMask, DetectError> {
        let Some(stripper) = &self.stripper else {
            log::info!("Skipping skull stripping: no skull-stripping tool configured");
            return Ok(BrainMask::Unavailable);
        };
        log::info!("STEP 2: Performing skull stripping on {} ...", anatomical_path.display());
        match stripper.strip(anatomical_path, self.config.ss_frac, &self.config.output_dir) {
            Ok(stripped) => Ok(BrainMask::Available(stripped.mask)),
            Err(e) if e.is_fatal() => Err(DetectError::Strip(e)),
            Err(e) => {
                log::warn!("An error occurred during skull stripping: {e}");
                log::warn!("Proceeding with the unmasked CT image (no skull stripping)");
                Ok(BrainMask::Unavailable)
            }
        }
    }

    fn locate_within(
        &self,
        ct: Volume,
        mask: &BrainMask,
        upper: f32,
    ) -> Result<FilterOutcome, DetectError> {
        let bounds = VoxelBox::from_margin(ct.shape(), self.config.margin);
        log::info!(
            "Voxel bounds (x, y, z): {:?} to {:?}",
            bounds.lower,
            bounds.upper
        );

        if mask.is_available() {
            log::info!(
                "STEP 3: Dilating the brain mask by {} voxels and applying it to the CT scan ...",
                self.config.dilate_n_voxels
            );
        }
        let masked = apply_brain_mask(ct, mask, self.config.dilate_n_voxels)?;

        log::info!("STEP 4: Compute the centroid of electrodes ...");
        let candidates = extract_candidates(
            &masked,
            self.config.cutoff_intensity,
            upper,
            self.config.connectivity,
        );

        log::info!("STEP 5: Eliminate outliers from the list of potential electrodes ...");
        let filter = OutlierFilter::new(bounds, self.config.distance_threshold);
        Ok(filter.run(candidates))
    }
}

fn load(path: &Path) -> Result<Volume, DetectError> {
    Volume::open(path).map_err(|source| DetectError::LoadVolume {
        path: path.to_path_buf(),
        source,
    })
}
