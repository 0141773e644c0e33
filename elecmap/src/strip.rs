//! 去颅骨协作者.
//!
//! 去颅骨在解剖 MR 上完成, 产出的脑掩膜随后用于遮挡 CT. 具体工具通过
//! [`SkullStripper`] 注入, 默认实现 [`FslBet`] 调用 FSL 的 `bet` 命令.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::volume::{BinaryMask, VolumeError};

/// 去颅骨失败的原因.
#[derive(Debug, Error)]
pub enum StripError {
    /// 工具的安装目录不存在或不完整.
    #[error("skull-stripping toolchain not found at {0}")]
    MissingToolchain(PathBuf),

    /// 无法启动外部命令, 或读写中间文件失败.
    #[error("failed to run skull-stripping tool: {0}")]
    Io(#[from] io::Error),

    /// 外部命令以非零状态退出, 或没有产生预期的文件.
    #[error("skull-stripping tool failed: {0}")]
    Tool(String),

    /// 外部命令报告成功, 但其掩膜无法读取.
    #[error("brain mask {path} is unreadable: {source}")]
    MaskUnreadable {
        /// 掩膜路径.
        path: PathBuf,

        /// 读取错误.
        #[source]
        source: VolumeError,
    },
}

impl StripError {
    /// 该错误是否应当中止整个检测, 而不是降级为无掩膜模式?
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingToolchain(_) | Self::MaskUnreadable { .. })
    }
}

/// 去颅骨结果.
#[derive(Debug, Clone)]
pub struct Stripped {
    /// 去颅骨后的解剖图像路径.
    pub stripped_path: PathBuf,

    /// 脑掩膜文件路径.
    pub mask_path: PathBuf,

    /// 已加载的脑掩膜.
    pub mask: BinaryMask,
}

/// 去颅骨工具.
pub trait SkullStripper: Send + Sync {
    /// 检查工具的前置条件. 失败时检测不会开始.
    fn check(&self) -> Result<(), StripError> {
        Ok(())
    }

    /// 对 `anatomical` 去颅骨, 中间文件写入 `out_dir`.
    ///
    /// `frac` 为分数强度阈值, 取值范围 (0, 1), 越小脑掩膜越大.
    fn strip(&self, anatomical: &Path, frac: f64, out_dir: &Path) -> Result<Stripped, StripError>;
}

/// FSL BET.
#[derive(Debug, Clone)]
pub struct FslBet {
    fsl_dir: PathBuf,
}

impl FslBet {
    /// FSL 安装目录的环境变量名.
    pub const ENV: &'static str = "FSLDIR";

    /// 以 `fsl_dir` 为 FSL 安装目录.
    pub fn new<P: Into<PathBuf>>(fsl_dir: P) -> Self {
        Self {
            fsl_dir: fsl_dir.into(),
        }
    }

    /// 从环境变量 `FSLDIR` 获取安装目录. 变量未设置 (或为空) 时返回 `None`.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(Self::ENV)
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    /// FSL 安装目录.
    #[inline]
    pub fn fsl_dir(&self) -> &Path {
        &self.fsl_dir
    }

    fn bet_path(&self) -> PathBuf {
        self.fsl_dir.join("bin").join("bet")
    }

    /// `anatomical` 对应的输出文件名, 即 (`<stem>_bet.nii.gz`, `<stem>_bet_mask.nii.gz`).
    pub fn output_names(anatomical: &Path) -> (OsString, OsString) {
        let stem = anatomical
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        (
            format!("{stem}_bet.nii.gz").into(),
            format!("{stem}_bet_mask.nii.gz").into(),
        )
    }
}

impl SkullStripper for FslBet {
    fn check(&self) -> Result<(), StripError> {
        if self.bet_path().is_file() {
            Ok(())
        } else {
            Err(StripError::MissingToolchain(self.fsl_dir.clone()))
        }
    }

    fn strip(&self, anatomical: &Path, frac: f64, out_dir: &Path) -> Result<Stripped, StripError> {
        let (out_name, mask_name) = Self::output_names(anatomical);
        let stripped_path = out_dir.join(out_name);
        let mask_path = out_dir.join(mask_name);

        let mut cmd = Command::new(self.bet_path());
        cmd.arg(anatomical)
            .arg(&stripped_path)
            .arg("-f")
            .arg(frac.to_string())
            .arg("-m")
            .env(Self::ENV, &self.fsl_dir)
            .env("FSLOUTPUTTYPE", "NIFTI_GZ");
        log::debug!("Command: {:?}", cmd);

        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StripError::Tool(format!("{}: {}", output.status, stderr.trim())));
        }
        if !mask_path.exists() {
            return Err(StripError::Tool(format!(
                "no brain mask created at {}",
                mask_path.display()
            )));
        }
        log::info!("Skull-stripped MR image saved at: {}", stripped_path.display());
        log::info!("Brain mask saved at: {}", mask_path.display());

        let mask = BinaryMask::open(&mask_path).map_err(|source| StripError::MaskUnreadable {
            path: mask_path.clone(),
            source,
        })?;
        Ok(Stripped {
            stripped_path,
            mask_path,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_names() {
        let (out, mask) = FslBet::output_names(Path::new("/data/sub01_t1.nii"));
        assert_eq!(out, OsString::from("sub01_t1_bet.nii.gz"));
        assert_eq!(mask, OsString::from("sub01_t1_bet_mask.nii.gz"));

        let (out, _) = FslBet::output_names(Path::new("t1.nii.gz"));
        assert_eq!(out, OsString::from("t1.nii_bet.nii.gz"));
    }

    #[test]
    fn test_check_missing_toolchain() {
        let bet = FslBet::new("/nonexistent/fsl/install");
        let err = bet.check().unwrap_err();
        assert!(matches!(err, StripError::MissingToolchain(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_strip_without_binary_is_not_fatal() {
        let dir = std::env::temp_dir().join(format!("elecmap-strip-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bet = FslBet::new(dir.join("fsl"));
        let err = bet.strip(&dir.join("t1.nii"), 0.25, &dir).unwrap_err();
        assert!(matches!(err, StripError::Io(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!StripError::Tool("exit status: 1".into()).is_fatal());
        let unreadable = StripError::MaskUnreadable {
            path: PathBuf::from("mask.nii.gz"),
            source: VolumeError::SingularTransform,
        };
        assert!(unreadable.is_fatal());
    }
}
