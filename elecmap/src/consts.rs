//! 通用常量.

/// 检测流程各参数的默认值.
pub mod defaults {
    /// 去颅骨的分数强度阈值. 越小脑掩膜越大.
    pub const SS_FRAC: f64 = 0.25;

    /// 脑掩膜膨胀半径 (体素), 用于把颅骨区域重新纳入掩膜.
    pub const SS_MASK_DILATE: usize = 30;

    /// 包围盒每个轴两端各裁去的比例.
    pub const BOX_MARGIN: f64 = 0.08;

    /// 电极强度下限.
    pub const CUTOFF_INTENSITY: f32 = 9500.0;

    /// 两个电极之间允许的最小距离 (体素).
    pub const DIST_THRESHOLD: f64 = 5.0;

    /// 中间文件与结果文件的输出目录.
    pub const OUTPUT_DIR: &str = "processed_scans";
}

/// 质心物理坐标保留的小数位数.
pub const CENTROID_DECIMALS: usize = 2;

/// `ss_frac` 是否合法? 要求位于开区间 (0, 1).
#[inline]
pub fn is_valid_ss_frac(frac: f64) -> bool {
    0.0 < frac && frac < 1.0
}

/// `margin` 是否合法? 要求位于闭区间 [0, 0.5].
#[inline]
pub fn is_valid_margin(margin: f64) -> bool {
    (0.0..=0.5).contains(&margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(is_valid_ss_frac(defaults::SS_FRAC));
        assert!(!is_valid_ss_frac(0.0));
        assert!(!is_valid_ss_frac(1.0));
        assert!(!is_valid_ss_frac(f64::NAN));

        assert!(is_valid_margin(defaults::BOX_MARGIN));
        assert!(is_valid_margin(0.0));
        assert!(is_valid_margin(0.5));
        assert!(!is_valid_margin(-0.01));
        assert!(!is_valid_margin(f64::NAN));
    }
}
