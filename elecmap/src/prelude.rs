//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, PhysCoord, VoxCoord};

pub use crate::volume::{BinaryMask, Volume, VolumeError};

pub use crate::geometry::{distance, nearest, Affine, Nearest};

#[cfg(feature = "rayon")]
pub use crate::geometry::par_nearest;

pub use crate::masking::{apply_brain_mask, dilate, BrainMask, MaskError};
pub use crate::segment::{extract_candidates, Candidate, Connectivity, LabeledVolume};

pub use crate::filter::{FilterOutcome, OutlierFilter, Verdict, VoxelBox};
pub use crate::report::{load_records, result_file_name, save_records, to_records, ElectrodeRecord};

pub use crate::strip::{FslBet, SkullStripper, StripError, Stripped};

pub use crate::consts::defaults;
pub use crate::pipeline::{DetectConfig, DetectError, Detector, Outcome};
