// src/core/mod.rs
pub mod acquisition;
pub mod cancel;
pub mod enrollment;
pub mod matching;
pub mod settings;
pub mod types;

pub use acquisition::{
    AcquisitionController, AcquisitionState, DeviceOptions, DeviceSummary, RetryMachine,
};
pub use cancel::CancelToken;
pub use enrollment::{AutoPlacement, EnrollmentProtocol, Placement, PlacementPrompt};
pub use matching::MatchingEngine;
pub use settings::{AcquisitionParams, Settings, SettingsSnapshot, Threshold};
pub use types::*;
