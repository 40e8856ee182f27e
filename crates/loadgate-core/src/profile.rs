//! Ramp profiles: how the desired number of virtual workers changes over time

use crate::duration::{format_duration, serde_str};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a stage moves from the previous target to its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageShape {
    /// Linear interpolation from the previous stage's target
    #[default]
    Ramp,

    /// Jump to the stage target and keep it for the whole stage
    Hold,
}

/// One (duration, target concurrency) segment of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "serde_str")]
    pub duration: Duration,

    pub target: u32,

    #[serde(default)]
    pub shape: StageShape,
}

impl Stage {
    /// Stage ramping linearly to `target`
    pub fn ramp(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            shape: StageShape::Ramp,
        }
    }

    /// Stage holding `target` constant
    pub fn hold(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            shape: StageShape::Hold,
        }
    }
}

/// Position of an instant inside a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePosition {
    /// Index of the active stage
    pub index: usize,

    /// Time elapsed since the stage started
    pub offset: Duration,
}

/// Ordered, validated sequence of stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    stages: Vec<Stage>,
    start_target: u32,
    total: Duration,
}

impl RampProfile {
    /// Build a profile starting from zero workers
    pub fn new(stages: Vec<Stage>) -> CoreResult<Self> {
        Self::with_start_target(stages, 0)
    }

    /// Build a profile whose first ramp starts from `start_target`
    pub fn with_start_target(stages: Vec<Stage>, start_target: u32) -> CoreResult<Self> {
        if stages.is_empty() {
            return Err(CoreError::invalid_profile("at least one stage is required"));
        }

        for (i, stage) in stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(CoreError::invalid_profile(format!(
                    "stage {} has a zero duration",
                    i
                )));
            }
        }

        let total = stages.iter().map(|s| s.duration).sum();

        Ok(Self {
            stages,
            start_target,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_target(&self) -> u32 {
        self.start_target
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest target reached anywhere in the profile
    pub fn max_target(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_target)
    }

    /// Target the profile ends on
    pub fn final_target(&self) -> u32 {
        self.stages.last().map(|s| s.target).unwrap_or(0)
    }

    /// Locate the stage active at `elapsed`; `None` once the profile is exhausted
    pub fn position_at(&self, elapsed: Duration) -> Option<StagePosition> {
        let mut stage_start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return Some(StagePosition {
                    index,
                    offset: elapsed - stage_start,
                });
            }
            stage_start = stage_end;
        }
        None
    }

    /// Target concurrency the stage at `index` starts from
    pub fn stage_start_target(&self, index: usize) -> u32 {
        if index == 0 {
            self.start_target
        } else {
            self.stages[index - 1].target
        }
    }

    /// Desired number of live workers at `elapsed`.
    ///
    /// Ramp stages interpolate linearly and round to the nearest worker.
    /// Past the end of the profile the final target is returned.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let Some(position) = self.position_at(elapsed) else {
            return self.final_target();
        };

        let stage = &self.stages[position.index];
        match stage.shape {
            StageShape::Hold => stage.target,
            StageShape::Ramp => {
                let from = self.stage_start_target(position.index) as f64;
                let to = stage.target as f64;
                let progress = position.offset.as_secs_f64() / stage.duration.as_secs_f64();
                let value = from + (to - from) * progress;
                value.round().max(0.0) as u32
            }
        }
    }

    /// Get description of this profile
    pub fn description(&self) -> String {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|s| match s.shape {
                StageShape::Ramp => format!("{}→{}", format_duration(s.duration), s.target),
                StageShape::Hold => format!("{}={}", format_duration(s.duration), s.target),
            })
            .collect();
        format!(
            "{} stages over {} ({})",
            self.stages.len(),
            format_duration(self.total),
            stages.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_rejects_empty_and_zero_duration() {
        assert!(RampProfile::new(vec![]).is_err());
        assert!(RampProfile::new(vec![Stage::ramp(Duration::ZERO, 5)]).is_err());
    }

    #[test]
    fn test_ramp_interpolation() {
        let profile = RampProfile::new(vec![Stage::ramp(secs(10), 100)]).unwrap();

        assert_eq!(profile.target_at(secs(0)), 0);
        assert_eq!(profile.target_at(secs(5)), 50); // Midpoint
        assert_eq!(profile.target_at(Duration::from_millis(9_990)), 100);
        assert_eq!(profile.target_at(secs(15)), 100); // After profile
    }

    #[test]
    fn test_consecutive_ramps_chain_targets() {
        let profile = RampProfile::new(vec![
            Stage::ramp(secs(10), 100),
            Stage::ramp(secs(10), 50),
            Stage::ramp(secs(10), 0),
        ])
        .unwrap();

        assert_eq!(profile.target_at(secs(10)), 100); // Start of stage 2
        assert_eq!(profile.target_at(secs(15)), 75);
        assert_eq!(profile.target_at(secs(25)), 25);
        assert_eq!(profile.target_at(secs(30)), 0);
        assert_eq!(profile.total_duration(), secs(30));
    }

    #[test]
    fn test_hold_is_a_step() {
        let profile = RampProfile::new(vec![
            Stage::ramp(secs(5), 0),
            Stage::hold(secs(5), 10),
        ])
        .unwrap();

        assert_eq!(profile.target_at(Duration::from_millis(4_999)), 0);
        assert_eq!(profile.target_at(secs(5)), 10);
        assert_eq!(profile.target_at(secs(9)), 10);
    }

    #[test]
    fn test_start_target() {
        let profile = RampProfile::with_start_target(vec![Stage::ramp(secs(10), 0)], 20).unwrap();
        assert_eq!(profile.target_at(secs(0)), 20);
        assert_eq!(profile.target_at(secs(5)), 10);
        assert_eq!(profile.max_target(), 20);
    }

    #[test]
    fn test_position_at() {
        let profile = RampProfile::new(vec![Stage::ramp(secs(5), 1), Stage::ramp(secs(5), 2)])
            .unwrap();

        assert_eq!(
            profile.position_at(secs(7)),
            Some(StagePosition {
                index: 1,
                offset: secs(2)
            })
        );
        assert_eq!(profile.position_at(secs(10)), None);
    }

    #[test]
    fn test_stage_deserialization() {
        let stage: Stage = toml::from_str("duration = \"2m\"\ntarget = 500").unwrap();
        assert_eq!(stage, Stage::ramp(secs(120), 500));

        let stage: Stage =
            toml::from_str("duration = \"30s\"\ntarget = 10\nshape = \"hold\"").unwrap();
        assert_eq!(stage.shape, StageShape::Hold);
    }

    #[test]
    fn test_description() {
        let profile = RampProfile::new(vec![Stage::ramp(secs(30), 5), Stage::hold(secs(180), 10)])
            .unwrap();
        assert_eq!(profile.description(), "2 stages over 210s (30s→5, 3m=10)");
    }
}
