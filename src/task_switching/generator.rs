//! Trial sequence generation for training and test blocks.
//!
//! Training blocks are deterministic: the cued task alternates in fixed runs and the
//! stimulus dimensions cycle round-robin. Test blocks are randomized under quota-forcing
//! sampling, which adapts the per-slot probability to `remaining / slots_left` and forces
//! the outcome once the quota can only just be met (or is already met). The realized
//! switch and congruent counts therefore hit their targets exactly for any random source.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::stimulus::{congruency, correct_response, Color, Congruency, Response, Shape, TaskType};
use crate::config::ProtocolConfig;

/// Trials in a training block.
pub const TRAINING_BLOCK_SIZE: usize = 24;
/// Trials in a test block.
pub const TEST_BLOCK_SIZE: usize = 240;
/// Consecutive training trials sharing one task type before it alternates.
pub const TRAINING_RUN_LENGTH: usize = 6;
/// Default fraction of test trials (after the first) that switch task.
pub const DEFAULT_SWITCH_PROBABILITY: f64 = 0.5;
/// Default fraction of test trials with a congruent stimulus.
pub const DEFAULT_CONGRUENT_PROBABILITY: f64 = 0.5;

/// Kind of trial block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Practice block with a fixed, easy-to-follow sequence.
    Training,
    /// Measured block with balanced switch and congruency quotas.
    Test,
}

impl BlockKind {
    /// Presentation order of the block within a session.
    pub fn order(self) -> u8 {
        match self {
            BlockKind::Training => 0,
            BlockKind::Test => 1,
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Training => write!(f, "training"),
            BlockKind::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "training" => Ok(BlockKind::Training),
            "test" => Ok(BlockKind::Test),
            _ => Err(format!("Unknown block kind: {}", s)),
        }
    }
}

/// Specification of a single generated trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Cued task.
    pub task_type: TaskType,
    /// Stimulus shape.
    pub shape: Shape,
    /// Stimulus color.
    pub color: Color,
    /// Response required by the cued task.
    pub correct_response: Response,
    /// Congruency of the stimulus pair.
    pub congruency: Congruency,
    /// Task type differs from the preceding trial.
    pub is_switch_trial: bool,
}

impl TrialSpec {
    fn new(task_type: TaskType, shape: Shape, color: Color, is_switch_trial: bool) -> Self {
        Self {
            task_type,
            shape,
            color,
            correct_response: correct_response(task_type, shape, color),
            congruency: congruency(shape, color),
            is_switch_trial,
        }
    }
}

/// Sequential quota sampler.
///
/// `remaining` never exceeds the number of slots left when sampling starts, so every
/// slot is decided and the final count equals the initial quota.
#[derive(Debug, Clone, Copy)]
struct Quota {
    remaining: usize,
}

impl Quota {
    fn new(target: usize) -> Self {
        Self { remaining: target }
    }

    fn take<R: Rng + ?Sized>(&mut self, slots_left: usize, rng: &mut R) -> bool {
        let hit = if self.remaining >= slots_left {
            true
        } else if self.remaining == 0 {
            false
        } else {
            // 0 < remaining < slots_left here, so the ratio is a valid probability.
            rng.gen_bool(self.remaining as f64 / slots_left as f64)
        };

        if hit {
            self.remaining -= 1;
        }
        hit
    }
}

/// Quota target for `slots` slots at probability `p`, never more than `capacity`.
fn quota_target(slots: usize, p: f64, capacity: usize) -> usize {
    let target = (slots as f64 * p.clamp(0.0, 1.0)).round() as usize;
    target.min(capacity)
}

/// Builds training and test trial sequences.
#[derive(Debug, Clone, Copy)]
pub struct SequenceGenerator {
    training_run_length: usize,
    switch_probability: f64,
    congruent_probability: f64,
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self {
            training_run_length: TRAINING_RUN_LENGTH,
            switch_probability: DEFAULT_SWITCH_PROBABILITY,
            congruent_probability: DEFAULT_CONGRUENT_PROBABILITY,
        }
    }
}

impl SequenceGenerator {
    /// Create a generator from protocol configuration.
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            training_run_length: config.training_run_length.max(1),
            switch_probability: config.switch_probability,
            congruent_probability: config.congruent_probability,
        }
    }

    /// Override the switch probability used for test blocks.
    pub fn with_switch_probability(mut self, p: f64) -> Self {
        self.switch_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Override the congruent probability used for test blocks.
    pub fn with_congruent_probability(mut self, p: f64) -> Self {
        self.congruent_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Override the training run length.
    pub fn with_training_run_length(mut self, run_length: usize) -> Self {
        self.training_run_length = run_length.max(1);
        self
    }

    /// Number of switch trials a test block of `block_size` will contain after its first trial.
    pub fn target_switches(&self, block_size: usize) -> usize {
        quota_target(block_size, self.switch_probability, block_size.saturating_sub(1))
    }

    /// Number of congruent trials a test block of `block_size` will contain.
    pub fn target_congruent(&self, block_size: usize) -> usize {
        quota_target(block_size, self.congruent_probability, block_size)
    }

    /// Generate a block of trials.
    ///
    /// `previous` is the task type of the last trial of the preceding block, if any; it
    /// decides the switch flag of this block's first trial.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        block_size: usize,
        kind: BlockKind,
        previous: Option<TaskType>,
        rng: &mut R,
    ) -> Vec<TrialSpec> {
        match kind {
            BlockKind::Training => self.training_block(block_size, previous),
            BlockKind::Test => self.test_block(block_size, previous, rng),
        }
    }

    fn training_block(&self, block_size: usize, previous: Option<TaskType>) -> Vec<TrialSpec> {
        let mut trials = Vec::with_capacity(block_size);
        let mut last = previous;

        for i in 0..block_size {
            let task_type = if (i / self.training_run_length) % 2 == 0 {
                TaskType::Color
            } else {
                TaskType::Shape
            };
            let shape = Shape::ALL[i % Shape::ALL.len()];
            let color = Color::ALL[i % Color::ALL.len()];
            let is_switch = last.map_or(false, |prev| prev != task_type);

            trials.push(TrialSpec::new(task_type, shape, color, is_switch));
            last = Some(task_type);
        }

        trials
    }

    fn test_block<R: Rng + ?Sized>(
        &self,
        block_size: usize,
        previous: Option<TaskType>,
        rng: &mut R,
    ) -> Vec<TrialSpec> {
        let mut trials = Vec::with_capacity(block_size);
        let mut switches = Quota::new(self.target_switches(block_size));
        let mut congruent = Quota::new(self.target_congruent(block_size));
        let mut last = previous;

        for i in 0..block_size {
            let slots_left = block_size - i;

            // The opening trial is always a switch and sits outside the switch quota,
            // which covers the block_size - 1 trials that have an in-block predecessor.
            let task_type = match last {
                Some(prev) if i == 0 => prev.other(),
                Some(prev) => {
                    if switches.take(slots_left, rng) {
                        prev.other()
                    } else {
                        prev
                    }
                }
                None => TaskType::ALL[rng.gen_range(0..TaskType::ALL.len())],
            };

            let wants_congruent = congruent.take(slots_left, rng);
            let (shape, color) = synthesize_stimulus(task_type, wants_congruent, rng);

            trials.push(TrialSpec::new(task_type, shape, color, i == 0 || last != Some(task_type)));
            last = Some(task_type);
        }

        trials
    }
}

/// Pick a stimulus whose congruency matches `congruent` for the cued task.
///
/// The irrelevant dimension is drawn at random; the relevant one is solved so that its
/// response agrees (congruent) or disagrees (incongruent) with the irrelevant dimension's.
fn synthesize_stimulus<R: Rng + ?Sized>(
    task_type: TaskType,
    congruent: bool,
    rng: &mut R,
) -> (Shape, Color) {
    let target = |free: Response| if congruent { free } else { free.opposite() };

    match task_type {
        TaskType::Color => {
            let shape = Shape::ALL[rng.gen_range(0..Shape::ALL.len())];
            (shape, Color::for_response(target(shape.response())))
        }
        TaskType::Shape => {
            let color = Color::ALL[rng.gen_range(0..Color::ALL.len())];
            (Shape::for_response(target(color.response())), color)
        }
    }
}
