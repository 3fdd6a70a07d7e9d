//! Aggregation of answered trials into session performance metrics.
//!
//! Every reaction-time mean is taken over correct trials only. A mean over an empty
//! subgroup is 0, so `switch_cost` and `task_interference` can be negative or inflated
//! when one side of the comparison has no correct trials.

use serde::{Deserialize, Serialize};

use super::stimulus::{Congruency, TaskType};
use crate::storage::{Trial, TrialStatus};

/// Summary statistics for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Answered trials.
    pub total_trials: u32,
    /// Answered trials scored correct.
    pub correct_trials: u32,
    /// Percentage correct (0-100).
    pub accuracy: f64,
    /// Mean response time of correct trials, in milliseconds.
    pub average_response_time: f64,
    /// `switch_avg_rt - repeat_avg_rt`.
    pub switch_cost: f64,
    /// `incongruent_avg_rt - congruent_avg_rt`.
    pub task_interference: f64,
    /// `total_trials - correct_trials`.
    pub error_count: u32,
    /// Percentage correct on color-task trials.
    pub color_task_accuracy: f64,
    /// Percentage correct on shape-task trials.
    pub shape_task_accuracy: f64,
    /// Mean RT of correct color-task trials.
    pub color_task_avg_rt: f64,
    /// Mean RT of correct shape-task trials.
    pub shape_task_avg_rt: f64,
    /// Mean RT of correct congruent trials.
    pub congruent_avg_rt: f64,
    /// Mean RT of correct incongruent trials.
    pub incongruent_avg_rt: f64,
    /// Mean RT of correct switch trials.
    pub switch_avg_rt: f64,
    /// Mean RT of correct repeat trials.
    pub repeat_avg_rt: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from a session's trials. Trials that are still pending are ignored.
    pub fn from_trials(trials: &[Trial]) -> Self {
        let answered: Vec<&Trial> = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .collect();
        let correct: Vec<&Trial> = answered
            .iter()
            .copied()
            .filter(|t| t.is_correct == Some(true))
            .collect();

        let total = answered.len();
        let correct_count = correct.len();

        let switch_avg_rt = mean_rt(correct.iter().copied().filter(|t| t.is_switch_trial));
        let repeat_avg_rt = mean_rt(correct.iter().copied().filter(|t| !t.is_switch_trial));
        let congruent_avg_rt = mean_rt(
            correct
                .iter()
                .copied()
                .filter(|t| t.congruency == Congruency::Congruent),
        );
        let incongruent_avg_rt = mean_rt(
            correct
                .iter()
                .copied()
                .filter(|t| t.congruency == Congruency::Incongruent),
        );

        Self {
            total_trials: total as u32,
            correct_trials: correct_count as u32,
            accuracy: percentage(correct_count, total),
            average_response_time: mean_rt(correct.iter().copied()),
            switch_cost: switch_avg_rt - repeat_avg_rt,
            task_interference: incongruent_avg_rt - congruent_avg_rt,
            error_count: (total - correct_count) as u32,
            color_task_accuracy: task_accuracy(&answered, TaskType::Color),
            shape_task_accuracy: task_accuracy(&answered, TaskType::Shape),
            color_task_avg_rt: mean_rt(
                correct
                    .iter()
                    .copied()
                    .filter(|t| t.task_type == TaskType::Color),
            ),
            shape_task_avg_rt: mean_rt(
                correct
                    .iter()
                    .copied()
                    .filter(|t| t.task_type == TaskType::Shape),
            ),
            congruent_avg_rt,
            incongruent_avg_rt,
            switch_avg_rt,
            repeat_avg_rt,
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn task_accuracy(answered: &[&Trial], task_type: TaskType) -> f64 {
    let (total, correct) = answered
        .iter()
        .filter(|t| t.task_type == task_type)
        .fold((0usize, 0usize), |(total, correct), t| {
            (total + 1, correct + usize::from(t.is_correct == Some(true)))
        });
    percentage(correct, total)
}

/// Mean response time, skipping trials without a recorded time. 0 when nothing remains.
fn mean_rt<'a>(trials: impl Iterator<Item = &'a Trial>) -> f64 {
    let (sum, count) = trials
        .filter_map(|t| t.response_time_ms)
        .fold((0.0f64, 0usize), |(sum, count), rt| (sum + rt as f64, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
