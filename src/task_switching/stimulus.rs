//! Stimulus and response domain model.
//!
//! The response mapping is fixed: the color task maps BLUE to RIGHT and YELLOW to LEFT,
//! the shape task maps CIRCLE to LEFT and RECTANGLE to RIGHT. Congruency is a property of
//! the stimulus pair alone and does not depend on which task is cued.

use serde::{Deserialize, Serialize};

/// Stimulus shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Circle, classified LEFT under the shape task.
    Circle,
    /// Rectangle, classified RIGHT under the shape task.
    Rectangle,
}

/// Stimulus color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// Blue, classified RIGHT under the color task.
    Blue,
    /// Yellow, classified LEFT under the color task.
    Yellow,
}

/// Response key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Left response key.
    Left,
    /// Right response key.
    Right,
}

/// Which stimulus dimension is relevant on a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Classify by color.
    Color,
    /// Classify by shape.
    Shape,
}

/// Whether both task mappings agree on the response for a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Congruency {
    /// Color and shape mappings give the same response.
    Congruent,
    /// Color and shape mappings give different responses.
    Incongruent,
}

impl Shape {
    /// All shapes in enumeration order.
    pub const ALL: [Shape; 2] = [Shape::Circle, Shape::Rectangle];

    /// Response under the shape task.
    pub fn response(self) -> Response {
        match self {
            Shape::Circle => Response::Left,
            Shape::Rectangle => Response::Right,
        }
    }

    /// The shape classified as `response` under the shape task.
    pub fn for_response(response: Response) -> Self {
        match response {
            Response::Left => Shape::Circle,
            Response::Right => Shape::Rectangle,
        }
    }
}

impl Color {
    /// All colors in enumeration order.
    pub const ALL: [Color; 2] = [Color::Blue, Color::Yellow];

    /// Response under the color task.
    pub fn response(self) -> Response {
        match self {
            Color::Blue => Response::Right,
            Color::Yellow => Response::Left,
        }
    }

    /// The color classified as `response` under the color task.
    pub fn for_response(response: Response) -> Self {
        match response {
            Response::Right => Color::Blue,
            Response::Left => Color::Yellow,
        }
    }
}

impl Response {
    /// The other response key.
    pub fn opposite(self) -> Self {
        match self {
            Response::Left => Response::Right,
            Response::Right => Response::Left,
        }
    }
}

impl TaskType {
    /// All task types in enumeration order.
    pub const ALL: [TaskType; 2] = [TaskType::Color, TaskType::Shape];

    /// The task type that is not `self`.
    pub fn other(self) -> Self {
        match self {
            TaskType::Color => TaskType::Shape,
            TaskType::Shape => TaskType::Color,
        }
    }
}

/// Correct response for a stimulus under the cued task. The other dimension is ignored.
pub fn correct_response(task_type: TaskType, shape: Shape, color: Color) -> Response {
    match task_type {
        TaskType::Color => color.response(),
        TaskType::Shape => shape.response(),
    }
}

/// Congruency of a stimulus pair.
pub fn congruency(shape: Shape, color: Color) -> Congruency {
    if shape.response() == color.response() {
        Congruency::Congruent
    } else {
        Congruency::Incongruent
    }
}

macro_rules! text_enum {
    ($ty:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($ty::$variant => write!(f, $text),)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(format!(concat!("Unknown ", $label, ": {}"), s)),
                }
            }
        }
    };
}

text_enum!(Shape, "shape", { Circle => "circle", Rectangle => "rectangle" });
text_enum!(Color, "color", { Blue => "blue", Yellow => "yellow" });
text_enum!(Response, "response", { Left => "left", Right => "right" });
text_enum!(TaskType, "task type", { Color => "color", Shape => "shape" });
text_enum!(Congruency, "congruency", { Congruent => "congruent", Incongruent => "incongruent" });
