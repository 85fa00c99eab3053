//! Task descriptions handed to the scheduler at submission

use serde::{Deserialize, Serialize};

use crate::comm::DataLocation;
use crate::data::AccessMode;
use crate::resource::ResourceRequirements;

/// Parameter direction as declared by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn access_mode(&self) -> AccessMode {
        match self {
            Direction::In => AccessMode::Read,
            Direction::Out => AccessMode::Write,
            Direction::InOut => AccessMode::ReadWrite,
        }
    }
}

/// Kind of value a parameter carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    File,
    Object,
}

/// One data parameter of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Application-level name of the datum
    pub data: String,
    pub direction: Direction,
    #[serde(default)]
    pub data_type: DataType,
    /// Where the original value lives, for data never written by a task
    #[serde(default)]
    pub origin: Option<DataLocation>,
}

impl Parameter {
    pub fn new(data: impl Into<String>, direction: Direction) -> Self {
        Self {
            data: data.into(),
            direction,
            data_type: DataType::File,
            origin: None,
        }
    }

    pub fn input(data: impl Into<String>) -> Self {
        Self::new(data, Direction::In)
    }

    pub fn output(data: impl Into<String>) -> Self {
        Self::new(data, Direction::Out)
    }

    pub fn inout(data: impl Into<String>) -> Self {
        Self::new(data, Direction::InOut)
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_origin(mut self, origin: DataLocation) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// One way of running a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub id: u32,
    pub signature: String,
    #[serde(default)]
    pub requirements: ResourceRequirements,
}

impl Implementation {
    pub fn new(id: u32, signature: impl Into<String>, requirements: ResourceRequirements) -> Self {
        Self {
            id,
            signature: signature.into(),
            requirements,
        }
    }
}

/// What to do when an attempt of the task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Run again up to the retry budget, then fail
    #[default]
    Retry,
    /// Cancel every successor transitively
    CancelSuccessors,
    /// Let successors run as if the task completed
    Ignore,
    /// Fail the whole application
    Fail,
}

/// A submitted task as the scheduler sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: u64,
    pub name: String,
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub group: Option<u64>,
    #[serde(default)]
    pub on_failure: OnFailure,
    pub implementations: Vec<Implementation>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl TaskDescription {
    /// Task with a single one-core implementation named after it
    pub fn new(task_id: u64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            task_id,
            implementations: vec![Implementation::new(0, name.clone(), ResourceRequirements::default())],
            name,
            priority: false,
            group: None,
            on_failure: OnFailure::default(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Replace the implementations
    pub fn with_implementations(mut self, implementations: Vec<Implementation>) -> Self {
        self.implementations = implementations;
        self
    }

    /// Single implementation needing `requirements`
    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.implementations = vec![Implementation::new(0, self.name.clone(), requirements)];
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group(mut self, group: u64) -> Self {
        self.group = Some(group);
        self
    }

    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }
}
