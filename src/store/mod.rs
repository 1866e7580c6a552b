//! Durable file stores for tasks and behaviors.

pub mod behaviors;
pub mod counter;
pub mod tasks;

pub use behaviors::{Behavior, BehaviorStore};
pub use counter::IdCounter;
pub use tasks::{parse_schedule, Task, TaskStatus, TaskStore};
