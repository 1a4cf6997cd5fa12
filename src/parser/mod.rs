// Playbook, play and task parsing.

pub mod playbook;
pub mod roles;
pub mod task;

pub use playbook::{Play, Playbook};
pub use task::{Task, TaskData};
