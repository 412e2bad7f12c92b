/// Auxiliary interrupt handlers ("randoms")
///
/// A random watches the execution context for a condition (an in-game event, a
/// dialog popping up, a disconnect) and, when it fires, takes over from the
/// running script for a few steps. The catalog is fixed and built once at
/// startup; see [`RandomEventPool::build`].
pub mod demo;
pub mod pool;

use std::time::Duration;

use crate::scripting::ExecutionContext;

pub use pool::{CatalogReport, RandomEventPool, RandomHandle, RandomLease};

/// Result of one step of a random event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomStep {
    /// Not finished; call `step` again after the delay
    Continue(Duration),
    /// The interruption has been dealt with
    Done,
}

/// Why a random event handler could not be constructed or initialized
#[derive(Debug, thiserror::Error)]
pub enum RandomInitError {
    #[error("execution context lacks required capability '{0}'")]
    MissingCapability(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error("panicked during construction: {0}")]
    Panicked(String),
}

/// An interrupt-style handler from the fixed catalog
pub trait RandomEvent: Send + Sync + 'static {
    /// Catalog name, also used by config to disable the handler
    fn name(&self) -> &'static str;

    /// One-time setup with the shared execution context
    fn init(&self, _ctx: &ExecutionContext) -> Result<(), RandomInitError> {
        Ok(())
    }

    /// Whether the interruption is currently happening
    fn activate_condition(&self, ctx: &ExecutionContext) -> bool;

    /// Advance the handler while it has control
    fn step(&self, ctx: &ExecutionContext) -> RandomStep;
}

/// Constructor for a catalog entry
pub type RandomFactory = fn() -> Result<Box<dyn RandomEvent>, RandomInitError>;

/// One line of the static catalog
#[derive(Debug, Clone, Copy)]
pub struct RandomEntry {
    pub name: &'static str,
    pub factory: RandomFactory,
}

fn construct_default<T: RandomEvent + Default>() -> Result<Box<dyn RandomEvent>, RandomInitError> {
    Ok(Box::new(T::default()))
}

impl RandomEntry {
    pub const fn new(name: &'static str, factory: RandomFactory) -> Self {
        Self { name, factory }
    }

    /// Entry for a handler type constructed with `Default`
    pub fn of<T: RandomEvent + Default>(name: &'static str) -> Self {
        Self::new(name, construct_default::<T>)
    }
}

/// Build a catalog from handler types
///
/// # Example
/// ```ignore
/// let catalog = random_catalog!["interruption" => Interruption];
/// ```
#[macro_export]
macro_rules! random_catalog {
    ($($name:literal => $random:ty),+ $(,)?) => {
        vec![
            $(
                $crate::randoms::RandomEntry::of::<$random>($name),
            )+
        ]
    };
}

/// Catalog shipped with the library
pub fn default_catalog() -> Vec<RandomEntry> {
    random_catalog![
        "interruption" => demo::Interruption,
    ]
}
