mod affix_catalog;
mod config;
mod engine;
mod error;
mod types;

pub use affix_catalog::{
    AffixCatalog, AffixDefinition, AffixSpec, RunewordRecipe, RunewordRecipeSpec,
    effective_weight,
};
pub use config::{DEFAULT_COUNT_WEIGHTS, LootConfig, RuntimeConfig, SelectionMode};
pub use engine::{Engine, Session};
pub use error::{CoreError, CoreErrorCode};
pub use types::{
    AcquireOutcome, AffixView, BagEntry, ContainerChange, InstanceEntry, RuntimeEntry,
    SessionSnapshot, SessionSummary, SuppressReason,
};
