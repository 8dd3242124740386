// Re-export all items from the submodules
mod categories;
mod pipeline_config;
mod session;

// Re-export category handling
pub use categories::{
    Category,
    CategorySet,
};

// Re-export settings and the validated configuration
pub use pipeline_config::{
    ExtensionRules,
    PipelineConfig,
    PipelineSettings,
    RedactionMode,
    RunParameters,
    TimeWindow,
    generate_session_id,
    load_or_default_settings,
    validate_session_id,
};

// Re-export session state
pub use session::{
    QuerySession,
    SessionLayout,
};
