//! 核心编排层：错误、状态、定义追踪、effect、system prompt 渲染、主控循环

pub mod definitions;
pub mod effects;
pub mod error;
pub mod events;
pub mod handle;
pub mod orchestrator;
pub mod prompt;
pub mod scope;
pub mod state;

pub use definitions::{DefinitionKind, DefinitionTracker, KindClass};
pub use effects::{Dep, EffectContext, EffectFn, EffectsManager, StepModifier, ToolInvocation};
pub use error::PromptError;
pub use events::ConversationEvent;
pub use handle::{DefinitionHandle, SharedSignals, StepSignals};
pub use orchestrator::{
    describe_fn, Conversation, ConversationBuilder, ConversationOptions, DescribeFn, RunOutcome,
};
pub use prompt::{render_system_prompt, Variable};
pub use scope::Scope;
pub use state::{StateSetter, StateStore};
