//! 工具层：工具 trait、单个 / 组合工具定义、组合分发、参数 schema 与执行器

pub mod composite;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use composite::{
    CompositeArgs, CompositeDispatcher, SubCall, SubCallResult, SubCallRunner, SubCallSuccess,
    ToolBatch,
};
pub use echo::EchoTool;
pub use executor::execute_tool;
pub use registry::{
    call_with_hooks, FnTool, Invocation, SubTool, Tool, ToolDefinition, ToolHooks, ToolKind,
};
pub use schema::{composite_schema, input_schema, InputValidator};
