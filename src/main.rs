//! reprompt CLI
//!
//! `reprompt run <file>`：加载 TOML prompt 脚本与配置，运行对话并把最终文本打印到 stdout。

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use reprompt::config::load_config;
use reprompt::core::{Conversation, ConversationOptions};
use reprompt::llm::create_llm_from_config;
use reprompt::script::PromptScript;

#[derive(Parser)]
#[command(name = "reprompt", version, about = "Run declarative multi-step prompt scripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 运行一个 prompt 脚本
    Run {
        file: PathBuf,
        /// 覆盖 [engine] max_steps
        #[arg(long)]
        max_steps: Option<usize>,
        /// 额外的配置文件
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reprompt::observability::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            file,
            max_steps,
            config,
        } => run(&file, max_steps, config.as_deref()).await,
    }
}

async fn run(file: &Path, max_steps: Option<usize>, config: Option<&Path>) -> anyhow::Result<()> {
    let mut cfg = load_config(config).context("Failed to load config")?;
    if let Some(n) = max_steps {
        cfg.engine.max_steps = n;
    }
    cfg.validate().context("Invalid config")?;

    let script = PromptScript::load(file)
        .with_context(|| format!("Failed to load script {}", file.display()))?;
    let describe = script.into_describe().context("Invalid script")?;
    let llm = create_llm_from_config(&cfg.llm).context("Failed to create LLM client")?;

    let mut conversation = Conversation::builder(llm)
        .options(ConversationOptions::from(&cfg.engine))
        .describe_boxed(describe)
        .build()
        .context("Failed to build conversation")?;
    let outcome = conversation.run().await.context("Conversation failed")?;

    tracing::info!(steps = outcome.steps.len(), "run finished");
    println!("{}", outcome.text);
    Ok(())
}
